//! Durable record of one queued download.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::options::JobOptions;
use crate::progress::ProgressEvent;
use crate::strategy::DownloadMode;

pub type RecordId = u64;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    #[serde(alias = "downloading")]
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: RecordId,
    pub url: String,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default)]
    pub mode: DownloadMode,
    pub status: TaskStatus,
    /// Completed fraction, 0.0..=1.0.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl QueueRecord {
    pub fn new(id: RecordId, url: impl Into<String>, output_dir: PathBuf, options: JobOptions, mode: DownloadMode) -> Self {
        let now = unix_now();
        Self {
            id,
            url: url.into(),
            output_dir,
            options,
            mode,
            status: TaskStatus::Pending,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: None,
            output_path: None,
            title: None,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Failed and still under the retry budget.
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retries < self.max_retries
    }

    pub fn mark_started(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(unix_now());
        self.last_error = None;
        self.touch();
    }

    pub fn mark_completed(&mut self, output_path: Option<PathBuf>) {
        self.status = TaskStatus::Completed;
        self.progress = 1.0;
        if output_path.is_some() {
            self.output_path = output_path;
        }
        self.completed_at = Some(unix_now());
        self.touch();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.into());
        self.retries += 1;
        self.touch();
    }

    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.touch();
    }

    /// Back to pending with progress cleared; the retry counter is kept.
    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.progress = 0.0;
        self.downloaded_bytes = 0;
        self.last_error = None;
        self.started_at = None;
        self.completed_at = None;
        self.touch();
    }

    pub fn record_progress(&mut self, event: &ProgressEvent) {
        self.downloaded_bytes = event.downloaded_bytes;
        if event.total_bytes.is_some() {
            self.total_bytes = event.total_bytes;
        }
        if let Some(fraction) = event.fraction() {
            self.progress = fraction;
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = unix_now();
    }
}
