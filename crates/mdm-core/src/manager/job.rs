//! A job handle: identity, live state, and the event stream listeners subscribe to.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, watch};

use crate::diagnose::Diagnosis;
use crate::options::JobOptions;
use crate::progress::ProgressEvent;
use crate::strategy::DownloadMode;

pub type JobId = u64;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Pending => "pending",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        })
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { output_path: Option<PathBuf> },
    Failed {
        error: String,
        tail: Vec<String>,
        diagnosis: Diagnosis,
    },
    Cancelled,
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed { .. } => JobState::Completed,
            JobOutcome::Failed { .. } => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

/// Events delivered to subscribers, in the order the downloader produced them.
#[derive(Debug, Clone)]
pub enum JobEvent {
    State(JobState),
    Progress(ProgressEvent),
    Status(String),
    OutputPath(PathBuf),
    Finished(JobOutcome),
}

#[derive(Debug, Default)]
struct JobData {
    destinations: BTreeSet<PathBuf>,
    output_path: Option<PathBuf>,
    last_progress: Option<ProgressEvent>,
    strategy: Option<&'static str>,
    outcome: Option<JobOutcome>,
}

/// Read-only copy of a job's state.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub state: JobState,
    pub strategy: Option<&'static str>,
    pub output_path: Option<PathBuf>,
    pub destinations: Vec<PathBuf>,
    pub last_progress: Option<ProgressEvent>,
    pub outcome: Option<JobOutcome>,
}

pub struct Job {
    id: JobId,
    url: String,
    options: JobOptions,
    mode: DownloadMode,
    state: watch::Sender<JobState>,
    events: broadcast::Sender<JobEvent>,
    data: Mutex<JobData>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Job {
    pub(crate) fn new(id: JobId, url: String, options: JobOptions, mode: DownloadMode) -> Self {
        let (state, _) = watch::channel(JobState::Pending);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id,
            url,
            options,
            mode,
            state,
            events,
            data: Mutex::new(JobData::default()),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn mode(&self) -> DownloadMode {
        self.mode
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Subscribe to this job's events. Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    /// Wait until the job reaches a terminal state and return it.
    pub async fn wait_finished(&self) -> JobState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.data.lock().output_path.clone()
    }

    pub fn destinations(&self) -> Vec<PathBuf> {
        self.data.lock().destinations.iter().cloned().collect()
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.data.lock().outcome.clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let data = self.data.lock();
        JobSnapshot {
            id: self.id,
            url: self.url.clone(),
            state: self.state(),
            strategy: data.strategy,
            output_path: data.output_path.clone(),
            destinations: data.destinations.iter().cloned().collect(),
            last_progress: data.last_progress.clone(),
            outcome: data.outcome.clone(),
        }
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Move to a non-terminal state. Ignored once the job has finished.
    pub(crate) fn set_state(&self, next: JobState) -> bool {
        let changed = self.state.send_if_modified(|s| {
            if s.is_terminal() || *s == next {
                return false;
            }
            *s = next;
            true
        });
        if changed {
            self.emit(JobEvent::State(next));
        }
        changed
    }

    /// Record the terminal outcome. Only the first call has an effect.
    pub(crate) fn finish(&self, outcome: JobOutcome) -> bool {
        let next = outcome.state();
        let changed = self.state.send_if_modified(|s| {
            if s.is_terminal() {
                return false;
            }
            *s = next;
            true
        });
        if !changed {
            return false;
        }
        if let JobOutcome::Completed {
            output_path: Some(path),
        } = &outcome
        {
            self.data.lock().output_path = Some(path.clone());
        }
        self.data.lock().outcome = Some(outcome.clone());
        self.emit(JobEvent::State(next));
        self.emit(JobEvent::Finished(outcome));
        true
    }

    pub(crate) fn set_strategy(&self, label: &'static str) {
        self.data.lock().strategy = Some(label);
    }

    pub(crate) fn record_progress(&self, event: &ProgressEvent) {
        self.data.lock().last_progress = Some(event.clone());
        self.emit(JobEvent::Progress(event.clone()));
    }

    pub(crate) fn status(&self, message: &str) {
        self.emit(JobEvent::Status(message.to_string()));
    }

    pub(crate) fn set_output_path(&self, path: &Path) {
        self.data.lock().output_path = Some(path.to_path_buf());
        self.emit(JobEvent::OutputPath(path.to_path_buf()));
    }

    pub(crate) fn add_destination(&self, path: &Path) {
        self.data.lock().destinations.insert(path.to_path_buf());
    }
}
