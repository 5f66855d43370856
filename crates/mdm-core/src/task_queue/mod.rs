//! Durable task queue: job intent and last-known state, independent of execution.
//!
//! Every mutation is written through to disk when the queue is file-backed.

mod persist;
mod record;

pub use persist::{default_path, QUEUE_FILE_VERSION};
pub use record::{QueueRecord, RecordId, TaskStatus, DEFAULT_MAX_RETRIES};

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::options::JobOptions;
use crate::strategy::DownloadMode;

pub struct TaskQueue {
    records: BTreeMap<RecordId, QueueRecord>,
    /// Only grows, so removed ids are not reused.
    next_id: RecordId,
    path: Option<PathBuf>,
}

impl TaskQueue {
    /// Queue that lives only in memory (tests, one-shot runs).
    pub fn in_memory() -> Self {
        Self {
            records: BTreeMap::new(),
            next_id: 1,
            path: None,
        }
    }

    /// Open (or start) the queue stored at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let loaded = persist::load_records(&path)?;
        tracing::debug!(path = %path.display(), count = loaded.records.len(), "loaded task queue");
        Ok(Self {
            records: loaded.records.into_iter().map(|r| (r.id, r)).collect(),
            next_id: loaded.next_id,
            path: Some(path),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_path()?)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            persist::save_records(path, self.next_id, self.records.values())?;
        }
        Ok(())
    }

    /// Add a record for `url`. Only http(s) URLs are accepted.
    pub fn create(
        &mut self,
        url: &str,
        output_dir: impl Into<PathBuf>,
        options: JobOptions,
        mode: DownloadMode,
    ) -> Result<RecordId> {
        let parsed = url::Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("unsupported URL scheme '{}': {url}", parsed.scheme());
        }
        options.check_version()?;
        let id = self.next_id;
        self.next_id += 1;
        let record = QueueRecord::new(id, url, output_dir.into(), options, mode);
        self.records.insert(id, record);
        self.save()?;
        Ok(id)
    }

    /// Insert an existing record (keeps its id).
    pub fn add(&mut self, record: QueueRecord) -> Result<()> {
        self.next_id = self.next_id.max(record.id.saturating_add(1));
        self.records.insert(record.id, record);
        self.save()
    }

    pub fn get(&self, id: RecordId) -> Option<&QueueRecord> {
        self.records.get(&id)
    }

    /// Apply `f` to the record and persist. Returns false when the id is unknown.
    pub fn update<F>(&mut self, id: RecordId, f: F) -> Result<bool>
    where
        F: FnOnce(&mut QueueRecord),
    {
        let Some(record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        f(record);
        self.save()?;
        Ok(true)
    }

    pub fn remove(&mut self, id: RecordId) -> Result<bool> {
        if self.records.remove(&id).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in id (creation) order.
    pub fn all(&self) -> impl Iterator<Item = &QueueRecord> {
        self.records.values()
    }

    pub fn by_status(&self, status: TaskStatus) -> Vec<&QueueRecord> {
        self.all().filter(|r| r.status == status).collect()
    }

    pub fn pending(&self) -> Vec<&QueueRecord> {
        self.by_status(TaskStatus::Pending)
    }

    /// Queued or running.
    pub fn active(&self) -> Vec<&QueueRecord> {
        self.all().filter(|r| r.status.is_active()).collect()
    }

    pub fn completed(&self) -> Vec<&QueueRecord> {
        self.by_status(TaskStatus::Completed)
    }

    pub fn failed(&self) -> Vec<&QueueRecord> {
        self.by_status(TaskStatus::Failed)
    }

    pub fn retryable(&self) -> Vec<&QueueRecord> {
        self.all().filter(|r| r.can_retry()).collect()
    }

    /// Drop completed records; returns how many were removed.
    pub fn clear_completed(&mut self) -> Result<usize> {
        let before = self.records.len();
        self.records.retain(|_, r| r.status != TaskStatus::Completed);
        let removed = before - self.records.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Reset every failed record that still has retry budget back to pending.
    pub fn retry_all_failed(&mut self) -> Result<usize> {
        let mut count = 0;
        for record in self.records.values_mut().filter(|r| r.can_retry()) {
            record.reset_for_retry();
            count += 1;
        }
        if count > 0 {
            self.save()?;
        }
        Ok(count)
    }
}
