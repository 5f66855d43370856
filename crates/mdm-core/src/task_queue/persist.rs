//! Atomic JSON persistence for the task queue.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::record::{unix_now, QueueRecord, RecordId, TaskStatus};

pub const QUEUE_FILE_VERSION: u32 = 1;

#[derive(Serialize)]
struct QueueFileOut<'a> {
    version: u32,
    next_id: RecordId,
    tasks: Vec<&'a QueueRecord>,
    updated_at: i64,
}

#[derive(Deserialize)]
struct QueueFileIn {
    version: u32,
    #[serde(default)]
    next_id: Option<RecordId>,
    #[serde(default)]
    tasks: Vec<serde_json::Value>,
}

/// Records plus the id the next created record gets.
pub struct LoadedQueue {
    pub records: Vec<QueueRecord>,
    pub next_id: RecordId,
}

/// Default queue file: `~/.local/state/mdm/queue.json`.
pub fn default_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdm")?;
    Ok(xdg_dirs.get_state_home().join("mdm").join("queue.json"))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "queue.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write all records to `<path>.tmp`, then rename over `path`.
pub fn save_records<'a, I>(path: &Path, next_id: RecordId, records: I) -> Result<()>
where
    I: IntoIterator<Item = &'a QueueRecord>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
    }
    let file = QueueFileOut {
        version: QUEUE_FILE_VERSION,
        next_id,
        tasks: records.into_iter().collect(),
        updated_at: unix_now(),
    };
    let json = serde_json::to_vec_pretty(&file).context("serialize task queue")?;
    let tmp = tmp_path(path);
    fs::write(&tmp, json).with_context(|| format!("write task queue: {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace task queue: {}", path.display()))?;
    Ok(())
}

/// Load records from `path`. Missing file = empty queue. Malformed records are skipped;
/// records left running or queued by a previous process come back as pending.
/// Ids are never handed out twice, even after the newest record was removed.
pub fn load_records(path: &Path) -> Result<LoadedQueue> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LoadedQueue {
                records: Vec::new(),
                next_id: 1,
            })
        }
        Err(e) => return Err(e).with_context(|| format!("read task queue: {}", path.display())),
    };
    let file: QueueFileIn =
        serde_json::from_slice(&bytes).with_context(|| format!("parse task queue: {}", path.display()))?;
    if file.version != QUEUE_FILE_VERSION {
        bail!(
            "unsupported task queue version {} in {} (expected {})",
            file.version,
            path.display(),
            QUEUE_FILE_VERSION
        );
    }

    let mut records = Vec::with_capacity(file.tasks.len());
    for (idx, value) in file.tasks.into_iter().enumerate() {
        match serde_json::from_value::<QueueRecord>(value) {
            Ok(mut record) => {
                if record.status.is_active() {
                    tracing::info!(id = record.id, "recovering interrupted task as pending");
                    record.status = TaskStatus::Pending;
                }
                records.push(record);
            }
            Err(e) => tracing::warn!(index = idx, "skipping malformed task record: {}", e),
        }
    }
    let after_max = records.iter().map(|r| r.id.saturating_add(1)).max().unwrap_or(1);
    Ok(LoadedQueue {
        next_id: file.next_id.unwrap_or(1).max(after_max),
        records,
    })
}
