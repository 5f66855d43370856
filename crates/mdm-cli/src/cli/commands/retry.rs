//! `mdm retry [<id>] [--all]` – put failed jobs back into the queue.

use anyhow::{bail, Result};
use mdm_core::task_queue::{TaskQueue, TaskStatus};

/// An explicit id retries any failed or cancelled job, even past its retry budget.
/// `--all` only touches failed jobs that still have budget.
pub fn run_retry(queue: &mut TaskQueue, id: Option<u64>, all: bool) -> Result<()> {
    if all {
        let count = queue.retry_all_failed()?;
        println!("Re-queued {count} job(s)");
        return Ok(());
    }
    let Some(id) = id else {
        bail!("specify a job id or --all");
    };
    let Some(record) = queue.get(id) else {
        bail!("no job with id {id}");
    };
    if !matches!(record.status, TaskStatus::Failed | TaskStatus::Cancelled) {
        bail!("job {id} is {}, only failed or cancelled jobs can be retried", record.status);
    }
    queue.update(id, |r| r.reset_for_retry())?;
    println!("Re-queued job {id}");
    Ok(())
}
