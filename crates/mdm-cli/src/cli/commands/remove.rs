//! `mdm remove <id>` – drop a job from the queue. Downloaded files are kept.

use anyhow::{bail, Result};
use mdm_core::task_queue::TaskQueue;

pub fn run_remove(queue: &mut TaskQueue, id: u64) -> Result<()> {
    if !queue.remove(id)? {
        bail!("no job with id {id}");
    }
    println!("Removed job {id}");
    Ok(())
}
