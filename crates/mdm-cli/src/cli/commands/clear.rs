//! `mdm clear` – remove completed jobs from the queue.

use anyhow::Result;
use mdm_core::task_queue::TaskQueue;

pub fn run_clear(queue: &mut TaskQueue) -> Result<()> {
    let removed = queue.clear_completed()?;
    println!("Cleared {removed} completed job(s)");
    Ok(())
}
