//! `mdm status` – show status of all jobs.

use mdm_core::progress::format_bytes;
use mdm_core::task_queue::{TaskQueue, TaskStatus};

pub fn run_status(queue: &TaskQueue) {
    if queue.is_empty() {
        println!("No jobs in queue.");
        return;
    }
    println!("{:<6} {:<10} {:<6} {:<8} {:<10} URL", "ID", "STATE", "MODE", "PROGRESS", "SIZE");
    for r in queue.all() {
        let size = r
            .total_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<10} {:<6} {:<8} {:<10} {}",
            r.id,
            r.status.as_str(),
            r.mode.as_str(),
            format!("{:.1}%", r.progress * 100.0),
            size,
            r.url
        );
        if let Some(path) = &r.output_path {
            println!("       -> {}", path.display());
        }
        if r.status == TaskStatus::Failed {
            if let Some(err) = &r.last_error {
                println!("       {} (retries {}/{})", err, r.retries, r.max_retries);
            }
        }
    }
}
