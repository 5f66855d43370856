//! `mdm run` – run pending queue records through the download manager.

use anyhow::Result;
use mdm_core::config::MdmConfig;
use mdm_core::dispatcher::Dispatcher;
use mdm_core::executor::ExecutorConfig;
use mdm_core::manager::{DownloadManager, Job, JobEvent, JobOutcome, JobState, PipelineRunner};
use mdm_core::probe::TcpProbe;
use mdm_core::progress::{format_bytes, format_eta, ProgressEvent};
use mdm_core::strategy::DownloadMode;
use mdm_core::task_queue::{RecordId, TaskQueue, TaskStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

type SharedQueue = Arc<Mutex<TaskQueue>>;

pub async fn run_queue(
    queue: TaskQueue,
    cfg: &MdmConfig,
    jobs: Option<usize>,
    mode: Option<DownloadMode>,
) -> Result<()> {
    let pending: Vec<_> = queue.pending().into_iter().cloned().collect();
    if pending.is_empty() {
        println!("No pending jobs.");
        return Ok(());
    }

    let executor = ExecutorConfig::from_config(cfg)?;
    let probe = Arc::new(TcpProbe::from_config(&cfg.probe));
    let dispatcher = Arc::new(Dispatcher::new(cfg.dispatch.clone(), probe));
    let runner =
        PipelineRunner::new(dispatcher, executor).with_runtime_downgrade(cfg.runtime_downgrade);
    let limit = jobs.unwrap_or_else(|| cfg.concurrency_limit()).max(1);
    let manager = DownloadManager::new(Arc::new(runner), limit);
    tracing::info!(count = pending.len(), limit, "running queued jobs");

    let queue: SharedQueue = Arc::new(Mutex::new(queue));
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut started = Vec::with_capacity(pending.len());
    let mut watchers = Vec::with_capacity(pending.len());
    for record in pending {
        let mut options = record.options.clone();
        if options.output_dir.is_none() {
            options.output_dir = Some(record.output_dir.clone());
        }
        let job = manager.create_job(record.url.clone(), options, mode.unwrap_or(record.mode));
        let events = job.subscribe();
        watchers.push(tokio::spawn(track_job(
            Arc::clone(&queue),
            record.id,
            Arc::clone(&job),
            events,
            stop_rx.clone(),
        )));
        started.push(job);
    }
    for job in &started {
        manager.start(job.id());
    }

    tokio::select! {
        _ = wait_all(&started) => {}
        _ = interrupted() => {
            println!("Interrupted, stopping downloads...");
            if !manager.shutdown(cfg.shutdown_grace()).await {
                tracing::warn!("some downloads did not stop in time and were killed");
            }
        }
    }
    let _ = stop_tx.send(true);
    for watcher in watchers {
        watcher.await??;
    }

    let count = |state: JobState| started.iter().filter(|j| j.state() == state).count();
    let completed = count(JobState::Completed);
    let failed = count(JobState::Failed);
    let unfinished = started.len() - completed - failed;
    println!("Done: {completed} completed, {failed} failed, {unfinished} left pending");
    tracing::info!(completed, failed, unfinished, "run finished");
    Ok(())
}

async fn wait_all(jobs: &[Arc<Job>]) {
    for job in jobs {
        job.wait_finished().await;
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Mirror one job's events into its queue record until it finishes or the run stops.
async fn track_job(
    queue: SharedQueue,
    id: RecordId,
    job: Arc<Job>,
    mut events: broadcast::Receiver<JobEvent>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let mut last_print: Option<Instant> = None;
    loop {
        let event = tokio::select! {
            ev = events.recv() => ev,
            _ = stop.changed() => break,
        };
        match event {
            Ok(JobEvent::State(JobState::Queued)) => {
                queue.lock().await.update(id, |r| r.status = TaskStatus::Queued)?;
            }
            Ok(JobEvent::State(JobState::Running)) => {
                println!("[{id}] started: {}", job.url());
                queue.lock().await.update(id, |r| r.mark_started())?;
            }
            Ok(JobEvent::Progress(p)) => {
                let due = last_print.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL);
                if due || p.fraction() == Some(1.0) {
                    print_progress(id, &p);
                    queue.lock().await.update(id, |r| r.record_progress(&p))?;
                    last_print = Some(Instant::now());
                }
            }
            Ok(JobEvent::Status(message)) => tracing::debug!(job_id = id, "{}", message),
            Ok(JobEvent::Finished(_)) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(job_id = id, skipped, "event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    let mut queue = queue.lock().await;
    match job.outcome() {
        Some(JobOutcome::Completed { output_path }) => {
            match &output_path {
                Some(path) => println!("[{id}] completed: {}", path.display()),
                None => println!("[{id}] completed"),
            }
            queue.update(id, |r| r.mark_completed(output_path))?;
        }
        Some(JobOutcome::Failed { diagnosis, .. }) => {
            println!("[{id}] failed: {diagnosis}");
            queue.update(id, |r| r.mark_failed(diagnosis.to_string()))?;
        }
        // Interrupted or never started: leave it for the next run.
        Some(JobOutcome::Cancelled) | None => {
            queue.update(id, |r| r.reset_for_retry())?;
        }
    }
    Ok(())
}

fn print_progress(id: RecordId, p: &ProgressEvent) {
    let pct = p
        .fraction()
        .map(|f| format!("{:5.1}%", f * 100.0))
        .unwrap_or_else(|| "    ?%".to_string());
    let total = p.total_bytes.map(format_bytes).unwrap_or_else(|| "?".to_string());
    let speed = p
        .speed
        .map(|s| format!("{}/s", format_bytes(s)))
        .unwrap_or_else(|| "-".to_string());
    let eta = p.eta_secs.map(format_eta).unwrap_or_else(|| "?".to_string());
    println!(
        "[{id}] {pct}  {} / {total}  {speed}  ETA {eta}",
        format_bytes(p.downloaded_bytes)
    );
}
