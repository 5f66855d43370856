use super::*;
use async_trait::async_trait;
use std::sync::atomic::AtomicUsize;
use tokio::sync::Semaphore;

/// Runs until a permit is released or the job is cancelled.
struct GatedRunner {
    running: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<JobId>>,
    gate: Semaphore,
}

impl GatedRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
        })
    }

    fn started(&self) -> Vec<JobId> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl JobRunner for GatedRunner {
    async fn run(&self, job: Arc<Job>, ctx: RunContext) -> JobOutcome {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.lock().push(job.id());
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => JobOutcome::Cancelled,
            permit = self.gate.acquire() => {
                if let Ok(p) = permit {
                    p.forget();
                }
                JobOutcome::Completed { output_path: None }
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Ignores cancellation entirely.
struct StubbornRunner;

#[async_trait]
impl JobRunner for StubbornRunner {
    async fn run(&self, _job: Arc<Job>, _ctx: RunContext) -> JobOutcome {
        tokio::time::sleep(Duration::from_secs(60)).await;
        JobOutcome::Completed { output_path: None }
    }
}

struct PanickyRunner;

#[async_trait]
impl JobRunner for PanickyRunner {
    async fn run(&self, job: Arc<Job>, _ctx: RunContext) -> JobOutcome {
        if job.url().contains("panic") {
            panic!("runner blew up");
        }
        JobOutcome::Completed { output_path: None }
    }
}

fn add(manager: &DownloadManager, n: usize) -> Vec<Arc<Job>> {
    (0..n)
        .map(|i| manager.create_job(format!("https://example.com/{i}"), JobOptions::default(), DownloadMode::Auto))
        .collect()
}

async fn wait_all(jobs: &[Arc<Job>]) {
    for job in jobs {
        tokio::time::timeout(Duration::from_secs(5), job.wait_finished())
            .await
            .expect("job did not finish");
    }
}

#[tokio::test]
async fn never_exceeds_concurrency_limit() {
    let runner = GatedRunner::new();
    let manager = DownloadManager::new(runner.clone(), 2);
    let jobs = add(&manager, 5);

    let started: Vec<bool> = jobs.iter().map(|j| manager.start(j.id())).collect();
    assert_eq!(started, vec![true, true, false, false, false]);
    assert_eq!(manager.running_count(), 2);
    assert_eq!(manager.pending_count(), 3);
    assert_eq!(jobs[4].state(), JobState::Queued);

    runner.gate.add_permits(5);
    wait_all(&jobs).await;

    assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    assert!(jobs.iter().all(|j| j.state() == JobState::Completed));
    assert_eq!(manager.running_count(), 0);
    assert_eq!(manager.pending_count(), 0);
}

#[tokio::test]
async fn pending_jobs_start_in_fifo_order() {
    let runner = GatedRunner::new();
    let manager = DownloadManager::new(runner.clone(), 1);
    let jobs = add(&manager, 4);
    for job in &jobs {
        manager.start(job.id());
    }
    assert_eq!(manager.pending_ids(), vec![jobs[1].id(), jobs[2].id(), jobs[3].id()]);

    runner.gate.add_permits(4);
    wait_all(&jobs).await;
    let ids: Vec<JobId> = jobs.iter().map(|j| j.id()).collect();
    assert_eq!(runner.started(), ids);
}

#[tokio::test]
async fn finished_job_cannot_restart() {
    let runner = GatedRunner::new();
    let manager = DownloadManager::new(runner.clone(), 1);
    let job = add(&manager, 1).remove(0);
    assert!(manager.start(job.id()));
    assert!(manager.start(job.id()), "already running counts as started");

    runner.gate.add_permits(1);
    assert_eq!(job.wait_finished().await, JobState::Completed);
    assert!(!manager.start(job.id()));
    assert!(!manager.start(999));
    assert_eq!(runner.started().len(), 1);
}

#[tokio::test]
async fn shutdown_with_cooperative_runners() {
    let runner = GatedRunner::new();
    let manager = DownloadManager::new(runner.clone(), 2);
    let jobs = add(&manager, 3);
    for job in &jobs {
        manager.start(job.id());
    }

    assert!(manager.shutdown(Duration::from_secs(2)).await);
    assert_eq!(jobs[0].state(), JobState::Cancelled);
    assert_eq!(jobs[1].state(), JobState::Cancelled);
    // Dropped from the queue, never run.
    assert_eq!(jobs[2].state(), JobState::Pending);
    assert_eq!(manager.running_count(), 0);
    assert_eq!(manager.pending_count(), 0);
}

#[tokio::test]
async fn shutdown_aborts_stubborn_runner() {
    let manager = DownloadManager::new(Arc::new(StubbornRunner), 1);
    let job = add(&manager, 1).remove(0);
    assert!(manager.start(job.id()));
    tokio::task::yield_now().await;

    assert!(!manager.shutdown(Duration::from_millis(50)).await);
    assert_eq!(job.state(), JobState::Cancelled);
    assert_eq!(manager.running_count(), 0);
    assert_eq!(job.outcome(), Some(JobOutcome::Cancelled));
}

#[tokio::test]
async fn shutdown_aborts_job_that_is_being_removed() {
    let manager = DownloadManager::new(Arc::new(StubbornRunner), 1);
    let job = add(&manager, 1).remove(0);
    assert!(manager.start(job.id()));
    tokio::task::yield_now().await;

    let remover = {
        let manager = manager.clone();
        let id = job.id();
        tokio::spawn(async move { manager.remove(id).await })
    };
    tokio::task::yield_now().await;

    assert!(!manager.shutdown(Duration::from_millis(50)).await);
    assert_eq!(manager.running_count(), 0);
    assert_eq!(job.state(), JobState::Cancelled);

    let removed = tokio::time::timeout(Duration::from_secs(5), remover)
        .await
        .expect("remove returned after abort")
        .expect("remove task");
    assert!(removed);
    assert!(manager.job(job.id()).is_none());
}

#[tokio::test]
async fn remove_is_idempotent() {
    let runner = GatedRunner::new();
    let manager = DownloadManager::new(runner.clone(), 1);
    let job = add(&manager, 1).remove(0);
    manager.start(job.id());

    assert!(manager.remove(job.id()).await);
    assert_eq!(job.state(), JobState::Cancelled);
    assert!(manager.job(job.id()).is_none());
    assert_eq!(manager.running_count(), 0);
    assert!(!manager.remove(job.id()).await);
}

#[tokio::test]
async fn stopped_pending_job_never_runs() {
    let runner = GatedRunner::new();
    let manager = DownloadManager::new(runner.clone(), 1);
    let jobs = add(&manager, 2);
    manager.start(jobs[0].id());
    assert!(!manager.start(jobs[1].id()));

    assert!(manager.stop(jobs[1].id()));
    assert_eq!(jobs[1].state(), JobState::Cancelled);
    assert_eq!(manager.pending_count(), 0);

    runner.gate.add_permits(2);
    wait_all(&jobs).await;
    tokio::task::yield_now().await;
    assert_eq!(runner.started(), vec![jobs[0].id()]);
    assert!(!manager.stop(jobs[1].id()));
}

#[tokio::test]
async fn stop_cancels_running_job() {
    let runner = GatedRunner::new();
    let manager = DownloadManager::new(runner.clone(), 1);
    let jobs = add(&manager, 2);
    manager.start(jobs[0].id());
    manager.start(jobs[1].id());

    assert!(manager.stop(jobs[0].id()));
    assert_eq!(jobs[0].wait_finished().await, JobState::Cancelled);

    // Freed slot goes to the queued job.
    runner.gate.add_permits(1);
    assert_eq!(jobs[1].wait_finished().await, JobState::Completed);
}

#[tokio::test]
async fn panicking_runner_fails_job_and_frees_slot() {
    let manager = DownloadManager::new(Arc::new(PanickyRunner), 1);
    let bad = manager.create_job("https://example.com/panic", JobOptions::default(), DownloadMode::Auto);
    let good = manager.create_job("https://example.com/ok", JobOptions::default(), DownloadMode::Auto);
    manager.start(bad.id());
    manager.start(good.id());

    wait_all(&[bad.clone(), good.clone()]).await;
    assert_eq!(bad.state(), JobState::Failed);
    assert_eq!(good.state(), JobState::Completed);
    assert_eq!(manager.running_count(), 0);
}

#[tokio::test]
async fn raising_limit_promotes_pending() {
    let runner = GatedRunner::new();
    let manager = DownloadManager::new(runner.clone(), 1);
    let jobs = add(&manager, 3);
    for job in &jobs {
        manager.start(job.id());
    }
    assert_eq!(manager.running_count(), 1);

    manager.set_max_concurrent(3);
    assert_eq!(manager.running_count(), 3);
    assert_eq!(manager.pending_count(), 0);

    manager.set_max_concurrent(1);
    assert_eq!(manager.running_count(), 3, "lowering never interrupts");
    runner.gate.add_permits(3);
    wait_all(&jobs).await;
}

#[tokio::test]
async fn events_report_state_and_outcome() {
    let runner = GatedRunner::new();
    let manager = DownloadManager::new(runner.clone(), 1);
    let job = add(&manager, 1).remove(0);
    let mut events = job.subscribe();
    manager.start(job.id());
    runner.gate.add_permits(1);
    job.wait_finished().await;

    let mut states = Vec::new();
    let mut finished = None;
    while let Ok(ev) = events.try_recv() {
        match ev {
            JobEvent::State(s) => states.push(s),
            JobEvent::Finished(o) => finished = Some(o),
            _ => {}
        }
    }
    assert_eq!(states, vec![JobState::Running, JobState::Completed]);
    assert_eq!(finished, Some(JobOutcome::Completed { output_path: None }));
}
