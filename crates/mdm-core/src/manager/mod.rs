//! Concurrency admission control for download jobs.
//!
//! At most `max_concurrent` jobs run at once; the rest wait in a FIFO queue and are
//! promoted by `pump()` whenever a running job finishes or the limit is raised.
//! Must be used from within a Tokio runtime (jobs are spawned as tasks).

mod job;
mod runner;

pub use job::{Job, JobEvent, JobId, JobOutcome, JobSnapshot, JobState};
pub use runner::{JobRunner, JobSink, PipelineRunner, RunContext};

use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::diagnose::{Diagnosis, FailureKind};
use crate::options::JobOptions;
use crate::strategy::DownloadMode;

struct ActiveJob {
    job: Arc<Job>,
    cancel: CancellationToken,
    /// Cancelled once the task is gone, whether it returned or was aborted.
    exited: CancellationToken,
    abort: AbortHandle,
}

#[derive(Default)]
struct Bookkeeping {
    jobs: HashMap<JobId, Arc<Job>>,
    active: HashMap<JobId, ActiveJob>,
    pending: VecDeque<JobId>,
}

struct Inner {
    runner: Arc<dyn JobRunner>,
    max_concurrent: AtomicUsize,
    next_id: AtomicU64,
    book: Mutex<Bookkeeping>,
}

/// Cheap to clone; clones share the same bookkeeping.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    pub fn new(runner: Arc<dyn JobRunner>, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                max_concurrent: AtomicUsize::new(max_concurrent.max(1)),
                next_id: AtomicU64::new(1),
                book: Mutex::new(Bookkeeping::default()),
            }),
        }
    }

    /// Register a job without starting it.
    pub fn create_job(&self, url: impl Into<String>, options: JobOptions, mode: DownloadMode) -> Arc<Job> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Arc::new(Job::new(id, url.into(), options, mode));
        self.inner.book.lock().jobs.insert(id, Arc::clone(&job));
        tracing::debug!(job_id = id, url = job.url(), "job created");
        job
    }

    pub fn job(&self, id: JobId) -> Option<Arc<Job>> {
        self.inner.book.lock().jobs.get(&id).cloned()
    }

    /// All registered jobs in id order.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<_> = self.inner.book.lock().jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id());
        jobs
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent.load(Ordering::Acquire)
    }

    /// Change the limit. Raising it promotes pending jobs; lowering it never interrupts running ones.
    pub fn set_max_concurrent(&self, limit: usize) {
        let limit = limit.max(1);
        let previous = self.inner.max_concurrent.swap(limit, Ordering::AcqRel);
        tracing::info!(previous, limit, "concurrency limit changed");
        if limit > previous {
            self.pump();
        }
    }

    pub fn running_count(&self) -> usize {
        self.inner.book.lock().active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.book.lock().pending.len()
    }

    /// Job ids waiting for a slot, in promotion order.
    pub fn pending_ids(&self) -> Vec<JobId> {
        self.inner.book.lock().pending.iter().copied().collect()
    }

    /// Start the job now if a slot is free (true), otherwise queue it (false).
    /// Finished jobs cannot be restarted; unknown or finished ids return false.
    pub fn start(&self, id: JobId) -> bool {
        let mut book = self.inner.book.lock();
        let Some(job) = book.jobs.get(&id).cloned() else {
            return false;
        };
        if book.active.contains_key(&id) {
            return true;
        }
        if job.state().is_terminal() {
            return false;
        }
        book.pending.retain(|p| *p != id);
        if book.active.len() < self.max_concurrent() {
            Inner::spawn_locked(&self.inner, &mut book, job);
            true
        } else {
            book.pending.push_back(id);
            job.set_state(JobState::Queued);
            tracing::debug!(job_id = id, position = book.pending.len(), "job queued");
            false
        }
    }

    /// Promote pending jobs while capacity remains.
    pub fn pump(&self) {
        let mut book = self.inner.book.lock();
        Inner::pump_locked(&self.inner, &mut book);
    }

    /// Stop one job. A queued job is dropped from the queue and marked cancelled;
    /// a running job is asked to stop. Returns false for unknown or finished jobs.
    pub fn stop(&self, id: JobId) -> bool {
        let mut book = self.inner.book.lock();
        if let Some(active) = book.active.get(&id) {
            active.cancel.cancel();
            return true;
        }
        let Some(job) = book.jobs.get(&id).cloned() else {
            return false;
        };
        book.pending.retain(|p| *p != id);
        job.finish(JobOutcome::Cancelled)
    }

    /// Clear the pending queue, then ask every running job to stop.
    /// Jobs dropped from the queue go back to `Pending` and can be started again.
    pub fn stop_all(&self) {
        let mut book = self.inner.book.lock();
        let pending: Vec<JobId> = book.pending.drain(..).collect();
        for id in pending {
            if let Some(job) = book.jobs.get(&id) {
                job.set_state(JobState::Pending);
            }
        }
        for active in book.active.values() {
            active.cancel.cancel();
        }
        tracing::info!(running = book.active.len(), "stop requested for all jobs");
    }

    /// `stop_all`, then wait up to `grace` for running jobs to exit. Jobs still alive
    /// afterwards are aborted and marked cancelled. Returns true only if every job
    /// exited within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop_all();
        let deadline = tokio::time::Instant::now() + grace;

        // Every active task, including ones a concurrent `remove` is waiting on.
        let running: Vec<(JobId, Arc<Job>, CancellationToken, AbortHandle)> = {
            let book = self.inner.book.lock();
            book.active
                .iter()
                .map(|(id, a)| (*id, Arc::clone(&a.job), a.exited.clone(), a.abort.clone()))
                .collect()
        };

        let mut all_exited = true;
        for (id, job, exited, abort) in running {
            if tokio::time::timeout_at(deadline, exited.cancelled()).await.is_ok() {
                continue;
            }
            all_exited = false;
            tracing::warn!(job_id = id, "job did not stop within grace period, aborting");
            abort.abort();
            // Dropping the task kills its downloader process (kill_on_drop).
            exited.cancelled().await;
            {
                let mut book = self.inner.book.lock();
                book.active.remove(&id);
            }
            job.finish(JobOutcome::Cancelled);
        }
        all_exited
    }

    /// Remove a job from all bookkeeping, stopping it first if running. Idempotent.
    pub async fn remove(&self, id: JobId) -> bool {
        let (job, exited) = {
            let mut book = self.inner.book.lock();
            book.pending.retain(|p| *p != id);
            let job = book.jobs.remove(&id);
            let exited = book.active.get(&id).map(|a| {
                a.cancel.cancel();
                a.exited.clone()
            });
            (job, exited)
        };
        if let Some(exited) = exited {
            exited.cancelled().await;
        }
        let Some(job) = job else {
            return false;
        };
        job.finish(JobOutcome::Cancelled);
        tracing::debug!(job_id = id, "job removed");
        true
    }
}

impl Inner {
    fn spawn_locked(inner: &Arc<Inner>, book: &mut Bookkeeping, job: Arc<Job>) {
        let id = job.id();
        let cancel = CancellationToken::new();
        let ctx = RunContext {
            cancel: cancel.clone(),
            running_jobs: book.active.len(),
        };
        job.set_state(JobState::Running);
        tracing::info!(job_id = id, running = ctx.running_jobs + 1, "job started");

        let runner = Arc::clone(&inner.runner);
        let task_inner = Arc::clone(inner);
        let task_job = Arc::clone(&job);
        let exited = CancellationToken::new();
        let exit_guard = exited.clone().drop_guard();
        let handle = tokio::spawn(async move {
            let _exit_guard = exit_guard;
            let outcome = AssertUnwindSafe(runner.run(Arc::clone(&task_job), ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| JobOutcome::Failed {
                    error: "job runner panicked".to_string(),
                    tail: Vec::new(),
                    diagnosis: Diagnosis {
                        kind: FailureKind::Unknown,
                        summary: String::new(),
                    },
                });
            task_inner.finish(&task_job, outcome);
        });

        book.active.insert(
            id,
            ActiveJob {
                job,
                cancel,
                exited,
                abort: handle.abort_handle(),
            },
        );
    }

    fn pump_locked(inner: &Arc<Inner>, book: &mut Bookkeeping) {
        let limit = inner.max_concurrent.load(Ordering::Acquire).max(1);
        while book.active.len() < limit {
            let Some(id) = book.pending.pop_front() else {
                break;
            };
            let Some(job) = book.jobs.get(&id).cloned() else {
                continue;
            };
            if job.state().is_terminal() || book.active.contains_key(&id) {
                continue;
            }
            Inner::spawn_locked(inner, book, job);
        }
    }

    /// Called from the job task once the runner returns.
    fn finish(self: &Arc<Self>, job: &Arc<Job>, outcome: JobOutcome) {
        let mut book = self.book.lock();
        book.active.remove(&job.id());
        tracing::info!(job_id = job.id(), state = %outcome.state(), "job finished");
        job.finish(outcome);
        Inner::pump_locked(self, &mut book);
    }
}

#[cfg(test)]
mod tests;
