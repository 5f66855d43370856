//! Execution seam between the manager and the downloader pipeline.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::diagnose::diagnose;
use crate::dispatcher::Dispatcher;
use crate::executor::{ExecuteError, ExecutionSink, Executor, ExecutorConfig};
use crate::progress::ProgressEvent;
use crate::strategy::{Strategy, HARSH};

use super::job::{Job, JobOutcome};

/// Per-run context handed to a runner.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Cancelled by `stop`, `stop_all`, `remove` and `shutdown`.
    pub cancel: CancellationToken,
    /// Jobs running when this one was admitted (excluding itself).
    pub running_jobs: usize,
}

/// Runs one job to completion. Must return promptly once `ctx.cancel` fires.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: Arc<Job>, ctx: RunContext) -> JobOutcome;
}

/// Relays executor callbacks onto the job's event stream.
pub struct JobSink {
    job: Arc<Job>,
}

impl JobSink {
    pub fn new(job: Arc<Job>) -> Self {
        Self { job }
    }
}

impl ExecutionSink for JobSink {
    fn on_progress(&mut self, event: &ProgressEvent) {
        self.job.record_progress(event);
    }

    fn on_status(&mut self, message: &str) {
        self.job.status(message);
    }

    fn on_path(&mut self, path: &Path) {
        self.job.set_output_path(path);
    }

    fn on_file_discovered(&mut self, path: &Path) {
        self.job.add_destination(path);
    }
}

/// Default runner: dispatcher -> executor, with optional runtime downgrade.
pub struct PipelineRunner {
    dispatcher: Arc<Dispatcher>,
    executor: ExecutorConfig,
    runtime_downgrade: bool,
}

impl PipelineRunner {
    pub fn new(dispatcher: Arc<Dispatcher>, executor: ExecutorConfig) -> Self {
        Self {
            dispatcher,
            executor,
            runtime_downgrade: false,
        }
    }

    /// After a process failure, retry with the next weaker strategy until the chain ends.
    pub fn with_runtime_downgrade(mut self, enabled: bool) -> Self {
        self.runtime_downgrade = enabled;
        self
    }

    async fn resolve(&self, job: &Job, running: usize) -> &'static Strategy {
        let dispatcher = Arc::clone(&self.dispatcher);
        let mode = job.mode();
        let options = job.options().clone();
        match tokio::task::spawn_blocking(move || dispatcher.resolve(mode, &options, running)).await {
            Ok(strategy) => strategy,
            Err(e) => {
                tracing::warn!(job_id = job.id(), "strategy resolution task failed: {}", e);
                &HARSH
            }
        }
    }
}

#[async_trait]
impl JobRunner for PipelineRunner {
    async fn run(&self, job: Arc<Job>, ctx: RunContext) -> JobOutcome {
        let mut strategy: Strategy = *self.resolve(&job, ctx.running_jobs).await;
        let mut sink = JobSink::new(Arc::clone(&job));

        loop {
            if ctx.cancel.is_cancelled() {
                return JobOutcome::Cancelled;
            }
            job.set_strategy(strategy.label());
            job.status(&format!("Strategy: {strategy}"));

            let mut options = job.options().clone();
            let mut executor = Executor::new(self.executor.clone());
            let result = executor
                .execute(job.url(), &mut options, &strategy, &mut sink, &ctx.cancel)
                .await;

            match result {
                Ok(report) => {
                    self.dispatcher.report_result(true);
                    return JobOutcome::Completed {
                        output_path: report.output_path,
                    };
                }
                Err(ExecuteError::Cancelled) => return JobOutcome::Cancelled,
                Err(err) => {
                    let weaker = matches!(err, ExecuteError::ProcessFailed { .. })
                        .then(|| self.dispatcher.runtime_fallback(&strategy))
                        .flatten();
                    if let (true, Some(next)) = (self.runtime_downgrade, weaker) {
                        tracing::warn!(
                            job_id = job.id(),
                            from = strategy.label(),
                            to = next.label(),
                            "downloader failed, retrying with weaker strategy: {}",
                            err
                        );
                        job.status(&format!("Retrying with {} strategy", next.label()));
                        strategy = *next;
                        continue;
                    }

                    self.dispatcher.report_result(false);
                    let tail = err.tail().to_vec();
                    let diagnosis = diagnose(&tail);
                    tracing::warn!(job_id = job.id(), "job failed: {} ({})", err, diagnosis.kind);
                    return JobOutcome::Failed {
                        error: err.to_string(),
                        tail,
                        diagnosis,
                    };
                }
            }
        }
    }
}
