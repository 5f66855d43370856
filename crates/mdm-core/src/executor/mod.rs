//! Supervises one downloader process per invocation.
//!
//! On unix stdout and stderr share one pipe, so lines are read in the order the
//! process wrote them. Elsewhere two reader tasks feed the same channel. Each line is decoded, classified by [`crate::output_parser`], and relayed to an
//! [`ExecutionSink`]. Cancellation is checked before every line.

mod command;
mod decode;
mod tuning;

pub use command::{build_args, find_on_path, resolve_binary, DEFAULT_BINARY};
pub use decode::decode_line;
pub use tuning::tune_concurrency;

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::MdmConfig;
use crate::options::JobOptions;
use crate::output_parser::{parse_line, ParsedLine};
use crate::progress::ProgressEvent;
use crate::strategy::Strategy;

/// Receives events from a running downloader, in output order.
pub trait ExecutionSink: Send {
    fn on_progress(&mut self, event: &ProgressEvent);
    fn on_status(&mut self, message: &str);
    /// The current best output path changed.
    fn on_path(&mut self, path: &Path);
    /// A file the downloader wrote (fragments, subtitles, temporaries).
    fn on_file_discovered(&mut self, _path: &Path) {}
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("download cancelled")]
    Cancelled,
    #[error("failed to start downloader {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("downloader exited with {}: {}", exit_label(*code), tail.last().map(String::as_str).unwrap_or("no output"))]
    ProcessFailed { code: Option<i32>, tail: Vec<String> },
    #[error("downloader i/o: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "a signal".to_string(),
    }
}

impl ExecuteError {
    /// Last output lines, when the error carries them.
    pub fn tail(&self) -> &[String] {
        match self {
            ExecuteError::ProcessFailed { tail, .. } => tail,
            _ => &[],
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub output_path: Option<PathBuf>,
    /// Every path the downloader reported writing.
    pub destinations: BTreeSet<PathBuf>,
    pub exit_code: Option<i32>,
    /// Non-zero exit accepted because the output file exists and is non-empty.
    pub tolerated_failure: bool,
    /// Strategy actually used (after fragment tuning).
    pub strategy: Strategy,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub binary: PathBuf,
    /// Working directory for the child; relative output paths resolve against it.
    pub working_dir: Option<PathBuf>,
    pub tail_lines: usize,
    pub terminate_grace: Duration,
}

impl ExecutorConfig {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: None,
            tail_lines: 120,
            terminate_grace: Duration::from_secs(1),
        }
    }

    /// Build from the global config; fails when no downloader binary can be found.
    pub fn from_config(cfg: &MdmConfig) -> anyhow::Result<Self> {
        let binary = resolve_binary(cfg.yt_dlp_path.as_deref()).ok_or_else(|| {
            anyhow::anyhow!("{DEFAULT_BINARY} not found; install it or set yt_dlp_path in config.toml")
        })?;
        Ok(Self {
            binary,
            working_dir: None,
            tail_lines: cfg.executor.tail_lines.max(1),
            terminate_grace: Duration::from_millis(cfg.executor.terminate_grace_ms),
        })
    }
}

/// Per-run line bookkeeping.
struct RunState {
    tail: VecDeque<String>,
    tail_cap: usize,
    destinations: BTreeSet<PathBuf>,
    output_path: Option<PathBuf>,
    base_dir: Option<PathBuf>,
}

impl RunState {
    fn new(tail_cap: usize, base_dir: Option<PathBuf>) -> Self {
        Self {
            tail: VecDeque::with_capacity(tail_cap),
            tail_cap,
            destinations: BTreeSet::new(),
            output_path: None,
            base_dir,
        }
    }

    fn absolute(&self, path: PathBuf) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    fn remember(&mut self, line: &str) {
        if self.tail.len() == self.tail_cap {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());
    }

    /// Record a written file; it becomes the output path only if none is known yet.
    fn discover(&mut self, path: PathBuf, sink: &mut dyn ExecutionSink) {
        let path = self.absolute(path);
        if self.destinations.insert(path.clone()) {
            sink.on_file_discovered(&path);
        }
        if self.output_path.is_none() {
            self.output_path = Some(path.clone());
            sink.on_path(&path);
        }
    }

    fn handle(&mut self, line: &str, sink: &mut dyn ExecutionSink) {
        self.remember(line);
        match parse_line(line) {
            ParsedLine::Progress(event) => {
                if let Some(name) = &event.filename {
                    self.discover(PathBuf::from(name), sink);
                }
                sink.on_progress(&event);
            }
            ParsedLine::Destination(path) => self.discover(path, sink),
            ParsedLine::Merge { path, message } => {
                let path = self.absolute(path);
                if self.destinations.insert(path.clone()) {
                    sink.on_file_discovered(&path);
                }
                self.output_path = Some(path.clone());
                sink.on_path(&path);
                sink.on_status(&message);
            }
            ParsedLine::Subtitle { path, message } => {
                sink.on_status(&message);
                if let Some(path) = path {
                    let path = self.absolute(path);
                    if self.destinations.insert(path.clone()) {
                        sink.on_file_discovered(&path);
                    }
                }
            }
            ParsedLine::PostProcess { message, .. } => sink.on_status(&message),
            ParsedLine::Status(message) | ParsedLine::Unknown(message) => {
                if !message.is_empty() {
                    sink.on_status(&message);
                }
            }
        }
    }
}

/// Read `\n`-terminated chunks and forward each display line as raw bytes.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                for segment in decode::split_redraws(&buf) {
                    if tx.send(segment.to_vec()).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::debug!("downloader output read failed: {}", e);
                break;
            }
        }
    }
}

/// Ask the child to exit. SIGTERM on unix, hard kill elsewhere.
fn request_exit(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid is our own child and has not been reaped (id() is Some).
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 {
                return;
            }
        }
    }
    let _ = child.start_kill();
}

/// Point stdout and stderr at the write end of one pipe and return its read end.
#[cfg(unix)]
fn merge_output(cmd: &mut Command) -> std::io::Result<tokio::net::unix::pipe::Receiver> {
    let (reader, writer) = std::io::pipe()?;
    cmd.stdout(writer.try_clone()?).stderr(writer);
    tokio::net::unix::pipe::Receiver::from_owned_fd(std::os::fd::OwnedFd::from(reader))
}

#[cfg(windows)]
fn hide_console(cmd: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console(_cmd: &mut Command) {}

/// Owns at most one downloader process at a time.
pub struct Executor {
    config: ExecutorConfig,
    child: Option<Child>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            child: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Run the downloader for `url` under `strategy`.
    ///
    /// The strategy (after fragment tuning) is written into `options` first. A non-zero
    /// exit still counts as success when the tracked output file exists and is non-empty.
    pub async fn execute(
        &mut self,
        url: &str,
        options: &mut JobOptions,
        strategy: &Strategy,
        sink: &mut dyn ExecutionSink,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ExecuteError> {
        if cancel.is_cancelled() {
            return Err(ExecuteError::Cancelled);
        }

        let effective = tune_concurrency(strategy, options.size_hint);
        if effective.concurrent_fragments() != strategy.concurrent_fragments() {
            tracing::info!(
                size_hint = ?options.size_hint,
                fragments = effective.concurrent_fragments(),
                "adjusted fragment concurrency"
            );
        }
        effective.apply_to(options);
        let args = build_args(options, url);

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .env("PYTHONIOENCODING", "utf-8")
            .kill_on_drop(true);
        #[cfg(unix)]
        let merged = merge_output(&mut cmd)?;
        #[cfg(not(unix))]
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        hide_console(&mut cmd);

        tracing::info!(
            binary = %self.config.binary.display(),
            strategy = effective.label(),
            url,
            "starting downloader"
        );
        tracing::debug!("downloader args: {:?}", args);

        let mut child = cmd.spawn().map_err(|source| ExecuteError::Spawn {
            binary: self.config.binary.clone(),
            source,
        })?;
        // The command still holds our copies of the write end; EOF needs them closed.
        drop(cmd);

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
        #[cfg(unix)]
        tokio::spawn(forward_lines(merged, tx.clone()));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);
        self.child = Some(child);

        let base_dir = self
            .config
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok());
        let mut state = RunState::new(self.config.tail_lines.max(1), base_dir);

        loop {
            let raw = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.terminate().await;
                    return Err(ExecuteError::Cancelled);
                }
                raw = rx.recv() => raw,
            };
            let Some(raw) = raw else { break };
            let line = decode_line(&raw);
            if line.trim().is_empty() {
                continue;
            }
            state.handle(&line, sink);
        }

        let status = self.wait_for_exit(cancel).await?;
        let code = status.code();
        let report = ExecutionReport {
            output_path: state.output_path.clone(),
            destinations: state.destinations.clone(),
            exit_code: code,
            tolerated_failure: false,
            strategy: effective,
        };

        if status.success() {
            tracing::info!(output = ?report.output_path, "downloader finished");
            return Ok(report);
        }

        if let Some(path) = &report.output_path {
            if output_is_usable(path).await {
                tracing::warn!(
                    code = ?code,
                    path = %path.display(),
                    "downloader exited non-zero but output file is valid; treating as success"
                );
                return Ok(ExecutionReport {
                    tolerated_failure: true,
                    ..report
                });
            }
        }

        tracing::warn!(code = ?code, "downloader failed");
        Err(ExecuteError::ProcessFailed {
            code,
            tail: state.tail.into_iter().collect(),
        })
    }

    async fn wait_for_exit(&mut self, cancel: &CancellationToken) -> Result<ExitStatus, ExecuteError> {
        let Some(child) = self.child.as_mut() else {
            return Err(ExecuteError::Cancelled);
        };
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };
        match waited {
            Some(status) => {
                self.child = None;
                Ok(status?)
            }
            None => {
                self.terminate().await;
                Err(ExecuteError::Cancelled)
            }
        }
    }

    /// Stop the running process: request exit, wait briefly, then kill.
    /// Idempotent; does nothing when no process is active.
    pub async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        request_exit(&mut child);
        match tokio::time::timeout(self.config.terminate_grace, child.wait()).await {
            Ok(_) => tracing::debug!("downloader exited after termination request"),
            Err(_) => {
                tracing::warn!("downloader ignored termination request, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!("kill downloader: {}", e);
                }
            }
        }
    }
}

async fn output_is_usable(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}
