//! Shell-script stand-ins for yt-dlp.
//!
//! Each fake lives in its own temp directory, which doubles as the executor's working
//! directory so relative output paths land next to the script.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use mdm_core::executor::{ExecutionSink, ExecutorConfig};
use mdm_core::probe::{NetworkProbe, NetworkStatus, ProbeError};
use mdm_core::progress::ProgressEvent;
use tempfile::TempDir;

pub struct FakeDownloader {
    dir: TempDir,
    binary: PathBuf,
}

impl FakeDownloader {
    /// Write `body` as a `/bin/sh` script named `yt-dlp`.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let binary = dir.path().join("yt-dlp");
        std::fs::write(&binary, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        Self { dir, binary }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> ExecutorConfig {
        let mut cfg = ExecutorConfig::new(&self.binary);
        cfg.working_dir = Some(self.dir.path().to_path_buf());
        cfg.terminate_grace = std::time::Duration::from_millis(500);
        cfg
    }
}

/// Everything a run reported, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Progress(ProgressEvent),
    Status(String),
    Path(PathBuf),
    File(PathBuf),
}

#[derive(Default)]
pub struct RecordingSink {
    pub seen: Vec<Seen>,
}

impl RecordingSink {
    pub fn progress(&self) -> Vec<&ProgressEvent> {
        self.seen
            .iter()
            .filter_map(|s| match s {
                Seen::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<&str> {
        self.seen
            .iter()
            .filter_map(|s| match s {
                Seen::Status(m) => Some(m.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl ExecutionSink for RecordingSink {
    fn on_progress(&mut self, event: &ProgressEvent) {
        self.seen.push(Seen::Progress(event.clone()));
    }

    fn on_status(&mut self, message: &str) {
        self.seen.push(Seen::Status(message.to_string()));
    }

    fn on_path(&mut self, path: &Path) {
        self.seen.push(Seen::Path(path.to_path_buf()));
    }

    fn on_file_discovered(&mut self, path: &Path) {
        self.seen.push(Seen::File(path.to_path_buf()));
    }
}

/// Probe for explicit-mode tests; any call is a failure to resolve.
pub struct NoProbe;

impl NetworkProbe for NoProbe {
    fn probe(&self) -> Result<NetworkStatus, ProbeError> {
        Err(ProbeError::InvalidTarget("no probe in tests".into()))
    }

    fn invalidate_cache(&self) {}
}
