//! Downloader command line and binary lookup.

use std::env;
use std::path::{Path, PathBuf};

use crate::options::JobOptions;
use crate::output_parser::{DOWNLOAD_TEMPLATE, POSTPROCESS_TEMPLATE};

/// Executable name searched on PATH when no explicit binary is configured.
pub const DEFAULT_BINARY: &str = "yt-dlp";

/// Full argument list (without the program itself) for one run.
pub fn build_args(options: &JobOptions, url: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "--ignore-config",
        "--no-warnings",
        "--no-color",
        "--newline",
        "--progress",
        "-q",
        "--progress-template",
        DOWNLOAD_TEMPLATE,
        "--progress-template",
        POSTPROCESS_TEMPLATE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend(options.to_cli_args());
    args.push("--".to_string());
    args.push(url.to_string());
    args
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Search PATH for `name` (with `.exe` appended on Windows).
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let file_name = if cfg!(windows) && !name.ends_with(".exe") {
        format!("{name}.exe")
    } else {
        name.to_string()
    };
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| is_executable(candidate))
}

/// Configured binary if it exists, otherwise `yt-dlp` from PATH.
pub fn resolve_binary(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if is_executable(path) {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured downloader not found, searching PATH");
    }
    find_on_path(DEFAULT_BINARY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SPEED;

    #[test]
    fn fixed_flags_lead_and_url_is_last() {
        let mut opts = JobOptions {
            format: Some("bv*+ba".into()),
            ..Default::default()
        };
        SPEED.apply_to(&mut opts);
        let args = build_args(&opts, "https://example.com/watch?v=1");
        assert_eq!(&args[..6], ["--ignore-config", "--no-warnings", "--no-color", "--newline", "--progress", "-q"]);
        assert_eq!(args[6], "--progress-template");
        assert!(args[7].starts_with("download:MDM|"));
        assert!(args[9].starts_with("postprocess:MDM|"));
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/watch?v=1"));
        assert!(args.windows(2).any(|w| w[0] == "-N" && w[1] == "16"));
    }

    #[test]
    fn missing_configured_binary_falls_back_to_path_search() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-yt-dlp");
        assert_eq!(resolve_binary(Some(&missing)), find_on_path(DEFAULT_BINARY));
    }

    #[cfg(unix)]
    #[test]
    fn configured_executable_wins() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("yt-dlp");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(resolve_binary(Some(&bin)), Some(bin.clone()));
    }
}
