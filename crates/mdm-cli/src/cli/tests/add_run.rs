//! Tests for add and run subcommands.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use mdm_core::strategy::DownloadMode;
use std::path::Path;

#[test]
fn cli_parse_add() {
    match parse(&["mdm", "add", "https://www.youtube.com/watch?v=abc"]) {
        CliCommand::Add(args) => {
            assert_eq!(args.url, "https://www.youtube.com/watch?v=abc");
            assert!(args.dir.is_none());
            assert!(args.mode.is_none());
            assert!(!args.audio_only);
            assert!(args.sub_langs.is_empty());
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_with_options() {
    match parse(&[
        "mdm",
        "add",
        "https://example.com/v",
        "--dir",
        "/tmp/media",
        "--mode",
        "hostile",
        "-f",
        "bv*+ba/b",
        "--sub-langs",
        "en,de",
        "--embed-subs",
    ]) {
        CliCommand::Add(args) => {
            assert_eq!(args.dir.as_deref(), Some(Path::new("/tmp/media")));
            assert_eq!(args.mode, Some(DownloadMode::Harsh));
            assert_eq!(args.format.as_deref(), Some("bv*+ba/b"));
            assert_eq!(args.sub_langs, vec!["en", "de"]);

            let opts = args.to_options(Path::new("/tmp/media"));
            assert_eq!(opts.output_dir.as_deref(), Some(Path::new("/tmp/media")));
            assert!(opts.subtitles.write);
            assert!(opts.subtitles.embed);
            assert!(opts.extract_audio.is_none());
        }
        _ => panic!("expected Add with options"),
    }
}

#[test]
fn cli_parse_add_audio_only() {
    match parse(&["mdm", "add", "https://example.com/v", "--audio-only", "--audio-format", "opus"]) {
        CliCommand::Add(args) => {
            let opts = args.to_options(Path::new("."));
            let audio = opts.extract_audio.as_ref().expect("audio extraction");
            assert_eq!(audio.codec, "opus");
            assert!(opts.requires_single_stream());
        }
        _ => panic!("expected Add with --audio-only"),
    }
}

#[test]
fn cli_parse_add_rejects_unknown_mode() {
    assert!(Cli::try_parse_from(["mdm", "add", "https://example.com/v", "--mode", "turbo"]).is_err());
}

#[test]
fn cli_parse_add_audio_format_requires_audio_only() {
    assert!(Cli::try_parse_from(["mdm", "add", "https://example.com/v", "--audio-format", "mp3"]).is_err());
}

#[test]
fn cli_parse_run() {
    match parse(&["mdm", "run"]) {
        CliCommand::Run { jobs, mode } => {
            assert!(jobs.is_none());
            assert!(mode.is_none());
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_jobs_and_mode() {
    match parse(&["mdm", "run", "--jobs", "4", "--mode", "stable"]) {
        CliCommand::Run { jobs, mode } => {
            assert_eq!(jobs, Some(4));
            assert_eq!(mode, Some(DownloadMode::Stable));
        }
        _ => panic!("expected Run with --jobs and --mode"),
    }
}
