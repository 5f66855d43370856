//! Stateless classifier for one line of downloader output.
//!
//! Recognition order:
//! 1. `MDM|` sentinel records produced by our `--progress-template`
//! 2. subtitle write notices
//! 3. merge / extract-audio stages (final output path)
//! 4. `[download] Destination:` (possibly temporary path)
//! 5. `[download]` percent progress text
//! 6. any other `[tag]` line is status; the rest is unknown

pub mod units;

use regex::{Captures, Regex};
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::progress::{ProgressEvent, StreamKind};
use units::{parse_eta, parse_eta_hms, parse_size, safe_int};

/// Prefix of machine-readable records.
pub const SENTINEL: &str = "MDM|";

/// `--progress-template` value for download progress records.
pub const DOWNLOAD_TEMPLATE: &str = "download:MDM|download|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.speed)s|%(progress.eta)s|%(info.vcodec)s|%(info.acodec)s|%(info.ext)s|%(progress.filename)s";

/// `--progress-template` value for post-processing records.
pub const POSTPROCESS_TEMPLATE: &str =
    "postprocess:MDM|postprocess|%(progress.status)s|%(progress.postprocessor)s";

const SUBTITLE_MARKER: &str = "Writing video subtitles to:";

const SIZE: &str = r"(?:[KMGTPE]i?)?B";

static PROGRESS_FULL: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?i)^\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%\s+of\s+~?\s*(?P<total>[\d.]+)\s*(?P<tunit>{SIZE})\s+at\s+(?:(?P<speed>[\d.]+)\s*(?P<sunit>{SIZE})/s|Unknown(?:\s+B/s|\s+speed)?)\s+ETA\s+(?P<eta>\d+:\d{{2}}(?::\d{{2}})?|Unknown|NA)"
    ))
});

static PROGRESS_PARTIAL: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?i)^\[download\]\s+(?P<done>[\d.]+)\s*(?P<unit>{SIZE})\s+at\s+(?:(?P<speed>[\d.]+)\s*(?P<sunit>{SIZE})/s|Unknown(?:\s+B/s|\s+speed)?)\s+ETA\s+(?P<eta>\d+:\d{{2}}(?::\d{{2}})?|Unknown|NA)"
    ))
});

static PROGRESS_DONE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?i)^\[download\]\s+100(?:\.0+)?%\s+of\s+~?\s*(?P<total>[\d.]+)\s*(?P<tunit>{SIZE})\s+in\s+(?P<elapsed>\d+:\d{{2}}(?::\d{{2}})?)"
    ))
});

static DESTINATION: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^\[download\]\s+Destination:\s+(?P<path>.+)$"));

static MERGE: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"^\[Merger\]\s+Merging formats into\s+"?(?P<path>[^"]+)"?$"#));

static EXTRACT_AUDIO: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^\[ExtractAudio\]\s+Destination:\s+(?P<path>.+)$"));

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| compile(r"^\[[^\]]+\]"));

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid built-in pattern {pattern:?}: {e}"),
    }
}

/// Classification of one output line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Progress(ProgressEvent),
    /// A (possibly temporary) output path.
    Destination(PathBuf),
    /// Final output path after merging streams or extracting audio.
    Merge { path: PathBuf, message: String },
    Subtitle { path: Option<PathBuf>, message: String },
    PostProcess {
        processor: String,
        stage: String,
        message: String,
    },
    Status(String),
    Unknown(String),
}

impl ParsedLine {
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedLine::Progress(_) => "progress",
            ParsedLine::Destination(_) => "destination",
            ParsedLine::Merge { .. } => "merge",
            ParsedLine::Subtitle { .. } => "subtitle",
            ParsedLine::PostProcess { .. } => "postprocess",
            ParsedLine::Status(_) => "status",
            ParsedLine::Unknown(_) => "unknown",
        }
    }
}

/// Classify one decoded line (without its trailing newline).
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return ParsedLine::Unknown(String::new());
    }

    if let Some(record) = line.strip_prefix(SENTINEL) {
        return parse_record(record, line);
    }

    if let Some(idx) = line.find(SUBTITLE_MARKER) {
        let rest = line[idx + SUBTITLE_MARKER.len()..].trim();
        return ParsedLine::Subtitle {
            path: (!rest.is_empty()).then(|| PathBuf::from(rest)),
            message: "Downloading subtitles".to_string(),
        };
    }
    if line.contains("[FFmpegSubtitlesConvertor]") {
        return ParsedLine::Status("Converting subtitles".to_string());
    }

    if line.starts_with("[Merger]") || line.starts_with("[ExtractAudio]") || line.contains("Merging formats") {
        if let Some(path) = MERGE
            .captures(line)
            .or_else(|| EXTRACT_AUDIO.captures(line))
            .and_then(|c| captured_path(&c))
        {
            return ParsedLine::Merge {
                path,
                message: line.to_string(),
            };
        }
        return ParsedLine::Status(line.to_string());
    }

    if let Some(path) = DESTINATION.captures(line).and_then(|c| captured_path(&c)) {
        return ParsedLine::Destination(path);
    }

    if line.starts_with("[download]") {
        if let Some(ev) = parse_progress_text(line) {
            return ParsedLine::Progress(ev);
        }
        return ParsedLine::Status(line.to_string());
    }

    if BRACKETED.is_match(line) {
        return ParsedLine::Status(line.to_string());
    }
    ParsedLine::Unknown(line.to_string())
}

fn captured_path(caps: &Captures<'_>) -> Option<PathBuf> {
    let path = caps.name("path")?.as_str().trim().trim_matches('"');
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// `record` is the line after the sentinel; `line` is kept for the unknown case.
fn parse_record(record: &str, line: &str) -> ParsedLine {
    let mut fields = record.splitn(9, '|');
    match fields.next() {
        Some("download") => {
            let mut next = || fields.next().unwrap_or("");
            let downloaded = safe_int(next());
            let total = safe_int(next());
            let speed = safe_int(next());
            let eta = parse_eta(next());
            let vcodec = next();
            let acodec = next();
            let _ext = next();
            let filename = next().trim();

            let total = (total > 0).then_some(total);
            ParsedLine::Progress(ProgressEvent {
                downloaded_bytes: downloaded,
                total_bytes: total,
                speed: (speed > 0).then_some(speed),
                eta_secs: eta,
                percent: total.map(|t| downloaded as f64 / t as f64 * 100.0),
                filename: (!filename.is_empty() && filename != "NA").then(|| filename.to_string()),
                stream: StreamKind::from_codecs(vcodec, acodec),
            })
        }
        Some("postprocess") => {
            let stage = fields.next().unwrap_or("").trim().to_string();
            let processor = fields.next().unwrap_or("").trim().to_string();
            let message = postprocess_message(&processor, &stage);
            ParsedLine::PostProcess {
                processor,
                stage,
                message,
            }
        }
        _ => ParsedLine::Unknown(line.to_string()),
    }
}

/// Display name for a downloader post-processor.
pub fn postprocessor_label(name: &str) -> &str {
    match name {
        "MoveFiles" => "Moving files",
        "Merger" | "FFmpegMerger" => "Merging audio and video",
        "EmbedThumbnail" => "Embedding thumbnail",
        "FFmpegMetadata" => "Embedding metadata",
        "FFmpegThumbnailsConvertor" => "Converting thumbnail",
        "FFmpegExtractAudio" => "Extracting audio",
        "FFmpegVideoConvertor" => "Converting video",
        "FFmpegEmbedSubtitle" => "Embedding subtitles",
        "SponsorBlock" => "Skipping sponsor segments",
        "ModifyChapters" => "Modifying chapters",
        other => other,
    }
}

fn postprocess_message(processor: &str, stage: &str) -> String {
    let label = if processor.is_empty() || processor == "NA" {
        "Post-processing"
    } else {
        postprocessor_label(processor)
    };
    let stage = match stage {
        "started" => "started",
        "processing" => "in progress",
        "finished" => "done",
        "" | "NA" => return format!("{label}..."),
        other => other,
    };
    format!("{label} ({stage})")
}

fn speed_from(caps: &Captures<'_>) -> Option<u64> {
    let value = caps.name("speed")?.as_str();
    let unit = caps.name("sunit")?.as_str();
    let speed = parse_size(value, unit);
    (speed > 0).then_some(speed)
}

fn eta_from(caps: &Captures<'_>) -> Option<u64> {
    caps.name("eta").and_then(|m| parse_eta(m.as_str()))
}

fn parse_progress_text(line: &str) -> Option<ProgressEvent> {
    if let Some(caps) = PROGRESS_FULL.captures(line) {
        let pct: f64 = caps["pct"].parse().ok()?;
        let total = parse_size(&caps["total"], &caps["tunit"]);
        let downloaded = if total > 0 {
            (total as f64 * pct / 100.0) as u64
        } else {
            0
        };
        return Some(ProgressEvent {
            downloaded_bytes: downloaded,
            total_bytes: (total > 0).then_some(total),
            speed: speed_from(&caps),
            eta_secs: eta_from(&caps),
            percent: Some(pct),
            ..Default::default()
        });
    }

    if let Some(caps) = PROGRESS_PARTIAL.captures(line) {
        return Some(ProgressEvent {
            downloaded_bytes: parse_size(&caps["done"], &caps["unit"]),
            speed: speed_from(&caps),
            eta_secs: eta_from(&caps),
            ..Default::default()
        });
    }

    if let Some(caps) = PROGRESS_DONE.captures(line) {
        let total = parse_size(&caps["total"], &caps["tunit"]);
        let elapsed = parse_eta_hms(&caps["elapsed"]).filter(|s| *s > 0);
        return Some(ProgressEvent {
            downloaded_bytes: total,
            total_bytes: (total > 0).then_some(total),
            speed: elapsed.map(|s| total / s).filter(|s| *s > 0),
            eta_secs: Some(0),
            percent: Some(100.0),
            ..Default::default()
        });
    }

    None
}
