//! Classify a failed run's output tail into a user-facing diagnosis.

use std::fmt;

/// Known failure causes reported by the downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    AuthRequired,
    GeoRestricted,
    MembersOnly,
    Premiere,
    Private,
    Network,
    FormatUnavailable,
    FfmpegMissing,
    DiskFull,
    Unknown,
}

/// Keyword table, matched case-insensitively in order.
const KEYWORDS: &[(FailureKind, &[&str])] = &[
    (
        FailureKind::AuthRequired,
        &[
            "sign in to confirm you're not a bot",
            "only available to registered users",
        ],
    ),
    (
        FailureKind::GeoRestricted,
        &["video unavailable in your country", "not available in your country", "geo-restricted"],
    ),
    (FailureKind::MembersOnly, &["members only content", "join this channel"]),
    (FailureKind::Premiere, &["premiere"]),
    (FailureKind::Private, &["private video"]),
    (
        FailureKind::Network,
        &[
            "connection reset by peer",
            "timed out",
            "timeout",
            "connection refused",
            "temporary failure in name resolution",
        ],
    ),
    (FailureKind::FormatUnavailable, &["requested format is not available"]),
    (FailureKind::FfmpegMissing, &["ffprobe/ffmpeg not found", "ffmpeg isn't installed", "ffmpeg not found"]),
    (FailureKind::DiskFull, &["no space left on device"]),
];

impl FailureKind {
    pub fn title(self) -> &'static str {
        match self {
            FailureKind::AuthRequired => "Sign-in required (cookies missing or expired)",
            FailureKind::GeoRestricted => "Not available in this region",
            FailureKind::MembersOnly => "Members-only video",
            FailureKind::Premiere => "Premiere has not started",
            FailureKind::Private => "Private video",
            FailureKind::Network => "Network connection failed",
            FailureKind::FormatUnavailable => "Requested format not available",
            FailureKind::FfmpegMissing => "FFmpeg not found",
            FailureKind::DiskFull => "Disk full",
            FailureKind::Unknown => "Download failed",
        }
    }

    pub fn action(self) -> &'static str {
        match self {
            FailureKind::AuthRequired | FailureKind::MembersOnly | FailureKind::Private => {
                "export fresh cookies from a browser session with access and pass them via the job's cookie file"
            }
            FailureKind::GeoRestricted => "retry through a proxy in an allowed region",
            FailureKind::Premiere => "wait until the premiere has started",
            FailureKind::Network => "check the connection or proxy, then retry (harsh mode helps on flaky links)",
            FailureKind::FormatUnavailable => "pick another format or drop --format to let the downloader choose",
            FailureKind::FfmpegMissing => "install ffmpeg or set ffmpeg_location",
            FailureKind::DiskFull => "free disk space or choose another output directory",
            FailureKind::Unknown => "check the log, update yt-dlp, and verify the URL",
        }
    }

    /// Failures that may go away on their own.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Network | FailureKind::Premiere)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub kind: FailureKind,
    /// Short detail, usually the downloader's own `ERROR:` text.
    pub summary: String,
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.summary.is_empty() {
            write!(f, "{}; {}", self.kind.title(), self.kind.action())
        } else {
            write!(f, "{}: {}; {}", self.kind.title(), self.summary, self.kind.action())
        }
    }
}

const SUMMARY_MAX: usize = 100;

fn truncate(s: &str) -> String {
    if s.chars().count() <= SUMMARY_MAX {
        return s.to_string();
    }
    let mut out: String = s.chars().take(SUMMARY_MAX - 3).collect();
    out.push_str("...");
    out
}

/// Last `ERROR:` message in the output, if any.
fn error_line<'a, I>(lines: I) -> Option<&'a str>
where
    I: DoubleEndedIterator<Item = &'a str>,
{
    lines.rev().find_map(|line| {
        let idx = line.to_ascii_uppercase().find("ERROR:")?;
        Some(line[idx + "ERROR:".len()..].trim())
    })
}

fn lines<S: AsRef<str>>(tail: &[S]) -> impl DoubleEndedIterator<Item = &str> + '_ {
    tail.iter().map(|s| s.as_ref())
}

/// Diagnose a failure from the downloader's trailing output lines.
pub fn diagnose<S: AsRef<str>>(tail: &[S]) -> Diagnosis {
    let joined = lines(tail).collect::<Vec<_>>().join(" ").to_lowercase();

    let kind = KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| joined.contains(w)))
        .map(|(kind, _)| *kind)
        .unwrap_or(FailureKind::Unknown);

    let summary = error_line(lines(tail))
        .or_else(|| lines(tail).rev().find(|l| !l.trim().is_empty()))
        .map(|s| truncate(s.trim()))
        .unwrap_or_default();

    Diagnosis { kind, summary }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_check_is_auth_required() {
        let tail = [
            "[youtube] abc: Downloading webpage",
            "ERROR: [youtube] abc: Sign in to confirm you're not a bot. Use --cookies",
        ];
        let d = diagnose(&tail);
        assert_eq!(d.kind, FailureKind::AuthRequired);
        assert!(d.summary.starts_with("[youtube] abc: Sign in"));
    }

    #[test]
    fn disk_full_and_network() {
        assert_eq!(
            diagnose(&["ERROR: unable to write data: [Errno 28] No space left on device"]).kind,
            FailureKind::DiskFull
        );
        let net = diagnose(&["ERROR: Read timed out."]);
        assert_eq!(net.kind, FailureKind::Network);
        assert!(net.kind.is_transient());
    }

    #[test]
    fn unknown_falls_back_to_error_text() {
        let d = diagnose(&["something", "ERROR: Unsupported URL: https://example.com/x", "trailing"]);
        assert_eq!(d.kind, FailureKind::Unknown);
        assert_eq!(d.summary, "Unsupported URL: https://example.com/x");
    }

    #[test]
    fn long_summary_is_truncated() {
        let line = format!("ERROR: {}", "x".repeat(300));
        let d = diagnose(&[line]);
        assert_eq!(d.summary.chars().count(), 100);
        assert!(d.summary.ends_with("..."));
    }

    #[test]
    fn empty_tail() {
        let d = diagnose::<&str>(&[]);
        assert_eq!(d.kind, FailureKind::Unknown);
        assert!(d.summary.is_empty());
    }
}
