//! Normalized progress snapshot emitted while a downloader process runs.

use std::fmt;

/// Which stream a progress line belongs to, derived from the reported codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamKind {
    Video,
    Audio,
    #[default]
    Unknown,
}

impl StreamKind {
    /// A real video codec means video; otherwise a real audio codec means audio.
    pub fn from_codecs(vcodec: &str, acodec: &str) -> Self {
        fn present(codec: &str) -> bool {
            let c = codec.trim();
            !c.is_empty() && !c.eq_ignore_ascii_case("na") && !c.eq_ignore_ascii_case("none")
        }
        if present(vcodec) {
            StreamKind::Video
        } else if present(acodec) {
            StreamKind::Audio
        } else {
            StreamKind::Unknown
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressEvent {
    pub downloaded_bytes: u64,
    /// Not always known (live streams, some fragmented formats).
    pub total_bytes: Option<u64>,
    /// Bytes per second.
    pub speed: Option<u64>,
    pub eta_secs: Option<u64>,
    /// Percentage as printed by the downloader, when the line carried one.
    pub percent: Option<f64>,
    pub filename: Option<String>,
    pub stream: StreamKind,
}

impl ProgressEvent {
    /// Completed fraction in `0.0..=1.0`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        if let Some(total) = self.total_bytes.filter(|t| *t > 0) {
            return Some((self.downloaded_bytes as f64 / total as f64).min(1.0));
        }
        self.percent.map(|p| (p / 100.0).clamp(0.0, 1.0))
    }
}

/// Human-readable byte count, e.g. "1.50 MiB".
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// ETA as `H:MM:SS` or `M:SS`.
pub fn format_eta(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_kind_from_codecs() {
        assert_eq!(StreamKind::from_codecs("avc1.640028", "none"), StreamKind::Video);
        assert_eq!(StreamKind::from_codecs("avc1", "mp4a"), StreamKind::Video);
        assert_eq!(StreamKind::from_codecs("none", "opus"), StreamKind::Audio);
        assert_eq!(StreamKind::from_codecs("NA", "NA"), StreamKind::Unknown);
        assert_eq!(StreamKind::from_codecs("", ""), StreamKind::Unknown);
    }

    #[test]
    fn fraction_prefers_bytes() {
        let ev = ProgressEvent {
            downloaded_bytes: 250,
            total_bytes: Some(1000),
            percent: Some(90.0),
            ..Default::default()
        };
        assert_eq!(ev.fraction(), Some(0.25));

        let pct_only = ProgressEvent {
            percent: Some(40.0),
            ..Default::default()
        };
        assert_eq!(pct_only.fraction(), Some(0.4));
        assert_eq!(ProgressEvent::default().fraction(), None);
    }

    #[test]
    fn formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_eta(75), "1:15");
        assert_eq!(format_eta(3725), "1:02:05");
    }
}
