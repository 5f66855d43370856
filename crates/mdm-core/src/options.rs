//! Typed, versioned option set for one job, and its mapping onto downloader flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::strategy::RetryCount;

/// Current schema version of [`JobOptions`].
pub const OPTIONS_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("invalid job options: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported job options version {found} (expected {OPTIONS_VERSION})")]
    Version { found: u32 },
}

/// Audio-only extraction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioExtraction {
    /// Target codec, e.g. "mp3", "m4a", "opus".
    pub codec: String,
    /// Bitrate in kbit/s. None = downloader default.
    #[serde(default)]
    pub quality_kbps: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubtitleOptions {
    pub write: bool,
    pub write_auto: bool,
    pub langs: Vec<String>,
    pub embed: bool,
    pub convert_to: Option<String>,
}

/// Network parameters written by a [`crate::strategy::Strategy`] right before execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkTuning {
    pub socket_timeout: Option<u32>,
    pub retries: Option<RetryCount>,
    pub fragment_retries: Option<RetryCount>,
    pub concurrent_fragments: Option<u32>,
    pub sleep_interval: Option<u32>,
    pub max_sleep_interval: Option<u32>,
    pub force_ipv4: bool,
    pub buffer_size: Option<String>,
    pub http_chunk_size: Option<String>,
    pub resize_buffer: bool,
    pub skip_unavailable_fragments: bool,
}

/// Everything a job asks of the downloader. Unknown keys are rejected on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobOptions {
    pub version: u32,
    /// Format selector, e.g. "bv*+ba/b" or "22".
    pub format: Option<String>,
    pub output_template: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub merge_output_format: Option<String>,
    pub extract_audio: Option<AudioExtraction>,
    pub embed_metadata: bool,
    pub embed_chapters: bool,
    pub write_thumbnail: bool,
    pub subtitles: SubtitleOptions,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub ffmpeg_location: Option<PathBuf>,
    /// Rate limit as accepted by the downloader, e.g. "2M".
    pub rate_limit: Option<String>,
    pub download_sections: Option<String>,
    pub sponsorblock_remove: Vec<String>,
    /// Size estimate from a prior metadata extraction, if any. Never fetched just for this.
    pub size_hint: Option<u64>,
    pub network: NetworkTuning,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            version: OPTIONS_VERSION,
            format: None,
            output_template: None,
            output_dir: None,
            temp_dir: None,
            merge_output_format: None,
            extract_audio: None,
            embed_metadata: false,
            embed_chapters: false,
            write_thumbnail: false,
            subtitles: SubtitleOptions::default(),
            proxy: None,
            user_agent: None,
            cookie_file: None,
            ffmpeg_location: None,
            rate_limit: None,
            download_sections: None,
            sponsorblock_remove: Vec::new(),
            size_hint: None,
            network: NetworkTuning::default(),
        }
    }
}

impl JobOptions {
    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        let opts: JobOptions = serde_json::from_str(json)?;
        opts.check_version()?;
        Ok(opts)
    }

    pub fn to_json(&self) -> Result<String, OptionsError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn check_version(&self) -> Result<(), OptionsError> {
        if self.version != OPTIONS_VERSION {
            return Err(OptionsError::Version {
                found: self.version,
            });
        }
        Ok(())
    }

    /// True when the job can't use the concurrent-fragment pipeline: audio extraction,
    /// or a single pre-muxed numeric format id (no "+" combinator).
    pub fn requires_single_stream(&self) -> bool {
        if self.extract_audio.is_some() {
            return true;
        }
        match self.format.as_deref().map(str::trim) {
            Some(f) => !f.is_empty() && !f.contains('+') && f.chars().all(|c| c.is_ascii_digit()),
            None => false,
        }
    }

    /// Downloader flags for this option set, excluding the fixed progress flags and the URL.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: String| {
            args.push(flag.to_string());
            args.push(value);
        };

        if let Some(proxy) = self.proxy.as_deref().filter(|p| !p.is_empty()) {
            push("--proxy", proxy.to_string());
        }
        if let Some(ua) = self.user_agent.as_deref().filter(|u| !u.is_empty()) {
            push("--user-agent", ua.to_string());
        }

        let net = &self.network;
        if let Some(t) = net.socket_timeout {
            push("--socket-timeout", t.to_string());
        }
        if let Some(r) = net.retries {
            push("--retries", r.to_string());
        }
        if let Some(r) = net.fragment_retries {
            push("--fragment-retries", r.to_string());
        }
        if let Some(s) = net.sleep_interval {
            push("--sleep-interval", s.to_string());
        }
        if let Some(s) = net.max_sleep_interval {
            push("--max-sleep-interval", s.to_string());
        }
        if let Some(n) = net.concurrent_fragments {
            push("-N", n.to_string());
        }
        if let Some(b) = &net.buffer_size {
            push("--buffer-size", b.clone());
        }
        if let Some(c) = &net.http_chunk_size {
            push("--http-chunk-size", c.clone());
        }

        if let Some(rate) = self.rate_limit.as_deref().filter(|r| !r.is_empty()) {
            push("--limit-rate", rate.to_string());
        }
        if let Some(cookies) = &self.cookie_file {
            push("--cookies", cookies.display().to_string());
        }
        if let Some(ffmpeg) = &self.ffmpeg_location {
            push("--ffmpeg-location", ffmpeg.display().to_string());
        }
        if let Some(tmpl) = self.output_template.as_deref().filter(|t| !t.is_empty()) {
            push("-o", tmpl.to_string());
        }
        if let Some(dir) = &self.output_dir {
            push("-P", dir.display().to_string());
        }
        if let Some(dir) = &self.temp_dir {
            push("-P", format!("temp:{}", dir.display()));
        }
        if let Some(fmt) = self.format.as_deref().filter(|f| !f.is_empty()) {
            push("-f", fmt.to_string());
        }
        if let Some(merge) = self.merge_output_format.as_deref().filter(|m| !m.is_empty()) {
            push("--merge-output-format", merge.to_string());
        }
        if let Some(audio) = &self.extract_audio {
            args.push("--extract-audio".to_string());
            args.push("--audio-format".to_string());
            args.push(audio.codec.clone());
            if let Some(q) = audio.quality_kbps {
                args.push("--audio-quality".to_string());
                args.push(format!("{q}K"));
            }
        }

        let subs = &self.subtitles;
        if subs.write {
            args.push("--write-sub".to_string());
        }
        if subs.write_auto {
            args.push("--write-auto-sub".to_string());
        }
        if !subs.langs.is_empty() {
            args.push("--sub-langs".to_string());
            args.push(subs.langs.join(","));
        }
        if subs.embed {
            args.push("--embed-subs".to_string());
        }
        if let Some(conv) = &subs.convert_to {
            args.push("--convert-subs".to_string());
            args.push(conv.clone());
        }

        if let Some(sections) = self.download_sections.as_deref().filter(|s| !s.is_empty()) {
            args.push("--download-sections".to_string());
            args.push(sections.to_string());
        }
        for cat in &self.sponsorblock_remove {
            args.push("--sponsorblock-remove".to_string());
            args.push(cat.clone());
        }

        let flags = [
            (self.embed_metadata, "--embed-metadata"),
            (self.embed_chapters, "--embed-chapters"),
            (self.write_thumbnail, "--write-thumbnail"),
            (net.force_ipv4, "--force-ipv4"),
            (net.resize_buffer, "--resize-buffer"),
            (net.skip_unavailable_fragments, "--skip-unavailable-fragments"),
        ];
        for (enabled, flag) in flags {
            if enabled {
                args.push(flag.to_string());
            }
        }

        args
    }
}
