//! `mdm add <url>` – queue a media URL.

use anyhow::Result;
use clap::Args;
use mdm_core::config::MdmConfig;
use mdm_core::options::{AudioExtraction, JobOptions, SubtitleOptions};
use mdm_core::strategy::DownloadMode;
use mdm_core::task_queue::TaskQueue;
use std::path::{Path, PathBuf};

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Media page URL (http or https).
    pub url: String,

    /// Output directory (default: download_dir from config, else the current directory).
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Downloader format selector, e.g. "bv*+ba/b" or "18".
    #[arg(long, short = 'f')]
    pub format: Option<String>,

    /// Download mode: speed, stable, harsh or auto (default: default_mode from config).
    #[arg(long, value_name = "MODE")]
    pub mode: Option<DownloadMode>,

    /// Extract audio only.
    #[arg(long)]
    pub audio_only: bool,

    /// Audio codec used with --audio-only.
    #[arg(long, default_value = "mp3", requires = "audio_only")]
    pub audio_format: String,

    /// Output filename template, e.g. "%(title)s.%(ext)s".
    #[arg(long, short = 'o', value_name = "TEMPLATE")]
    pub output: Option<String>,

    /// Subtitle languages to fetch (comma separated).
    #[arg(long, value_delimiter = ',', value_name = "LANGS")]
    pub sub_langs: Vec<String>,

    /// Embed fetched subtitles into the output file.
    #[arg(long)]
    pub embed_subs: bool,
}

impl AddArgs {
    /// Job options for these flags, writing into `dir`.
    pub fn to_options(&self, dir: &Path) -> JobOptions {
        let extract_audio = self.audio_only.then(|| AudioExtraction {
            codec: self.audio_format.clone(),
            quality_kbps: None,
        });
        let subtitles = SubtitleOptions {
            write: !self.sub_langs.is_empty(),
            langs: self.sub_langs.clone(),
            embed: self.embed_subs && !self.sub_langs.is_empty(),
            ..Default::default()
        };
        JobOptions {
            format: self.format.clone(),
            output_template: self.output.clone(),
            output_dir: Some(dir.to_path_buf()),
            extract_audio,
            subtitles,
            ..Default::default()
        }
    }
}

pub fn run_add(queue: &mut TaskQueue, cfg: &MdmConfig, args: AddArgs) -> Result<()> {
    let dir = match args.dir.clone().or_else(|| cfg.download_dir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let mode = args.mode.unwrap_or(cfg.default_mode);
    let options = args.to_options(&dir);
    let id = queue.create(&args.url, dir, options, mode)?;
    println!("Added job {id} ({mode}) for URL: {}", args.url);
    Ok(())
}
