//! Assembly of the final video from a completed mapping store.

mod assemble;
mod compiler;
mod ffmpeg;
mod splice;


use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use self::assemble::{AssemblyMode, AssemblyOptions, AssemblyOutcome, Assembler};
pub use self::ffmpeg::{
    FfmpegRenderer, FfmpegRunOptions, FfmpegRunner, SystemFfmpegRunner, probe_duration,
    probe_frame_rate, run_analysis,
};
pub use self::splice::{ConcatPart, build_splice, changed_indices, concat_list};
use super::mapping::is_url;

/// x264 rate/speed tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    #[default]
    Medium,
    Low,
}

impl Quality {
    pub fn encoder_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Quality::High => &["-crf", "17", "-preset", "slow", "-tune", "film"],
            Quality::Medium => &["-crf", "23", "-preset", "medium"],
            Quality::Low => &["-crf", "33", "-preset", "veryfast"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

/// Where rendered output goes.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSink {
    File(PathBuf),
    Stream(String),
    Stdout,
}

impl OutputSink {
    pub fn parse(target: &str) -> Self {
        if target == "-" {
            OutputSink::Stdout
        } else if is_url(target) {
            OutputSink::Stream(target.to_string())
        } else {
            OutputSink::File(PathBuf::from(target))
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, OutputSink::Stream(_))
    }

    fn target(&self) -> String {
        match self {
            OutputSink::File(path) => path.to_string_lossy().into_owned(),
            OutputSink::Stream(url) => url.clone(),
            OutputSink::Stdout => "pipe:1".to_string(),
        }
    }
}

/// Canvas every clip is scaled and padded onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

/// One source interval re-encoded into its own file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRequest {
    pub url: String,
    pub start: f64,
    pub duration: f64,
    pub output: PathBuf,
    pub canvas: Option<Canvas>,
    pub quality: Quality,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineInput {
    pub url: String,
    pub start: f64,
    pub duration: f64,
}

/// A full single-pass re-encode of the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineRequest {
    pub inputs: Vec<TimelineInput>,
    pub audio: Option<PathBuf>,
    pub length: f64,
    pub canvas: Option<Canvas>,
    pub effect: Option<String>,
    pub quality: Quality,
    pub format: String,
    pub sinks: Vec<OutputSink>,
}

/// Copy a finished video stream next to the audio track, both cut at `length`.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxRequest {
    pub video: PathBuf,
    pub audio: Option<PathBuf>,
    pub length: f64,
    pub format: String,
    pub sinks: Vec<OutputSink>,
}

/// Transcoding backend.
pub trait Renderer: Send + Sync {
    fn render_clip(&self, clip: &ClipRequest) -> Result<()>;
    fn render_timeline(&self, request: &TimelineRequest) -> Result<()>;
    fn concat_lossless(&self, parts: &[ConcatPart], output: &Path) -> Result<()>;
    fn mux(&self, request: &MuxRequest) -> Result<()>;
    fn probe(&self, media: &str) -> Result<f64>;
}

/// Names of everything a build writes, derived from the output id and container format.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    base: PathBuf,
    format: String,
}

impl OutputLayout {
    pub fn new(dir: &Path, id: &str, format: &str) -> Self {
        Self {
            base: dir.join(format!("{id}.{format}")),
            format: format.to_string(),
        }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self.base.clone().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn whole(&self) -> PathBuf {
        self.base.clone()
    }

    pub fn store(&self) -> PathBuf {
        self.with_suffix(".txt")
    }

    /// Cache clip of the mapping at 1-based `position`.
    pub fn cache(&self, position: usize) -> PathBuf {
        self.with_suffix(&format!(".cache.{position}.{}", self.format))
    }

    pub fn intermediate(&self) -> PathBuf {
        self.with_suffix(&format!(".video.{}", self.format))
    }

    pub fn subtitles(&self) -> PathBuf {
        self.with_suffix(".srt")
    }
}
