use clap::{Args, Subcommand, ValueHint};
use std::path::PathBuf;

use super::acceptance::{FilterKind, Pace, Presence};
use super::render::Quality;

#[derive(Subcommand, Debug, Clone)]
pub enum MappingCommands {
    /// Validate a mappings file and show statistics
    Check(CheckArgs),
    /// Export the target intervals of a mappings file as subtitles
    Srt(SrtArgs),
    /// Derive target-only mappings from a points file
    Derive(DeriveArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Mappings file to validate
    #[arg(value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SrtArgs {
    /// Mappings file to export
    #[arg(value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Output path; defaults to <file>.srt
    #[arg(short = 'o', long = "out-file", value_hint = ValueHint::FilePath)]
    pub out_file: Option<PathBuf>,
}

/// Policy applied to raw points before they become target intervals.
#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    /// Cut the output timeline at this length (seconds or timestamp)
    #[arg(long)]
    pub output_length: Option<String>,

    /// Keep every Nth boundary
    #[arg(long)]
    pub joints: Option<usize>,

    /// Split every interval into N equal pieces
    #[arg(long)]
    pub splits: Option<usize>,

    /// Subdivide intervals longer than this many seconds
    #[arg(long)]
    pub max_interval: Option<f64>,

    /// Merge boundaries closer than this many seconds
    #[arg(long)]
    pub min_interval: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct DeriveArgs {
    /// File of time points (seconds or timestamps, whitespace separated)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub points: PathBuf,

    /// Total length of the timeline (seconds or timestamp)
    #[arg(long)]
    pub duration: String,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Output mappings file; defaults to stdout
    #[arg(short = 'o', long = "out-file", value_hint = ValueHint::FilePath)]
    pub out_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Audio track driving the timeline
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub audio: Option<PathBuf>,

    /// Source video: file, URL, playlist URL or ytsearchN:query (repeatable)
    #[arg(long = "videos", num_args = 1..)]
    pub videos: Vec<String>,

    /// Restrict a source to a sub-range, e.g. clip.mp4=1:00..2:30 (repeatable)
    #[arg(long = "range")]
    pub ranges: Vec<String>,

    /// Snap restricted ranges to detected scene cuts
    #[arg(long)]
    pub cuts: bool,

    /// Output sink: file, stream URL or '-' for stdout (repeatable)
    #[arg(short = 'o', long = "output")]
    pub outputs: Vec<String>,

    /// Base name of generated files
    #[arg(long, default_value = "output")]
    pub output_id: String,

    /// Mappings file; defaults to <output-id>.<format>.txt
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub mappings: Option<PathBuf>,

    /// Discard the sources of a loaded mappings file
    #[arg(long)]
    pub mappings_reinit: bool,

    /// Take target intervals from a subtitle file
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub mappings_from_subs: Option<PathBuf>,

    /// Take target intervals from the scene cuts of a video
    #[arg(long)]
    pub mappings_from_video: Option<String>,

    /// Points file used as boundary candidates (repeatable)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub points: Vec<PathBuf>,

    /// Command printing boundary candidates for the audio; `{}` is replaced by its path
    #[arg(long)]
    pub detector: Option<String>,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Reject or require dark frames
    #[arg(long, value_enum)]
    pub filter_dark: Option<Presence>,

    /// Reject or require scene cuts inside a clip
    #[arg(long, value_enum)]
    pub filter_cuts: Option<Presence>,

    /// Require fast or slow motion
    #[arg(long, value_enum)]
    pub filter_pace: Option<Pace>,

    /// Require or reject faces (needs filters.face_command)
    #[arg(long, value_enum)]
    pub filter_face: Option<Presence>,

    /// Require or reject on-screen text (needs filters.text_command)
    #[arg(long, value_enum)]
    pub filter_text: Option<Presence>,

    /// Run these filters first, in this order
    #[arg(long, value_enum, value_delimiter = ',')]
    pub filter_order: Vec<FilterKind>,

    /// Candidates judged per mapping before the last one is kept
    #[arg(long)]
    pub retries: Option<usize>,

    /// Acceptance workers
    #[arg(long)]
    pub threads: Option<usize>,

    /// Walk through sources in timeline order
    #[arg(long)]
    pub chrono: bool,

    #[arg(long)]
    pub chrono_speed: Option<f64>,

    #[arg(long)]
    pub chrono_scope: Option<f64>,

    /// Seed for source selection
    #[arg(long)]
    pub seed: Option<u64>,

    /// Re-encode the whole timeline (with --increment: splice changes into the last output)
    #[arg(long)]
    pub reencode: bool,

    /// Render one cache clip per mapping and join them without re-encoding
    #[arg(long)]
    pub increment: bool,

    #[arg(long, value_enum)]
    pub quality: Option<Quality>,

    /// Container format; defaults to flv for stream outputs, mp4 otherwise
    #[arg(long)]
    pub output_format: Option<String>,

    /// Pad every clip onto a canvas of this width
    #[arg(long, requires = "output_height")]
    pub output_width: Option<u32>,

    #[arg(long, requires = "output_width")]
    pub output_height: Option<u32>,

    /// Mirror the target intervals to <output>.srt on every save
    #[arg(long)]
    pub output_subtitles: bool,

    /// Apply a periodic cosine speed ramp to the re-encoded timeline
    #[arg(long)]
    pub speedup: bool,

    #[arg(long)]
    pub speedup_bpm: Option<f64>,

    /// Ramps per beat
    #[arg(long)]
    pub speedup_freq: Option<f64>,

    /// Draw from at most N of the given sources
    #[arg(long)]
    pub videos_number: Option<usize>,

    /// Settle the mappings but do not render the output
    #[arg(long)]
    pub dry_run: bool,
}
