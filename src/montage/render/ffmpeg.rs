use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use tempfile::NamedTempFile;

use super::compiler::{clip_args, concat_args, mux_args, timeline_args};
use super::splice::{ConcatPart, concat_list};
use super::{ClipRequest, MuxRequest, Renderer, TimelineRequest};
use crate::montage::error::MontageError;
use crate::ui::{OutputFormat, get_output_format, is_debug_enabled};

pub trait FfmpegRunner: Send + Sync {
    fn run(&self, args: &[String], options: FfmpegRunOptions) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFfmpegRunner;

#[derive(Debug, Clone, Default)]
pub struct FfmpegRunOptions {
    pub total_duration: Option<f64>,
    pub verbose: bool,
}

impl FfmpegRunOptions {
    pub fn new(total_duration: Option<f64>, verbose: bool) -> Self {
        Self {
            total_duration,
            verbose,
        }
    }
}

impl FfmpegRunner for SystemFfmpegRunner {
    fn run(&self, args: &[String], options: FfmpegRunOptions) -> Result<()> {
        let mut child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| "Failed to spawn ffmpeg")?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stderr was not captured"))?;

        let pb = options.total_duration.and_then(progress_bar);

        let mut last_line = String::new();
        let mut error_lines: Vec<String> = Vec::new();
        let result = read_ffmpeg_stderr(
            stderr,
            options.verbose,
            &pb,
            &mut last_line,
            &mut error_lines,
        );

        let status = child.wait().context("Failed to wait for ffmpeg")?;
        result?;

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        if !status.success() {
            let stderr = if !error_lines.is_empty() {
                error_lines.join("\n")
            } else {
                last_line
            };
            return Err(MontageError::Render {
                tool: "ffmpeg",
                code: status.code(),
                stderr: stderr.trim().to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn progress_bar(duration: f64) -> Option<ProgressBar> {
    if get_output_format() == OutputFormat::Json || !(duration > 0.0) {
        return None;
    }
    let pb = ProgressBar::new((duration * 1000.0) as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("rendering".to_string());
    Some(pb)
}

fn read_ffmpeg_stderr<R: Read>(
    mut stderr: R,
    verbose: bool,
    pb: &Option<ProgressBar>,
    last_line: &mut String,
    error_lines: &mut Vec<String>,
) -> Result<()> {
    let mut buffer = [0u8; 4096];
    let mut accumulated = String::new();

    loop {
        let bytes_read = stderr
            .read(&mut buffer)
            .context("Failed to read ffmpeg stderr")?;
        if bytes_read == 0 {
            break;
        }

        accumulated.push_str(&String::from_utf8_lossy(&buffer[..bytes_read]));

        while let Some(pos) = accumulated.find(['\r', '\n']) {
            let line = accumulated[..pos].to_string();
            accumulated = accumulated[pos + 1..].to_string();

            if line.is_empty() {
                continue;
            }

            if verbose {
                eprintln!("{line}");
            }

            if line.contains("error") || line.contains("Error") || line.contains("ERROR") {
                error_lines.push(line.clone());
            }

            if let Some(pb) = pb
                && let Some(progress) = parse_ffmpeg_progress(&line)
            {
                pb.set_position((progress * 1000.0) as u64);
                if let Some(speed) = parse_ffmpeg_speed(&line) {
                    pb.set_message(speed);
                }
            }

            *last_line = line;
        }
    }

    Ok(())
}

fn parse_ffmpeg_progress(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let time_end = time_str.find(' ')?;
    parse_time_to_seconds(&time_str[..time_end])
}

fn parse_time_to_seconds(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn parse_ffmpeg_speed(line: &str) -> Option<String> {
    let speed_start = line.find("speed=")?;
    let speed_str = line[speed_start + 6..].trim_start();
    let speed_end = speed_str.find('x')?;
    Some(speed_str[..speed_end + 1].to_string())
}

/// Run an analysis pass (`-f null -`) and return its stderr, where filters like `showinfo`
/// and `blackframe` report.
pub fn run_analysis(args: &[String]) -> Result<String> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-nostdin"])
        .args(args)
        .output()
        .with_context(|| "Failed to run ffmpeg")?;
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(MontageError::Render {
            tool: "ffmpeg",
            code: output.status.code(),
            stderr: stderr.lines().last().unwrap_or_default().trim().to_string(),
        }
        .into());
    }
    Ok(stderr)
}

fn ffprobe_value(media: &Path, stream: Option<&str>, entry: &str) -> Result<String> {
    let mut command = Command::new("ffprobe");
    command.args(["-v", "error"]);
    if let Some(stream) = stream {
        command.args(["-select_streams", stream]);
    }
    let output = command
        .args([
            "-show_entries",
            entry,
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(media)
        .output()
        .with_context(|| format!("Failed to run ffprobe for {}", media.display()))?;

    if !output.status.success() {
        return Err(MontageError::Render {
            tool: "ffprobe",
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

pub fn probe_duration(media: &Path) -> Result<f64> {
    let value = ffprobe_value(media, None, "format=duration")?;
    value
        .parse()
        .with_context(|| format!("Failed to parse ffprobe duration '{value}'"))
}

/// Average frame rate of the first video stream, e.g. `30000/1001`.
pub fn probe_frame_rate(media: &Path) -> Result<f64> {
    let value = ffprobe_value(media, Some("v:0"), "stream=avg_frame_rate")?;
    parse_rate(&value).with_context(|| format!("Failed to parse frame rate '{value}'"))
}

fn parse_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.parse::<f64>().ok()? / den
        }
        None => value.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// ffmpeg-backed renderer; argument lists come from the compiler module.
pub struct FfmpegRenderer {
    runner: Box<dyn FfmpegRunner>,
}

impl FfmpegRenderer {
    pub fn new(runner: Box<dyn FfmpegRunner>) -> Self {
        Self { runner }
    }

    fn options(&self, total_duration: Option<f64>) -> FfmpegRunOptions {
        FfmpegRunOptions::new(total_duration, is_debug_enabled())
    }
}

impl Default for FfmpegRenderer {
    fn default() -> Self {
        Self::new(Box::new(SystemFfmpegRunner))
    }
}

impl Renderer for FfmpegRenderer {
    fn render_clip(&self, clip: &ClipRequest) -> Result<()> {
        self.runner.run(&clip_args(clip), self.options(None))
    }

    fn render_timeline(&self, request: &TimelineRequest) -> Result<()> {
        let args = timeline_args(request)?;
        self.runner.run(&args, self.options(Some(request.length)))
    }

    fn concat_lossless(&self, parts: &[ConcatPart], output: &Path) -> Result<()> {
        let parts = parts
            .iter()
            .map(ConcatPart::absolute)
            .collect::<Result<Vec<_>>>()?;
        let mut list = NamedTempFile::new().context("Failed to create concat list")?;
        list.write_all(concat_list(&parts).as_bytes())
            .context("Failed to write concat list")?;
        list.flush().context("Failed to write concat list")?;

        self.runner
            .run(&concat_args(list.path(), output), self.options(None))
    }

    fn mux(&self, request: &MuxRequest) -> Result<()> {
        let args = mux_args(request)?;
        self.runner.run(&args, self.options(Some(request.length)))
    }

    fn probe(&self, media: &str) -> Result<f64> {
        probe_duration(Path::new(media))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_and_speed() {
        let line = "frame=  240 fps= 60 q=28.0 size=    1024kB time=00:01:02.50 bitrate= 134.2kbits/s speed=2.51x";
        assert_eq!(parse_ffmpeg_progress(line), Some(62.5));
        assert_eq!(parse_ffmpeg_speed(line).as_deref(), Some("2.51x"));
        assert_eq!(parse_ffmpeg_progress("Input #0, mov,mp4"), None);
    }

    #[test]
    fn parses_fractional_rates() {
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 1e-2);
        assert_eq!(parse_rate("25"), Some(25.0));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("n/a"), None);
    }

    #[test]
    fn stderr_reader_collects_error_lines() {
        let stderr = b"frame=1 time=00:00:01.00 speed=1x\rError opening output\nlast line\n";
        let mut last = String::new();
        let mut errors = Vec::new();
        read_ffmpeg_stderr(&stderr[..], false, &None, &mut last, &mut errors).unwrap();
        assert_eq!(errors, vec!["Error opening output".to_string()]);
        assert_eq!(last, "last line");
    }
}
