//! Raw time points fed to the boundary deriver: external detectors, points files and ffmpeg
//! scene cuts.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};

use super::render::run_analysis;
use super::timestamp::parse_timestamp;

pub trait PointSource: Send + Sync {
    fn describe(&self) -> String;
    fn detect(&self, media: &str) -> Result<Vec<f64>>;
}

/// Seconds or timestamps separated by whitespace; `#` starts a comment.
pub fn parse_points(text: &str) -> Result<Vec<f64>> {
    let mut points = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or_default();
        for token in line.split([' ', '\t', ',']).filter(|t| !t.is_empty()) {
            points.push(parse_timestamp(token)?);
        }
    }
    Ok(points)
}

/// Points stored on disk; the media argument is ignored.
#[derive(Debug, Clone)]
pub struct PointsFile {
    path: PathBuf,
}

impl PointsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PointSource for PointsFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn detect(&self, _media: &str) -> Result<Vec<f64>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read points file {}", self.path.display()))?;
        parse_points(&text).with_context(|| format!("In points file {}", self.path.display()))
    }
}

/// An external program printing time points on stdout. `{}` in the command line is replaced
/// by the media path; without it the path is appended.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    argv: Vec<String>,
}

impl CommandDetector {
    pub fn parse(command: &str) -> Result<Self> {
        let argv = shell_words::split(command)
            .with_context(|| format!("Invalid detector command '{command}'"))?;
        if argv.is_empty() {
            bail!("Detector command is empty");
        }
        Ok(Self { argv })
    }

    pub(crate) fn command_for(&self, media: &str) -> Vec<String> {
        let mut argv: Vec<String> = self.argv.iter().map(|a| a.replace("{}", media)).collect();
        if !self.argv.iter().any(|a| a.contains("{}")) {
            argv.push(media.to_string());
        }
        argv
    }
}

impl PointSource for CommandDetector {
    fn describe(&self) -> String {
        shell_words::join(&self.argv)
    }

    fn detect(&self, media: &str) -> Result<Vec<f64>> {
        let argv = self.command_for(media);
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .with_context(|| format!("Failed to run detector {}", argv[0]))?;
        if !output.status.success() {
            bail!(
                "Detector {} exited with status {:?}: {}",
                argv[0],
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_points(&String::from_utf8_lossy(&output.stdout))
            .with_context(|| format!("Detector {} printed invalid points", argv[0]))
    }
}

/// Scene changes scoring above `threshold` according to ffmpeg's `scene` metric.
#[derive(Debug, Clone, Copy)]
pub struct SceneCutDetector {
    pub threshold: f64,
}

impl SceneCutDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl PointSource for SceneCutDetector {
    fn describe(&self) -> String {
        format!("scene cuts > {}", self.threshold)
    }

    fn detect(&self, media: &str) -> Result<Vec<f64>> {
        let stderr = run_analysis(&[
            "-i".to_string(),
            media.to_string(),
            "-filter:v".to_string(),
            scene_filter(self.threshold),
            "-an".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ])?;
        let mut points = showinfo_times(&stderr);
        points.sort_by(f64::total_cmp);
        Ok(points)
    }
}

pub(crate) fn scene_filter(threshold: f64) -> String {
    format!("select='gt(scene,{threshold})',showinfo")
}

/// `pts_time:` values reported by the `showinfo` filter.
pub(crate) fn showinfo_times(stderr: &str) -> Vec<f64> {
    stderr
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once("pts_time:")?;
            rest.split_whitespace().next()?.parse().ok()
        })
        .collect()
}

/// Union of every source's points, sorted and deduplicated.
pub fn collect_points(sources: &[Box<dyn PointSource>], media: &str) -> Result<Vec<f64>> {
    let mut points = Vec::new();
    for source in sources {
        let found = source
            .detect(media)
            .with_context(|| format!("Point detection failed ({})", source.describe()))?;
        points.extend(found);
    }
    points.retain(|p| p.is_finite());
    points.sort_by(f64::total_cmp);
    points.dedup();
    Ok(points)
}
