//! Acceptance checks run against a candidate source interval.

use std::process::Command;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::montage::features::{CommandDetector, scene_filter, showinfo_times};
use crate::montage::render::{probe_frame_rate, run_analysis};

/// Media plus the bounds to judge. For cache clips the bounds are `[0, d]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub media: String,
    pub start: f64,
    pub final_: f64,
}

impl Candidate {
    pub fn new(media: impl Into<String>, start: f64, final_: f64) -> Self {
        Self {
            media: media.into(),
            start,
            final_,
        }
    }

    fn analysis_args(&self, filter: String) -> Vec<String> {
        vec![
            "-ss".to_string(),
            format!("{:.3}", self.start),
            "-to".to_string(),
            format!("{:.3}", self.final_),
            "-i".to_string(),
            self.media.clone(),
            "-vf".to_string(),
            filter,
            "-an".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ]
    }
}

pub trait Check: Send + Sync {
    fn name(&self) -> &'static str;
    fn accept(&self, candidate: &Candidate) -> Result<bool>;
}

/// Whether a detected property must be present or absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Include,
    Exclude,
}

impl Presence {
    fn accepts(self, detected: bool) -> bool {
        detected == (self == Presence::Include)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Dark,
    Cuts,
    Pace,
    Face,
    Text,
}

impl FilterKind {
    pub const DEFAULT_ORDER: [FilterKind; 5] = [
        FilterKind::Dark,
        FilterKind::Cuts,
        FilterKind::Pace,
        FilterKind::Face,
        FilterKind::Text,
    ];
}

pub struct DarkCheck {
    pub presence: Presence,
}

impl Check for DarkCheck {
    fn name(&self) -> &'static str {
        "dark"
    }

    fn accept(&self, candidate: &Candidate) -> Result<bool> {
        let stderr = run_analysis(&candidate.analysis_args("blackframe".to_string()))?;
        Ok(self.presence.accepts(stderr.contains("pblack:")))
    }
}

pub struct CutsCheck {
    pub presence: Presence,
    pub threshold: f64,
}

impl Check for CutsCheck {
    fn name(&self) -> &'static str {
        "cuts"
    }

    fn accept(&self, candidate: &Candidate) -> Result<bool> {
        let stderr = run_analysis(&candidate.analysis_args(scene_filter(self.threshold)))?;
        Ok(self.presence.accepts(!showinfo_times(&stderr).is_empty()))
    }
}

/// Fast means at least `rate` of the frames score above `threshold` on the scene metric.
pub struct PaceCheck {
    pub pace: Pace,
    pub threshold: f64,
    pub rate: f64,
}

pub(crate) fn is_fast(changes: usize, frames: f64, rate: f64) -> bool {
    frames > 0.0 && changes as f64 / frames >= rate
}

impl Check for PaceCheck {
    fn name(&self) -> &'static str {
        "pace"
    }

    fn accept(&self, candidate: &Candidate) -> Result<bool> {
        let stderr = run_analysis(&candidate.analysis_args(scene_filter(self.threshold)))?;
        let changes = showinfo_times(&stderr).len();
        let fps = probe_frame_rate(std::path::Path::new(&candidate.media))?;
        let frames = (candidate.final_ - candidate.start) * fps;
        Ok(is_fast(changes, frames, self.rate) == (self.pace == Pace::Fast))
    }
}

/// Extracts the middle frame and hands it to an external detector; a zero exit status
/// means the feature was found.
pub struct DetectorCheck {
    pub name: &'static str,
    pub presence: Presence,
    pub detector: CommandDetector,
}

impl Check for DetectorCheck {
    fn name(&self) -> &'static str {
        self.name
    }

    fn accept(&self, candidate: &Candidate) -> Result<bool> {
        let frame = tempfile::Builder::new()
            .prefix("beatcut-frame-")
            .suffix(".png")
            .tempfile()
            .context("Failed to create frame file")?;
        let middle = (candidate.start + candidate.final_) / 2.0;
        run_analysis(&[
            "-y".to_string(),
            "-ss".to_string(),
            format!("{middle:.3}"),
            "-i".to_string(),
            candidate.media.clone(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-vcodec".to_string(),
            "png".to_string(),
            frame.path().to_string_lossy().into_owned(),
        ])?;

        let argv = self
            .detector
            .command_for(&frame.path().to_string_lossy());
        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .status()
            .with_context(|| format!("Failed to run {} detector {}", self.name, argv[0]))?;
        Ok(self.presence.accepts(status.success()))
    }
}

/// Checks in order, stopping at the first rejection. An empty predicate accepts everything.
#[derive(Default)]
pub struct Predicate {
    checks: Vec<Box<dyn Check>>,
}

impl Predicate {
    pub fn new(checks: Vec<Box<dyn Check>>) -> Self {
        Self { checks }
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }
}

impl Check for Predicate {
    fn name(&self) -> &'static str {
        "predicate"
    }

    fn accept(&self, candidate: &Candidate) -> Result<bool> {
        for check in &self.checks {
            if !check.accept(candidate)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Which checks are enabled and how they are tuned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSettings {
    pub dark: Option<Presence>,
    pub cuts: Option<Presence>,
    pub cuts_threshold: f64,
    pub pace: Option<Pace>,
    pub pace_threshold: f64,
    pub pace_rate: f64,
    pub face: Option<Presence>,
    pub face_command: Option<String>,
    pub text: Option<Presence>,
    pub text_command: Option<String>,
    /// Kinds listed here run first, in this order; the rest follow in the default order.
    pub order: Vec<FilterKind>,
}

impl FilterSettings {
    fn enabled(&self, kind: FilterKind) -> bool {
        match kind {
            FilterKind::Dark => self.dark.is_some(),
            FilterKind::Cuts => self.cuts.is_some(),
            FilterKind::Pace => self.pace.is_some(),
            FilterKind::Face => self.face.is_some(),
            FilterKind::Text => self.text.is_some(),
        }
    }

    pub fn ordered_kinds(&self) -> Vec<FilterKind> {
        let mut kinds: Vec<FilterKind> = Vec::new();
        for kind in self.order.iter().chain(FilterKind::DEFAULT_ORDER.iter()) {
            if self.enabled(*kind) && !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds
    }

    fn detector(name: &str, command: &Option<String>) -> Result<CommandDetector> {
        match command {
            Some(command) => CommandDetector::parse(command),
            None => bail!("The {name} filter needs a detector command (filters.{name}_command)"),
        }
    }

    pub fn build(&self) -> Result<Predicate> {
        let mut checks: Vec<Box<dyn Check>> = Vec::new();
        for kind in self.ordered_kinds() {
            let check: Box<dyn Check> = match kind {
                FilterKind::Dark => Box::new(DarkCheck {
                    presence: self.dark.unwrap_or(Presence::Exclude),
                }),
                FilterKind::Cuts => Box::new(CutsCheck {
                    presence: self.cuts.unwrap_or(Presence::Exclude),
                    threshold: self.cuts_threshold,
                }),
                FilterKind::Pace => Box::new(PaceCheck {
                    pace: self.pace.unwrap_or(Pace::Fast),
                    threshold: self.pace_threshold,
                    rate: self.pace_rate,
                }),
                FilterKind::Face => Box::new(DetectorCheck {
                    name: "face",
                    presence: self.face.unwrap_or(Presence::Include),
                    detector: Self::detector("face", &self.face_command)?,
                }),
                FilterKind::Text => Box::new(DetectorCheck {
                    name: "text",
                    presence: self.text.unwrap_or(Presence::Exclude),
                    detector: Self::detector("text", &self.text_command)?,
                }),
            };
            checks.push(check);
        }
        Ok(Predicate::new(checks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        verdict: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Check for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn accept(&self, _candidate: &Candidate) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }
    }

    #[test]
    fn predicate_short_circuits_on_first_rejection() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let predicate = Predicate::new(vec![
            Box::new(Counting {
                verdict: false,
                calls: first.clone(),
            }),
            Box::new(Counting {
                verdict: true,
                calls: second.clone(),
            }),
        ]);
        let candidate = Candidate::new("a.mp4", 0.0, 1.0);
        assert!(!predicate.accept(&candidate).unwrap());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert!(Predicate::default().accept(&candidate).unwrap());
    }

    #[test]
    fn custom_order_comes_first() {
        let settings = FilterSettings {
            dark: Some(Presence::Exclude),
            cuts: Some(Presence::Exclude),
            pace: Some(Pace::Slow),
            order: vec![FilterKind::Pace, FilterKind::Text],
            ..FilterSettings::default()
        };
        assert_eq!(
            settings.ordered_kinds(),
            vec![FilterKind::Pace, FilterKind::Dark, FilterKind::Cuts]
        );
        assert_eq!(settings.build().unwrap().names(), vec!["pace", "dark", "cuts"]);
    }

    #[test]
    fn detector_filters_need_a_command() {
        let settings = FilterSettings {
            face: Some(Presence::Include),
            ..FilterSettings::default()
        };
        assert!(settings.build().is_err());

        let settings = FilterSettings {
            face: Some(Presence::Include),
            face_command: Some("detect-faces --min 1".into()),
            ..FilterSettings::default()
        };
        assert_eq!(settings.build().unwrap().names(), vec!["face"]);
    }

    #[test]
    fn presence_and_pace_verdicts() {
        assert!(Presence::Exclude.accepts(false));
        assert!(!Presence::Exclude.accepts(true));
        assert!(Presence::Include.accepts(true));
        assert!(is_fast(5, 20.0, 0.2));
        assert!(!is_fast(3, 20.0, 0.2));
        assert!(!is_fast(3, 0.0, 0.2));
    }

    #[test]
    fn analysis_window_uses_candidate_bounds() {
        let args = Candidate::new("clip.mp4", 1.5, 4.0).analysis_args("blackframe".into());
        assert_eq!(&args[..6], ["-ss", "1.500", "-to", "4.000", "-i", "clip.mp4"]);
        assert_eq!(args.last().unwrap(), "-");
    }
}
