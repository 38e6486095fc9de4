use std::collections::HashMap;

use anyhow::{Context, Result, bail};

use crate::montage::timepoints::snap_to_nearest;
use crate::montage::timestamp::parse_timestamp;

/// One allowed sub-range of a source. `None` leaves that end open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRange {
    pub start: Option<f64>,
    pub final_: Option<f64>,
}

impl SourceRange {
    pub fn new(start: Option<f64>, final_: Option<f64>) -> Self {
        match (start, final_) {
            (Some(s), Some(f)) if f < s => Self {
                start: Some(f),
                final_: Some(s),
            },
            _ => Self { start, final_ },
        }
    }
}

/// Source identifier → ordered allowed sub-ranges. Sources without an entry are unrestricted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputRestrictions {
    ranges: HashMap<String, Vec<SourceRange>>,
}

impl InputRestrictions {
    pub fn push(&mut self, id: impl Into<String>, range: SourceRange) {
        self.ranges.entry(id.into()).or_default().push(range);
    }

    /// Parse `ID=START..FINAL`; either bound may be empty.
    pub fn push_arg(&mut self, arg: &str) -> Result<()> {
        let (id, range) = arg
            .rsplit_once('=')
            .with_context(|| format!("range '{arg}' must look like ID=START..FINAL"))?;
        let (start, final_) = range
            .split_once("..")
            .with_context(|| format!("range '{range}' must contain '..'"))?;
        if id.is_empty() {
            bail!("range '{arg}' is missing a source identifier");
        }
        let bound = |s: &str| -> Result<Option<f64>> {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                parse_timestamp(s).map(Some)
            }
        };
        self.push(id, SourceRange::new(bound(start)?, bound(final_)?));
        Ok(())
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &String> {
        self.ranges.keys()
    }

    /// Concrete `(start, final)` ranges inside `[0, duration]`, in the order given.
    pub fn ranges_for(&self, id: &str, duration: f64) -> Vec<(f64, f64)> {
        let Some(ranges) = self.ranges.get(id) else {
            return vec![(0.0, duration)];
        };
        ranges
            .iter()
            .map(|r| {
                let start = r.start.unwrap_or(0.0).clamp(0.0, duration);
                let final_ = r.final_.unwrap_or(duration).clamp(0.0, duration);
                (start, final_)
            })
            .filter(|(s, f)| f > s)
            .collect()
    }

    /// Move every bound of `id` onto the nearest scene cut; open bounds take the first or last cut.
    pub fn snap_to_cuts(&mut self, id: &str, cuts: &[f64]) {
        let (Some(&first), Some(&last)) = (cuts.first(), cuts.last()) else {
            return;
        };
        let Some(ranges) = self.ranges.get_mut(id) else {
            return;
        };
        for range in ranges.iter_mut() {
            range.start = Some(range.start.map_or(first, |s| snap_to_nearest(s, cuts)));
            range.final_ = Some(range.final_.map_or(last, |f| snap_to_nearest(f, cuts)));
        }
    }
}
