//! Source interval selection for a single mapping.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use lazy_static::lazy_static;
use rand::Rng;
use rand::rngs::StdRng;
use regex::Regex;

use super::{PoolEntry, SourcePool};
use crate::montage::error::MontageError;
use crate::montage::mapping::{Mapping, Resource};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionMode {
    /// Weighted random source, uniform position.
    Random,
    /// Walk through the sources roughly in step with the target timeline.
    Chronological { speed: f64, scope: f64 },
}

impl SelectionMode {
    pub fn is_chronological(&self) -> bool {
        matches!(self, SelectionMode::Chronological { .. })
    }
}

pub struct SourceSelector<'a> {
    pool: &'a SourcePool,
    mode: SelectionMode,
    total_mappings: usize,
}

/// Usable ranges of one source for a given duration, addressed as one virtual line made of
/// the placeable part (`length - d`) of each range.
struct Placement {
    ranges: Vec<(f64, f64)>,
    duration: f64,
}

impl Placement {
    fn new(ranges: Vec<(f64, f64)>, duration: f64) -> Self {
        Self { ranges, duration }
    }

    fn placeable(&self) -> f64 {
        self.ranges
            .iter()
            .map(|(s, f)| (f - s - self.duration).max(0.0))
            .sum()
    }

    fn usable(&self) -> f64 {
        self.ranges.iter().map(|(s, f)| f - s).sum()
    }

    /// Map a virtual offset back onto a real start position.
    fn to_real(&self, mut offset: f64) -> f64 {
        for (start, final_) in &self.ranges {
            let room = (final_ - start - self.duration).max(0.0);
            if offset <= room {
                return (start + offset).clamp(*start, final_ - self.duration);
            }
            offset -= room;
        }
        self.ranges
            .last()
            .map(|(_, f)| f - self.duration)
            .unwrap_or(0.0)
    }

    /// Virtual offset of a real start position; positions outside every range snap forward.
    fn to_virtual(&self, position: f64) -> f64 {
        let mut acc = 0.0;
        for (start, final_) in &self.ranges {
            let room = (final_ - start - self.duration).max(0.0);
            if position < *start {
                return acc;
            }
            if position <= start + room {
                return acc + (position - start);
            }
            acc += room;
        }
        acc
    }
}

lazy_static! {
    /// Compiled constraint patterns; `None` marks a constraint that is not a valid pattern.
    static ref CONSTRAINT_PATTERNS: RwLock<HashMap<String, Option<Regex>>> =
        RwLock::new(HashMap::new());
}

fn constraint_pattern(constraint: &str) -> Option<Regex> {
    if let Ok(patterns) = CONSTRAINT_PATTERNS.read()
        && let Some(pattern) = patterns.get(constraint)
    {
        return pattern.clone();
    }
    let pattern = Regex::new(&format!("^(?:{constraint})")).ok();
    if let Ok(mut patterns) = CONSTRAINT_PATTERNS.write() {
        patterns.insert(constraint.to_string(), pattern.clone());
    }
    pattern
}

/// A constraint matches an identifier literally or as a pattern anchored at its start.
struct IdFilter<'c> {
    literal: &'c str,
    pattern: Option<Regex>,
}

impl<'c> IdFilter<'c> {
    fn new(constraint: &'c str) -> Self {
        Self {
            literal: constraint,
            pattern: constraint_pattern(constraint),
        }
    }

    fn matches(&self, id: &str) -> bool {
        self.literal == id || self.pattern.as_ref().is_some_and(|re| re.is_match(id))
    }
}

impl<'a> SourceSelector<'a> {
    pub fn new(pool: &'a SourcePool, mode: SelectionMode, total_mappings: usize) -> Self {
        Self {
            pool,
            mode,
            total_mappings: total_mappings.max(1),
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Keep an already chosen source whose identifier is still in the pool; the target
    /// duration is authoritative, so `final` is recomputed from `start`.
    pub fn revalidate(&self, mapping: &Mapping) -> Option<Resource> {
        match &mapping.source {
            Resource::Resolved { id, start, .. } if self.pool.contains(id) => {
                Some(Resource::resolved(id.clone(), *start, start + mapping.duration()))
            }
            _ => None,
        }
    }

    /// Constraint carried by a mapping's current source, if any.
    pub fn constraint_of(mapping: &Mapping) -> Option<&str> {
        match &mapping.source {
            Resource::Partial { id } => Some(id),
            _ => None,
        }
    }

    /// Draw a fresh source interval of the mapping's duration.
    ///
    /// `earlier` holds the mappings before `index`; chronological mode reads it to keep
    /// progress monotonic within a source and ignores it otherwise.
    pub fn select(
        &self,
        index: usize,
        mapping: &Mapping,
        constraint: Option<&str>,
        earlier: &[Mapping],
        rng: &mut StdRng,
    ) -> Result<Resource> {
        let duration = mapping.duration();
        let filter = constraint.map(IdFilter::new);
        let candidates: Vec<(&PoolEntry, Placement)> = self
            .pool
            .entries()
            .iter()
            .filter(|e| filter.as_ref().is_none_or(|f| f.matches(&e.id)))
            .map(|e| (e, Placement::new(self.pool.usable_ranges(e, duration), duration)))
            .filter(|(_, p)| !p.ranges.is_empty())
            .collect();

        if candidates.is_empty() {
            return Err(MontageError::NoSourceAvailable {
                duration,
                constraint: constraint.map(str::to_string),
            }
            .into());
        }

        let (entry, placement) = match self.mode {
            SelectionMode::Random => pick_weighted(candidates, rng),
            SelectionMode::Chronological { .. } => {
                let slot = index % candidates.len();
                candidates.into_iter().nth(slot).ok_or_else(|| {
                    MontageError::NoSourceAvailable {
                        duration,
                        constraint: constraint.map(str::to_string),
                    }
                })?
            }
        };

        let offset = match self.mode {
            SelectionMode::Random => {
                let room = placement.placeable();
                if room > 0.0 { rng.gen_range(0.0..=room) } else { 0.0 }
            }
            SelectionMode::Chronological { speed, scope } => {
                let floor = earlier
                    .iter()
                    .rev()
                    .find_map(|m| match &m.source {
                        Resource::Resolved { id, final_, .. } if *id == entry.id => Some(*final_),
                        _ => None,
                    })
                    .map(|position| placement.to_virtual(position));
                self.chronological_offset(index, &placement, speed, scope, floor, rng)
            }
        };

        let start = placement.to_real(offset);
        Ok(Resource::resolved(entry.id.clone(), start, start + duration))
    }

    /// Window of `scope` × placeable length centred on an anchor that advances with the mapping
    /// index, never earlier than where this source was last used while the window still has
    /// room past that point.
    fn chronological_offset(
        &self,
        index: usize,
        placement: &Placement,
        speed: f64,
        scope: f64,
        floor: Option<f64>,
        rng: &mut StdRng,
    ) -> f64 {
        let room = placement.placeable();
        if room <= 0.0 {
            return 0.0;
        }
        let progress = index as f64 / self.total_mappings as f64;
        let anchor = (progress * speed.max(0.0) * room) % room;
        let half = scope.clamp(0.0, 1.0) * room / 2.0;

        let mut lo = (anchor - half).max(0.0);
        let hi = (anchor + half).min(room);
        // once the last use leaves less than one clip of window, start over from its beginning
        if let Some(floor) = floor
            && floor < hi - placement.duration
        {
            lo = lo.max(floor);
        }
        if lo >= hi {
            return lo.min(room);
        }
        rng.gen_range(lo..=hi)
    }
}

fn pick_weighted<'p>(
    candidates: Vec<(&'p PoolEntry, Placement)>,
    rng: &mut StdRng,
) -> (&'p PoolEntry, Placement) {
    let total: f64 = candidates.iter().map(|(_, p)| p.usable()).sum();
    let mut point = if total > 0.0 { rng.gen_range(0.0..total) } else { 0.0 };
    let last = candidates.len() - 1;
    for (i, candidate) in candidates.into_iter().enumerate() {
        point -= candidate.1.usable();
        if point <= 0.0 || i == last {
            return candidate;
        }
    }
    unreachable!("candidate list is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::montage::sources::{InputRestrictions, SourceRange};
    use rand::SeedableRng;

    fn pool(entries: &[(&str, f64)], restrictions: InputRestrictions) -> SourcePool {
        SourcePool::new(
            entries
                .iter()
                .map(|(id, duration)| PoolEntry {
                    id: id.to_string(),
                    duration: *duration,
                })
                .collect(),
            restrictions,
        )
    }

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn selected_interval_matches_target_duration() {
        let pool = pool(&[("a", 60.0), ("b", 10.0), ("c", 3.0)], InputRestrictions::default());
        let selector = SourceSelector::new(&pool, SelectionMode::Random, 10);
        let mapping = Mapping::target_only(1.25, 5.0);

        for seed in 0..200 {
            let source = selector
                .select(0, &mapping, None, &[], &mut rng(seed))
                .unwrap();
            let (start, final_) = source.bounds().unwrap();
            assert!((final_ - start - 3.75).abs() < 1e-6);
            assert_ne!(source.id(), Some("c"), "source shorter than the target");
            assert!(start >= 0.0);
            let limit = if source.id() == Some("a") { 60.0 } else { 10.0 };
            assert!(final_ <= limit + 1e-9);
        }
    }

    #[test]
    fn selection_is_reproducible_for_a_seed() {
        let pool = pool(&[("a", 60.0), ("b", 40.0)], InputRestrictions::default());
        let selector = SourceSelector::new(&pool, SelectionMode::Random, 4);
        let mapping = Mapping::target_only(0.0, 2.0);
        let first = selector.select(3, &mapping, None, &[], &mut rng(42)).unwrap();
        let second = selector.select(3, &mapping, None, &[], &mut rng(42)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn constraint_filters_identifiers() {
        let pool = pool(
            &[("intro.mp4", 30.0), ("clip-1.mp4", 30.0), ("clip-2.mp4", 30.0)],
            InputRestrictions::default(),
        );
        let selector = SourceSelector::new(&pool, SelectionMode::Random, 1);
        let mapping = Mapping::target_only(0.0, 1.0);
        for seed in 0..50 {
            let source = selector
                .select(0, &mapping, Some("clip-"), &[], &mut rng(seed))
                .unwrap();
            assert!(source.id().unwrap().starts_with("clip-"));
        }
        let literal = selector
            .select(0, &mapping, Some("intro.mp4"), &[], &mut rng(1))
            .unwrap();
        assert_eq!(literal.id(), Some("intro.mp4"));
    }

    #[test]
    fn unmatched_or_too_short_sources_fail() {
        let pool = pool(&[("a", 2.0)], InputRestrictions::default());
        let selector = SourceSelector::new(&pool, SelectionMode::Random, 1);

        let err = selector
            .select(0, &Mapping::target_only(0.0, 5.0), None, &[], &mut rng(0))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MontageError>(),
            Some(MontageError::NoSourceAvailable { .. })
        ));

        let err = selector
            .select(0, &Mapping::target_only(0.0, 1.0), Some("zzz"), &[], &mut rng(0))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MontageError>(),
            Some(MontageError::NoSourceAvailable { .. })
        ));
    }

    #[test]
    fn restricted_sources_stay_inside_their_ranges() {
        let mut restrictions = InputRestrictions::default();
        restrictions.push("a", SourceRange::new(Some(10.0), Some(12.0)));
        restrictions.push("a", SourceRange::new(Some(50.0), Some(60.0)));
        restrictions.push("a", SourceRange::new(Some(70.0), Some(71.0)));
        let pool = pool(&[("a", 100.0)], restrictions);
        let selector = SourceSelector::new(&pool, SelectionMode::Random, 1);
        let mapping = Mapping::target_only(0.0, 1.5);

        for seed in 0..300 {
            let (start, final_) = selector
                .select(0, &mapping, None, &[], &mut rng(seed))
                .unwrap()
                .bounds()
                .unwrap();
            let inside = (start >= 10.0 && final_ <= 12.0 + 1e-9)
                || (start >= 50.0 && final_ <= 60.0 + 1e-9);
            assert!(inside, "{start}..{final_} escapes the ranges");
        }
    }

    #[test]
    fn revalidation_keeps_start_and_fixes_final() {
        let pool = pool(&[("a", 60.0)], InputRestrictions::default());
        let selector = SourceSelector::new(&pool, SelectionMode::Random, 1);

        let kept = Mapping::target_only(0.0, 2.0).with_source(Resource::resolved("a", 7.0, 12.0));
        assert_eq!(
            selector.revalidate(&kept),
            Some(Resource::resolved("a", 7.0, 9.0))
        );

        let dropped = Mapping::target_only(0.0, 2.0).with_source(Resource::resolved("gone", 7.0, 9.0));
        assert_eq!(selector.revalidate(&dropped), None);
    }

    #[test]
    fn chronological_mode_progresses_through_a_source() {
        let pool = pool(&[("a", 600.0)], InputRestrictions::default());
        let count = 20;
        let selector = SourceSelector::new(
            &pool,
            SelectionMode::Chronological {
                speed: 1.0,
                scope: 0.1,
            },
            count,
        );

        let mut mappings: Vec<Mapping> = (0..count)
            .map(|i| Mapping::target_only(i as f64 * 2.0, i as f64 * 2.0 + 2.0))
            .collect();
        for i in 0..count {
            let mut r = rng(i as u64);
            let source = selector
                .select(i, &mappings[i], None, &mappings[..i], &mut r)
                .unwrap();
            mappings[i].source = source;
        }

        let starts: Vec<f64> = mappings
            .iter()
            .map(|m| m.source.bounds().unwrap().0)
            .collect();
        for pair in starts.windows(2) {
            assert!(pair[1] >= pair[0], "went backwards: {starts:?}");
        }
        for m in &mappings {
            let (s, f) = m.source.bounds().unwrap();
            assert!((f - s - 2.0).abs() < 1e-6);
            assert!(f <= 600.0 + 1e-9);
        }
    }

    #[test]
    fn chronological_mode_round_robins_sources() {
        let pool = pool(&[("a", 60.0), ("b", 60.0), ("c", 60.0)], InputRestrictions::default());
        let selector = SourceSelector::new(
            &pool,
            SelectionMode::Chronological {
                speed: 1.0,
                scope: 1.0,
            },
            6,
        );
        let ids: Vec<String> = (0..6)
            .map(|i| {
                selector
                    .select(i, &Mapping::target_only(0.0, 1.0), None, &[], &mut rng(0))
                    .unwrap()
                    .id()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn virtual_offsets_map_back_into_ranges() {
        let placement = Placement::new(vec![(10.0, 14.0), (20.0, 30.0)], 2.0);
        assert_eq!(placement.placeable(), 10.0);
        assert_eq!(placement.to_real(0.0), 10.0);
        assert_eq!(placement.to_real(2.0), 12.0);
        assert_eq!(placement.to_real(3.0), 21.0);
        assert_eq!(placement.to_real(10.0), 28.0);
        assert_eq!(placement.to_virtual(21.0), 3.0);
        assert_eq!(placement.to_virtual(15.0), 2.0);
    }

    #[test]
    fn long_chronological_runs_never_repeat_an_interval() {
        let pool = pool(&[("a", 300.0)], InputRestrictions::default());
        let count = 100;
        let selector = SourceSelector::new(
            &pool,
            SelectionMode::Chronological {
                speed: 1.0,
                scope: 1.0,
            },
            count,
        );

        let mut mappings: Vec<Mapping> = (0..count)
            .map(|i| Mapping::target_only(i as f64 * 2.0, i as f64 * 2.0 + 2.0))
            .collect();
        for i in 0..count {
            let source = selector
                .select(i, &mappings[i], None, &mappings[..i], &mut rng(i as u64))
                .unwrap();
            mappings[i].source = source;
        }

        let starts: Vec<f64> = mappings
            .iter()
            .map(|m| m.source.bounds().unwrap().0)
            .collect();
        for (i, a) in starts.iter().enumerate() {
            assert!(*a >= 0.0 && a + 2.0 <= 300.0 + 1e-9);
            for b in &starts[i + 1..] {
                assert_ne!(a, b, "interval at {a} used twice");
            }
        }
        // the source was used up and selection started over
        assert!(starts.windows(2).any(|w| w[1] < w[0]));
    }

    #[test]
    fn constraint_patterns_are_compiled_once_and_reused() {
        let filter = IdFilter::new("clip-[0-9]");
        assert!(filter.matches("clip-1.mp4"));
        assert!(!filter.matches("intro.mp4"));
        assert!(
            CONSTRAINT_PATTERNS
                .read()
                .unwrap()
                .get("clip-[0-9]")
                .is_some_and(Option::is_some)
        );

        // an invalid pattern is remembered as such and only matches literally
        let broken = IdFilter::new("bad(");
        assert!(broken.matches("bad("));
        assert!(!broken.matches("bad(1"));
        assert!(
            CONSTRAINT_PATTERNS
                .read()
                .unwrap()
                .get("bad(")
                .is_some_and(Option::is_none)
        );
    }
}
