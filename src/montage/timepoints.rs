//! Boundary derivation: raw feature or cut points become the target intervals of a store.
//!
//! Policies apply in a fixed order: truncate, joint-decimate, split, max-interval subdivide,
//! min-interval merge. The result always starts at 0 and ends at the (possibly truncated)
//! total, strictly increasing.

use super::mapping::Mapping;

/// Values closer than this are treated as the same boundary.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryPolicy {
    /// Cut the timeline at this length.
    pub max_length: Option<f64>,
    /// Keep every Nth boundary.
    pub joints: usize,
    /// Split every interval into N equal pieces.
    pub splits: usize,
    /// Subdivide intervals longer than this.
    pub max_interval: Option<f64>,
    /// Merge boundaries closer than this.
    pub min_interval: Option<f64>,
}

pub fn derive_boundaries(raw: &[f64], total: f64, policy: &BoundaryPolicy) -> Vec<f64> {
    let end = match policy.max_length {
        Some(max) if max > 0.0 && max < total => max,
        _ => total,
    };
    if !(end > 0.0) {
        return Vec::new();
    }

    let mut points: Vec<f64> = raw
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0 && *p < end)
        .collect();
    points.push(0.0);
    points.push(end);
    normalize(&mut points);

    if policy.joints > 1 {
        points = decimate(&points, policy.joints);
    }
    if policy.splits > 1 {
        points = split(&points, policy.splits);
    }
    if let Some(max) = policy.max_interval.filter(|m| *m > 0.0) {
        points = subdivide(&points, max);
    }
    if let Some(min) = policy.min_interval.filter(|m| *m > 0.0) {
        points = merge_short(&points, min);
    }
    points
}

/// Consecutive boundary pairs as target-only mappings.
pub fn intervals_from_boundaries(boundaries: &[f64]) -> Vec<Mapping> {
    boundaries
        .windows(2)
        .map(|pair| Mapping::target_only(pair[0], pair[1]))
        .collect()
}

fn normalize(points: &mut Vec<f64>) {
    points.sort_by(f64::total_cmp);
    points.dedup_by(|b, a| (*b - *a).abs() < EPSILON);
}

fn decimate(points: &[f64], joints: usize) -> Vec<f64> {
    let mut kept: Vec<f64> = points.iter().copied().step_by(joints).collect();
    if let (Some(last), Some(kept_last)) = (points.last(), kept.last())
        && (last - kept_last).abs() >= EPSILON
    {
        kept.push(*last);
    }
    kept
}

fn split(points: &[f64], pieces: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len() * pieces);
    for pair in points.windows(2) {
        let step = (pair[1] - pair[0]) / pieces as f64;
        for j in 0..pieces {
            out.push(pair[0] + step * j as f64);
        }
    }
    out.extend(points.last());
    normalize(&mut out);
    out
}

fn subdivide(points: &[f64], max: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len());
    for pair in points.windows(2) {
        let length = pair[1] - pair[0];
        let pieces = ((length - EPSILON) / max).ceil().max(1.0) as usize;
        let step = length / pieces as f64;
        for j in 0..pieces {
            out.push(pair[0] + step * j as f64);
        }
    }
    out.extend(points.last());
    normalize(&mut out);
    out
}

/// Greedy left-to-right scan. The anchor starts at the first point; an interior point survives
/// only when it is at least `min` past the anchor and at least `min` before the end, and a
/// surviving point becomes the new anchor.
fn merge_short(points: &[f64], min: f64) -> Vec<f64> {
    let (Some(&first), Some(&last)) = (points.first(), points.last()) else {
        return Vec::new();
    };
    if points.len() < 2 {
        return points.to_vec();
    }

    let mut out = vec![first];
    let mut anchor = first;
    for &candidate in &points[1..points.len() - 1] {
        if candidate - anchor >= min - EPSILON && last - candidate >= min - EPSILON {
            out.push(candidate);
            anchor = candidate;
        }
    }
    out.push(last);
    out
}

/// Snap a point to the nearest of the sorted `cuts`.
pub fn snap_to_nearest(point: f64, cuts: &[f64]) -> f64 {
    let index = cuts.partition_point(|c| *c <= point);
    match (index.checked_sub(1).map(|i| cuts[i]), cuts.get(index)) {
        (Some(before), Some(after)) => {
            if (point - before).abs() > (after - point).abs() {
                *after
            } else {
                before
            }
        }
        (Some(before), None) => before,
        (None, Some(after)) => *after,
        (None, None) => point,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_strictly_increasing(points: &[f64]) {
        for pair in points.windows(2) {
            assert!(pair[1] > pair[0], "not increasing: {points:?}");
        }
    }

    #[test]
    fn unions_raw_points_with_both_ends() {
        let raw = [3.0, 1.0, 1.0, 2.0, 12.0, -1.0, f64::NAN];
        let points = derive_boundaries(&raw, 10.0, &BoundaryPolicy::default());
        assert_eq!(points, vec![0.0, 1.0, 2.0, 3.0, 10.0]);
    }

    #[test]
    fn derivation_is_pure() {
        let raw = [0.4, 1.3, 2.2, 2.9, 4.1, 5.5, 7.25, 9.0];
        let policy = BoundaryPolicy {
            max_length: Some(8.0),
            joints: 2,
            splits: 3,
            max_interval: Some(1.0),
            min_interval: Some(0.3),
        };
        let a = derive_boundaries(&raw, 10.0, &policy);
        let b = derive_boundaries(&raw, 10.0, &policy);
        assert_eq!(a, b);
        assert_eq!(a.first(), Some(&0.0));
        assert_eq!(a.last(), Some(&8.0));
        assert_strictly_increasing(&a);
    }

    #[test]
    fn truncation_ends_at_max_length() {
        let policy = BoundaryPolicy {
            max_length: Some(2.5),
            ..Default::default()
        };
        assert_eq!(
            derive_boundaries(&[1.0, 2.0, 3.0], 5.0, &policy),
            vec![0.0, 1.0, 2.0, 2.5]
        );
    }

    #[test]
    fn joints_keep_every_nth_and_the_end() {
        let policy = BoundaryPolicy {
            joints: 2,
            ..Default::default()
        };
        assert_eq!(
            derive_boundaries(&[1.0, 2.0, 3.0], 4.0, &policy),
            vec![0.0, 2.0, 4.0]
        );
        assert_eq!(
            derive_boundaries(&[1.0, 2.0], 3.0, &policy),
            vec![0.0, 2.0, 3.0]
        );
    }

    #[test]
    fn splits_divide_each_interval() {
        let policy = BoundaryPolicy {
            splits: 2,
            ..Default::default()
        };
        assert_eq!(
            derive_boundaries(&[2.0], 6.0, &policy),
            vec![0.0, 1.0, 2.0, 4.0, 6.0]
        );
    }

    #[test]
    fn max_interval_bounds_every_gap() {
        let policy = BoundaryPolicy {
            max_interval: Some(1.5),
            ..Default::default()
        };
        let points = derive_boundaries(&[1.0], 5.0, &policy);
        for pair in points.windows(2) {
            assert!(pair[1] - pair[0] <= 1.5 + 1e-9);
        }
        assert_eq!(points.first(), Some(&0.0));
        assert_eq!(points.last(), Some(&5.0));
    }

    #[test]
    fn min_interval_merges_greedily() {
        let policy = BoundaryPolicy {
            min_interval: Some(1.0),
            ..Default::default()
        };
        let points = derive_boundaries(&[0.5, 1.2, 1.8, 2.5, 9.5], 10.0, &policy);
        assert_eq!(points, vec![0.0, 1.2, 2.5, 10.0]);
    }

    #[test]
    fn min_interval_invariant_holds_for_dense_points() {
        let raw: Vec<f64> = (1..200).map(|i| i as f64 * 0.137).collect();
        let policy = BoundaryPolicy {
            min_interval: Some(0.5),
            ..Default::default()
        };
        let points = derive_boundaries(&raw, 30.0, &policy);
        for pair in points.windows(2) {
            assert!(pair[1] - pair[0] >= 0.5 - 1e-9, "{pair:?}");
        }
    }

    #[test]
    fn short_total_keeps_only_the_endpoints() {
        let policy = BoundaryPolicy {
            min_interval: Some(5.0),
            ..Default::default()
        };
        let points = derive_boundaries(&[1.0, 2.0], 3.0, &policy);
        assert_eq!(points, vec![0.0, 3.0]);
        assert_eq!(intervals_from_boundaries(&points).len(), 1);
    }

    #[test]
    fn empty_timeline_yields_no_intervals() {
        let points = derive_boundaries(&[], 0.0, &BoundaryPolicy::default());
        assert!(points.is_empty());
        assert!(intervals_from_boundaries(&points).is_empty());
    }

    #[test]
    fn snapping_picks_the_nearest_cut() {
        let cuts = [0.0, 4.0, 10.0];
        assert_eq!(snap_to_nearest(1.0, &cuts), 0.0);
        assert_eq!(snap_to_nearest(3.0, &cuts), 4.0);
        assert_eq!(snap_to_nearest(12.0, &cuts), 10.0);
        assert_eq!(snap_to_nearest(-1.0, &cuts), 0.0);
        assert_eq!(snap_to_nearest(5.0, &[]), 5.0);
    }
}
