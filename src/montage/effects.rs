//! Timeline-wide time remapping applied to the assembled video.
//!
//! `forward` maps source time to output time (what the ffmpeg `setpts` expression does);
//! `inverse` answers how much source material a stretch of output needs, which the
//! re-encode trims per mapping.

use std::f64::consts::PI;

const INVERSE_TOLERANCE: f64 = 1e-3;
const INVERSE_MAX_ITERATIONS: usize = 64;

pub trait TimeRemap: Send + Sync {
    fn forward(&self, t: f64) -> f64;
    fn inverse(&self, t: f64) -> f64;
    /// Filter applied to the concatenated stream, `None` for no-op remaps.
    fn filter(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl TimeRemap for Identity {
    fn forward(&self, t: f64) -> f64 {
        t
    }

    fn inverse(&self, t: f64) -> f64 {
        t
    }

    fn filter(&self) -> Option<String> {
        None
    }
}

/// Periodic cosine speed ramp. Within each period playback accelerates from a standstill to
/// double the mean rate and back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedRamp {
    p: f64,
}

impl SpeedRamp {
    /// One ramp per `interval` seconds of output.
    pub fn from_interval(interval: f64) -> Option<Self> {
        (interval.is_finite() && interval > 0.0).then(|| Self { p: 2.0 / interval })
    }

    /// One ramp every `freq` beats at `bpm`.
    pub fn from_tempo(bpm: f64, freq: f64) -> Option<Self> {
        if !(bpm > 0.0 && freq > 0.0) {
            return None;
        }
        Self::from_interval(60.0 / bpm / freq)
    }

    fn linear_inverse(&self, t: f64) -> f64 {
        // forward grows by 2/p every PI/p of input
        t * PI / 2.0
    }
}

impl TimeRemap for SpeedRamp {
    fn forward(&self, t: f64) -> f64 {
        let x0 = t * self.p + PI / 2.0;
        let phase = x0.rem_euclid(PI);
        (2.0 * (x0 - phase) / PI - phase.cos()) / self.p
    }

    fn inverse(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        let slack = PI / self.p;
        let mut lo = 0.0;
        let mut hi = self.linear_inverse(t) + slack;
        if self.forward(hi) < t {
            return self.linear_inverse(t);
        }
        for _ in 0..INVERSE_MAX_ITERATIONS {
            let mid = (lo + hi) / 2.0;
            if self.forward(mid) < t {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo <= INVERSE_TOLERANCE {
                return (lo + hi) / 2.0;
            }
        }
        self.linear_inverse(t)
    }

    /// `p` is written at full precision so the filter and `inverse` remap with the same rate.
    fn filter(&self) -> Option<String> {
        let p = self.p;
        Some(format!(
            "setpts='(2*(T*{p}+PI/2-mod(T*{p}+PI/2,PI))/PI-cos(mod(T*{p}+PI/2,PI)))/{p}/TB'"
        ))
    }
}

/// Source duration needed to fill `[start, final_]` of the output.
pub fn source_span(remap: &dyn TimeRemap, start: f64, final_: f64) -> f64 {
    remap.inverse(final_) - remap.inverse(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_covers_one_interval_per_half_period() {
        let ramp = SpeedRamp::from_interval(2.0).unwrap();
        assert!(ramp.forward(0.0).abs() < 1e-12);
        // one half period of input (PI/p) yields exactly one interval of output
        let half_period = PI / ramp.p;
        assert!((ramp.forward(half_period) - 2.0).abs() < 1e-9);
        assert!((ramp.forward(2.0 * half_period) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn ramp_is_monotonic() {
        let ramp = SpeedRamp::from_tempo(120.0, 1.0).unwrap();
        let mut previous = ramp.forward(0.0);
        for i in 1..2000 {
            let value = ramp.forward(i as f64 * 0.01);
            assert!(value >= previous - 1e-12);
            previous = value;
        }
    }

    #[test]
    fn inverse_undoes_forward_within_a_millisecond() {
        let ramp = SpeedRamp::from_tempo(96.0, 0.5).unwrap();
        for t in [0.1, 0.75, 3.3, 12.0, 61.5] {
            let back = ramp.forward(ramp.inverse(t));
            assert!((back - t).abs() < 5e-3, "{t} -> {back}");
        }
        assert_eq!(ramp.inverse(0.0), 0.0);
    }

    #[test]
    fn rejects_degenerate_tempo() {
        assert!(SpeedRamp::from_tempo(0.0, 1.0).is_none());
        assert!(SpeedRamp::from_tempo(120.0, 0.0).is_none());
        assert!(SpeedRamp::from_interval(f64::NAN).is_none());
    }

    #[test]
    fn filter_embeds_rate() {
        let ramp = SpeedRamp::from_interval(2.0).unwrap();
        let filter = ramp.filter().unwrap();
        assert!(filter.starts_with("setpts='"));
        assert!(filter.contains("T*1+PI/2"));
        assert!(Identity.filter().is_none());
    }

    #[test]
    fn identity_span_is_the_target_duration() {
        assert_eq!(source_span(&Identity, 2.0, 5.5), 3.5);
    }

    /// Evaluate the `setpts` expression the way ffmpeg would, with the rate read back from
    /// the filter text.
    fn filter_time(filter: &str, t: f64) -> f64 {
        let p: f64 = filter
            .split("T*")
            .nth(1)
            .and_then(|rest| rest.split('+').next())
            .unwrap()
            .parse()
            .unwrap();
        let x0 = t * p + PI / 2.0;
        let phase = x0 % PI;
        (2.0 * (x0 - phase) / PI - phase.cos()) / p
    }

    #[test]
    fn filter_agrees_with_inverse_over_a_long_timeline() {
        // 97 bpm gives a rate with no short decimal form
        let ramp = SpeedRamp::from_tempo(97.0, 1.0).unwrap();
        let filter = ramp.filter().unwrap();
        for t in [1.0, 60.0, 300.0, 900.0, 1800.0] {
            let shown = filter_time(&filter, ramp.inverse(t));
            assert!((shown - t).abs() < 5e-3, "{t} renders at {shown}");
        }
    }
}
