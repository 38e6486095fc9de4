//! Timestamp parsing and formatting for mapping and subtitle files.
//!
//! Accepted forms: float seconds (`12.5`), `MM:SS[.fff]` and `HH:MM:SS[.fff]`, with `,`
//! allowed as the fractional separator. A leading minutes component of 60 or more in the
//! two-part form is folded into hours, so `75:30` reads as `1:15:30`.

use anyhow::Result;

use super::error::MontageError;

pub fn parse_timestamp(value: &str) -> Result<f64> {
    let trimmed = value.trim();
    let invalid = || MontageError::Timestamp(value.to_string());

    if trimmed.is_empty() {
        return Err(invalid().into());
    }

    if !trimmed.contains(':') {
        let seconds: f64 = trimmed.replace(',', ".").parse().map_err(|_| invalid())?;
        if !seconds.is_finite() {
            return Err(invalid().into());
        }
        return Ok(seconds);
    }

    let cleaned = trimmed.replace(',', ".");
    let parts: Vec<&str> = cleaned.split(':').collect();

    let (hours, minutes, seconds_part) = match parts.as_slice() {
        [m, s] => {
            let m = parse_component(m).ok_or_else(invalid)?;
            (m / 60, m % 60, *s)
        }
        [h, m, s] => {
            let h = parse_component(h).ok_or_else(invalid)?;
            let m = parse_component(m).ok_or_else(invalid)?;
            if m >= 60 {
                return Err(invalid().into());
            }
            (h, m, *s)
        }
        _ => return Err(invalid().into()),
    };

    let seconds = parse_seconds(seconds_part).ok_or_else(invalid)?;
    Ok((hours * 3600 + minutes * 60) as f64 + seconds)
}

fn parse_component(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_seconds(value: &str) -> Option<f64> {
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    let whole = parse_component(whole)?;
    if whole >= 60 {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let fraction = if fraction.is_empty() {
        0.0
    } else {
        format!("0.{fraction}").parse::<f64>().ok()?
    };
    Some(whole as f64 + fraction)
}

/// Format seconds as `HH:MM:SS.mmm`, rounding to the nearest millisecond.
pub fn format_timestamp(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let millis = total_millis % 1000;
    let total_seconds = total_millis / 1000;
    let secs = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = total_seconds / 3600;
    format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}

/// Round to millisecond precision, the granularity at which timestamps survive a save.
pub fn to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn parses_float_seconds() {
        assert!(close(parse_timestamp("12.25").unwrap(), 12.25));
        assert!(close(parse_timestamp("90").unwrap(), 90.0));
    }

    #[test]
    fn parses_clock_forms() {
        assert!(close(parse_timestamp("00:01:02.500").unwrap(), 62.5));
        assert!(close(parse_timestamp("01:02.5").unwrap(), 62.5));
        assert!(close(parse_timestamp("00:00:03,250").unwrap(), 3.25));
        assert!(close(parse_timestamp("1:00:00").unwrap(), 3600.0));
    }

    #[test]
    fn folds_large_minutes_into_hours() {
        assert!(close(parse_timestamp("75:30").unwrap(), 75.0 * 60.0 + 30.0));
        assert!(close(parse_timestamp("75:30.100").unwrap(), 4530.1));
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "abc", "1:2:3:4", "00:61:00", "00:00:75", "1:-2", "1:2.x"] {
            assert!(parse_timestamp(bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn formats_with_millisecond_precision() {
        assert_eq!(format_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_timestamp(62.5), "00:01:02.500");
        assert_eq!(format_timestamp(3725.0004), "01:02:05.000");
        assert_eq!(format_timestamp(59.9996), "00:01:00.000");
    }

    #[test]
    fn formatted_values_parse_back() {
        for value in [0.0, 0.042, 61.25, 4530.1, 7322.999] {
            let back = parse_timestamp(&format_timestamp(value)).unwrap();
            assert_eq!(to_millis(back), to_millis(value));
        }
    }
}
