use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use super::Mapping;
use crate::montage::error::MontageError;
use crate::montage::timestamp::{format_timestamp, parse_timestamp};

/// Mirror target boundaries as numbered subtitle cues.
pub fn write_subtitles(path: &Path, mappings: &[Mapping]) -> Result<()> {
    let mut out = String::new();
    for (index, mapping) in mappings.iter().enumerate() {
        let n = index + 1;
        out.push_str(&format!(
            "{n}\n{} --> {}\n{n}\n\n",
            format_timestamp(mapping.target.start),
            format_timestamp(mapping.target.final_),
        ));
    }
    fs::write(path, out).with_context(|| format!("writing subtitles to {}", path.display()))
}

/// Read cue timings from an SRT or WebVTT file as target-only mappings.
pub fn read_subtitles(path: &Path) -> Result<Vec<Mapping>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading subtitles from {}", path.display()))?;
    parse_subtitles(&contents).map_err(|(line, message)| MontageError::parse(path, line, message).into())
}

fn parse_subtitles(contents: &str) -> std::result::Result<Vec<Mapping>, (usize, String)> {
    let mut mappings = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let Some((start_raw, rest)) = line.split_once("-->") else {
            continue;
        };
        // WebVTT cue settings may follow the end timestamp.
        let end_raw = rest.split_whitespace().next().unwrap_or_default();
        let start = parse_timestamp(start_raw).map_err(|e| (index + 1, e.to_string()))?;
        let end = parse_timestamp(end_raw).map_err(|e| (index + 1, e.to_string()))?;
        if end <= start {
            return Err((index + 1, format!("cue ends before it starts: {}", line.trim())));
        }
        mappings.push(Mapping::target_only(start, end));
    }
    mappings.sort_by(|a, b| a.target.start.total_cmp(&b.target.start));
    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::montage::mapping::{Interval, Resource};

    #[test]
    fn export_uses_one_based_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.srt");
        let mappings = vec![
            Mapping::target_only(0.0, 1.5).with_source(Resource::resolved("a", 3.0, 4.5)),
            Mapping::target_only(1.5, 3.0),
        ];
        write_subtitles(&path, &mappings).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1\n00:00:00.000 --> 00:00:01.500\n1\n\n2\n00:00:01.500 --> 00:00:03.000\n2\n\n"
        );
    }

    #[test]
    fn imports_srt_and_vtt_cues() {
        let srt = "1\n00:00:01,000 --> 00:00:03,500\nHello\n\n2\n00:00:04,000 --> 00:00:05,000\nBye\n";
        let mappings = parse_subtitles(srt).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].target, Interval::new(1.0, 3.5));
        assert_eq!(mappings[1].source, Resource::Unset);

        let vtt = "WEBVTT\n\n00:01.000 --> 00:02.000 align:start position:0%\ntext\n";
        let mappings = parse_subtitles(vtt).unwrap();
        assert_eq!(mappings[0].target, Interval::new(1.0, 2.0));
    }

    #[test]
    fn rejects_backwards_cues() {
        let err = parse_subtitles("1\n00:00:05.000 --> 00:00:01.000\n").unwrap_err();
        assert_eq!(err.0, 2);
    }
}
