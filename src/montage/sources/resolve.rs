use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

use super::VideoHandle;
use crate::montage::error::MontageError;
use crate::montage::mapping::is_url;
use crate::montage::render::probe_duration;
use crate::montage::timestamp::parse_timestamp;
use crate::ui::prelude::*;

/// yt-dlp stderr fragments that mean "this item is gone", not "the tool is broken".
const UNAVAILABLE_MARKERS: &[&str] = &[
    "This video",
    "requested format not available",
    "YouTube said:",
    "Video unavailable",
];

pub trait MediaResolver: Send + Sync {
    /// `Ok(None)` means the identifier is well formed but nothing playable was found.
    fn resolve(&self, identifier: &str) -> Result<Option<VideoHandle>>;
}

/// Format preferences passed to the remote resolver.
#[derive(Debug, Clone, Default)]
pub struct VideoConstraints {
    pub format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoConstraints {
    /// yt-dlp format selector, e.g. `bestvideo[ext=mp4][height=1080]`.
    pub fn format_filter(&self) -> String {
        let mut filter = "bestvideo".to_string();
        if let Some(format) = &self.format {
            filter.push_str(&format!("[ext={format}]"));
        }
        if let Some(width) = self.width {
            filter.push_str(&format!("[width={width}]"));
        }
        if let Some(height) = self.height {
            filter.push_str(&format!("[height={height}]"));
        }
        filter
    }
}

/// Local files are probed with ffprobe; platform URLs go through yt-dlp; other URLs are
/// probed directly.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver {
    pub constraints: VideoConstraints,
}

impl SystemResolver {
    pub fn new(constraints: VideoConstraints) -> Self {
        Self { constraints }
    }

    fn resolve_platform_url(&self, url: &str) -> Result<Option<VideoHandle>> {
        let output = Command::new("yt-dlp")
            .args([
                "--quiet",
                "--no-warnings",
                "--get-url",
                "--get-duration",
                "-f",
                &self.constraints.format_filter(),
                "--youtube-skip-dash-manifest",
                url,
            ])
            .output()
            .with_context(|| format!("Failed to run yt-dlp for {url}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if UNAVAILABLE_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Ok(None);
            }
            return Err(MontageError::resolution(url, stderr.trim().to_string()).into());
        }

        Ok(parse_url_duration_pairs(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl MediaResolver for SystemResolver {
    fn resolve(&self, identifier: &str) -> Result<Option<VideoHandle>> {
        if Path::new(identifier).is_file() {
            let duration = probe_duration(Path::new(identifier))?;
            return Ok(Some(VideoHandle {
                playable_url: identifier.to_string(),
                duration,
            }));
        }

        if !is_url(identifier) {
            return Ok(None);
        }

        if is_platform_url(identifier) {
            return self.resolve_platform_url(identifier);
        }

        match probe_duration(Path::new(identifier)) {
            Ok(duration) => Ok(Some(VideoHandle {
                playable_url: identifier.to_string(),
                duration,
            })),
            Err(err) => {
                emit(
                    Level::Debug,
                    "montage.sources.probe_failed",
                    &format!("{identifier}: {err:#}"),
                    None,
                );
                Ok(None)
            }
        }
    }
}

fn is_platform_url(url: &str) -> bool {
    url.contains("youtube.com") || url.contains("youtu.be")
}

/// yt-dlp prints the URL and the duration on alternating lines; take the first usable pair.
fn parse_url_duration_pairs(stdout: &str) -> Option<VideoHandle> {
    let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines.chunks(2).find_map(|pair| match pair {
        [url, duration] => parse_timestamp(duration).ok().map(|duration| VideoHandle {
            playable_url: url.to_string(),
            duration,
        }),
        _ => None,
    })
}

fn is_playlist_item(item: &str) -> bool {
    (is_url(item) && item.contains("youtube.com/playlist"))
        || item.starts_with("ytsearch")
        || item.starts_with("ytdl://ytsearch")
}

/// Replace playlist URLs and `ytsearch` queries with the video URLs they list.
pub fn expand_playlists(items: &[String]) -> Result<Vec<String>> {
    let mut expanded = Vec::with_capacity(items.len());
    for item in items {
        if !is_playlist_item(item) {
            expanded.push(item.clone());
            continue;
        }
        let query = item.strip_prefix("ytdl://").unwrap_or(item);
        let output = Command::new("yt-dlp")
            .args([
                "--quiet",
                "--no-warnings",
                "--get-title",
                "--get-id",
                "--flat-playlist",
                query,
            ])
            .output()
            .with_context(|| format!("Failed to run yt-dlp for {query}"))?;
        if !output.status.success() {
            return Err(MontageError::resolution(
                query,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into());
        }
        let videos = parse_flat_playlist(&String::from_utf8_lossy(&output.stdout), query);
        emit(
            Level::Info,
            "montage.sources.playlist",
            &format!("{query}: {} video(s)", videos.len()),
            None,
        );
        expanded.extend(videos);
    }
    Ok(expanded)
}

/// Title and id alternate. Search results keep only titles containing every query word.
fn parse_flat_playlist(stdout: &str, query: &str) -> Vec<String> {
    let words: Vec<String> = if query.starts_with("ytsearch") {
        query
            .split_once(':')
            .map(|(_, q)| q.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let lines: Vec<&str> = stdout.lines().collect();
    lines
        .chunks(2)
        .filter_map(|pair| match pair {
            [title, id] => {
                let title = title.to_lowercase();
                words
                    .iter()
                    .all(|w| title.contains(w.as_str()))
                    .then(|| format!("http://youtu.be/{}", id.trim()))
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_filter_includes_constraints() {
        let constraints = VideoConstraints {
            format: Some("mp4".into()),
            width: None,
            height: Some(1080),
        };
        assert_eq!(constraints.format_filter(), "bestvideo[ext=mp4][height=1080]");
        assert_eq!(VideoConstraints::default().format_filter(), "bestvideo");
    }

    #[test]
    fn takes_first_url_duration_pair() {
        let handle = parse_url_duration_pairs("https://cdn/x.mp4\n3:05\nhttps://cdn/y\n10\n").unwrap();
        assert_eq!(handle.playable_url, "https://cdn/x.mp4");
        assert_eq!(handle.duration, 185.0);
        assert!(parse_url_duration_pairs("https://cdn/x.mp4\n").is_none());
    }

    #[test]
    fn search_results_filter_on_query_words() {
        let stdout = "Night Sky Timelapse\nabc\nDaytime clouds\ndef\nSKY at night 4k\nghi\n";
        assert_eq!(
            parse_flat_playlist(stdout, "ytsearch10:night sky"),
            vec!["http://youtu.be/abc", "http://youtu.be/ghi"]
        );
        assert_eq!(
            parse_flat_playlist(stdout, "https://youtube.com/playlist?list=PL1").len(),
            3
        );
    }

    #[test]
    fn recognises_playlist_items() {
        assert!(is_playlist_item("https://youtube.com/playlist?list=PL1"));
        assert!(is_playlist_item("ytsearch5:flowers"));
        assert!(is_playlist_item("ytdl://ytsearch:flowers"));
        assert!(!is_playlist_item("clip.mp4"));
    }

    #[test]
    fn patterns_resolve_to_nothing() {
        let resolver = SystemResolver::default();
        assert!(resolver.resolve("^clip-[0-9]+").unwrap().is_none());
    }
}
