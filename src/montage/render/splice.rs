//! Delta computation and concat-demuxer directives for splicing re-rendered mappings into an
//! existing output.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::montage::mapping::{Mapping, format_mapping};

#[derive(Debug, Clone, PartialEq)]
pub enum ConcatPart {
    /// A whole file, typically a per-mapping cache clip.
    Whole(PathBuf),
    /// `[inpoint, outpoint]` of an existing file.
    Excerpt {
        path: PathBuf,
        inpoint: f64,
        outpoint: f64,
    },
}

impl ConcatPart {
    pub fn path(&self) -> &Path {
        match self {
            ConcatPart::Whole(path) | ConcatPart::Excerpt { path, .. } => path,
        }
    }

    /// The concat demuxer resolves relative entries against the list file, not the cwd.
    pub fn absolute(&self) -> Result<ConcatPart> {
        let path = std::path::absolute(self.path())
            .with_context(|| format!("Failed to resolve {}", self.path().display()))?;
        Ok(match self {
            ConcatPart::Whole(_) => ConcatPart::Whole(path),
            ConcatPart::Excerpt {
                inpoint, outpoint, ..
            } => ConcatPart::Excerpt {
                path,
                inpoint: *inpoint,
                outpoint: *outpoint,
            },
        })
    }
}

/// Indices of `current` whose mapping does not appear in `previous`, comparing rows at
/// millisecond granularity, in target order.
pub fn changed_indices(current: &[Mapping], previous: &[Mapping]) -> Vec<usize> {
    let before: HashSet<String> = previous.iter().map(format_mapping).collect();
    let mut changed: Vec<usize> = current
        .iter()
        .enumerate()
        .filter(|(_, m)| !before.contains(&format_mapping(m)))
        .map(|(i, _)| i)
        .collect();
    changed.sort_by(|a, b| current[*a].target.start.total_cmp(&current[*b].target.start));
    changed
}

/// Each maximal unchanged run becomes an excerpt of `whole`; each changed mapping contributes
/// its cache clip. `cache(i)` names the clip of the mapping at index `i`.
pub fn build_splice(
    current: &[Mapping],
    changed: &[usize],
    whole: &Path,
    mixed_offset: f64,
    cache: impl Fn(usize) -> PathBuf,
) -> Vec<ConcatPart> {
    let changed: HashSet<usize> = changed.iter().copied().collect();
    let mut parts = Vec::new();
    let mut run_start: Option<usize> = None;

    for i in 0..=current.len() {
        if i == current.len() || changed.contains(&i) {
            if let Some(first) = run_start.take() {
                parts.push(ConcatPart::Excerpt {
                    path: whole.to_path_buf(),
                    inpoint: current[first].target.start,
                    outpoint: current[i - 1].target.final_ + mixed_offset,
                });
            }
            if i < current.len() {
                parts.push(ConcatPart::Whole(cache(i)));
            }
        } else if run_start.is_none() {
            run_start = Some(i);
        }
    }

    parts
}

fn quote(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

/// Concat demuxer list text.
pub fn concat_list(parts: &[ConcatPart]) -> String {
    let mut list = String::new();
    for part in parts {
        list.push_str(&format!("file '{}'\n", quote(part.path())));
        if let ConcatPart::Excerpt {
            inpoint, outpoint, ..
        } = part
        {
            list.push_str(&format!("inpoint {inpoint:.6}\noutpoint {outpoint:.6}\n"));
        }
    }
    list
}
