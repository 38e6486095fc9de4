//! Source media: the lazily resolved handle cache, the pool selection draws from, and the
//! selector itself.

mod resolve;
mod restrictions;
mod selector;

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Result, anyhow};

pub use self::resolve::{MediaResolver, SystemResolver, VideoConstraints, expand_playlists};
pub use self::restrictions::{InputRestrictions, SourceRange};
pub use self::selector::{SelectionMode, SourceSelector};

use super::error::MontageError;
use crate::ui::prelude::*;

/// A playable location for a source identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoHandle {
    pub playable_url: String,
    pub duration: f64,
}

/// Identifier → handle cache shared by every worker.
///
/// Lookups take the read lock. A miss resolves outside any lock and then inserts; two workers
/// racing on the same identifier both resolve and the second insert overwrites an equal value.
pub struct MediaCache {
    resolver: Box<dyn MediaResolver>,
    handles: RwLock<HashMap<String, VideoHandle>>,
}

impl MediaCache {
    pub fn new(resolver: Box<dyn MediaResolver>) -> Self {
        Self {
            resolver,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, identifier: &str) -> Result<Option<VideoHandle>> {
        Ok(self
            .handles
            .read()
            .map_err(|_| anyhow!("media cache lock poisoned"))?
            .get(identifier)
            .cloned())
    }

    pub fn insert(&self, identifier: impl Into<String>, handle: VideoHandle) -> Result<()> {
        self.handles
            .write()
            .map_err(|_| anyhow!("media cache lock poisoned"))?
            .insert(identifier.into(), handle);
        Ok(())
    }

    /// Resolve or fail with `ResolutionFailure`.
    pub fn resolve(&self, identifier: &str) -> Result<VideoHandle> {
        self.try_resolve(identifier)?.ok_or_else(|| {
            MontageError::resolution(identifier, "media is unavailable").into()
        })
    }

    /// Resolve, treating "not available" as `None` for speculative lookups.
    pub fn try_resolve(&self, identifier: &str) -> Result<Option<VideoHandle>> {
        if let Some(handle) = self.get(identifier)? {
            return Ok(Some(handle));
        }
        let Some(handle) = self.resolver.resolve(identifier)? else {
            return Ok(None);
        };
        self.insert(identifier, handle.clone())?;
        Ok(Some(handle))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolEntry {
    pub id: String,
    pub duration: f64,
}

/// The ordered set of sources a build may draw from, with their allowed sub-ranges.
#[derive(Debug, Clone, Default)]
pub struct SourcePool {
    entries: Vec<PoolEntry>,
    restrictions: InputRestrictions,
}

impl SourcePool {
    pub fn new(entries: Vec<PoolEntry>, restrictions: InputRestrictions) -> Self {
        Self {
            entries,
            restrictions,
        }
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Allowed `(start, final)` ranges of a source, at least `min_length` long.
    pub fn usable_ranges(&self, entry: &PoolEntry, min_length: f64) -> Vec<(f64, f64)> {
        self.restrictions
            .ranges_for(&entry.id, entry.duration)
            .into_iter()
            .filter(|(start, final_)| final_ - start >= min_length)
            .collect()
    }
}

/// Resolve every pool item concurrently. Unavailable items are skipped with a warning.
pub fn build_pool(
    items: &[String],
    cache: &MediaCache,
    restrictions: InputRestrictions,
) -> Result<SourcePool> {
    let resolved: Vec<Result<Option<VideoHandle>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = items
            .iter()
            .map(|item| scope.spawn(move || cache.try_resolve(item)))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(anyhow!("source resolution thread panicked")))
            })
            .collect()
    });

    let mut entries = Vec::new();
    for (item, result) in items.iter().zip(resolved) {
        let result = match result {
            Err(err)
                if matches!(
                    err.downcast_ref::<MontageError>(),
                    Some(MontageError::Resolution { .. })
                ) =>
            {
                emit(
                    Level::Warn,
                    "montage.sources.unresolved",
                    &format!("Skipping {item}: {err}"),
                    None,
                );
                continue;
            }
            other => other?,
        };
        match result {
            Some(handle) => {
                if entries.iter().any(|e: &PoolEntry| e.id == *item) {
                    continue;
                }
                emit(
                    Level::Debug,
                    "montage.sources.resolved",
                    &format!("{item}: {:.3}s", handle.duration),
                    None,
                );
                entries.push(PoolEntry {
                    id: item.clone(),
                    duration: handle.duration,
                });
            }
            None => emit(
                Level::Warn,
                "montage.sources.unavailable",
                &format!("Skipping unavailable source {item}"),
                None,
            ),
        }
    }

    Ok(SourcePool::new(entries, restrictions))
}
