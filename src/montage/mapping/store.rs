use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tempfile::NamedTempFile;

use super::subtitles::write_subtitles;
use super::{Interval, Mapping, Resource};
use crate::montage::error::MontageError;
use crate::montage::timestamp::{format_timestamp, parse_timestamp};

/// Read a mapping file. A missing file is an empty store, not an error.
pub fn load(path: &Path) -> Result<Vec<Mapping>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading mappings from {}", path.display()))?;

    let mut mappings = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mapping = parse_mapping(line)
            .map_err(|message| MontageError::parse(path, index + 1, message))?;
        mappings.push(mapping);
    }
    Ok(mappings)
}

/// Write every mapping, replacing the file in one rename so readers never see half a store.
pub fn save(path: &Path, mappings: &[Mapping]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("creating mapping directory {}", dir.display()))?;

    let mut file = NamedTempFile::new_in(&dir)
        .with_context(|| format!("creating temporary mapping file in {}", dir.display()))?;
    for mapping in mappings {
        file.write_all(format_mapping(mapping).as_bytes())
            .context("writing mapping row")?;
    }
    file.flush().context("flushing mapping file")?;
    file.persist(path)
        .map_err(|e| anyhow!(e.error))
        .with_context(|| format!("replacing mapping file {}", path.display()))?;
    Ok(())
}

pub fn is_complete(mappings: &[Mapping]) -> bool {
    mappings.iter().all(|m| m.source.is_resolved())
}

/// Parse one row: `target_start, target_final[, source_id[, source_start[, source_final]]]`.
///
/// Fields are tab separated; rows without any tab fall back to whitespace separation.
pub fn parse_mapping(line: &str) -> std::result::Result<Mapping, String> {
    let fields: Vec<&str> = if line.contains('\t') {
        line.split('\t').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    };

    if fields.len() < 2 {
        return Err("expected at least target start and target final".to_string());
    }
    if fields.len() > 5 {
        return Err(format!("expected at most 5 fields, found {}", fields.len()));
    }

    let field_time = |idx: usize, name: &str| {
        parse_timestamp(fields[idx]).map_err(|e| format!("{name}: {e}"))
    };

    let target = Interval::new(field_time(0, "target start")?, field_time(1, "target final")?);
    if target.final_ <= target.start {
        return Err(format!(
            "target final {} is not after target start {}",
            fields[1], fields[0]
        ));
    }

    let source = match fields.get(2) {
        None => Resource::Unset,
        Some(id) => {
            validate_source_id(id)?;
            match fields.get(3) {
                None => Resource::Partial {
                    id: id.to_string(),
                },
                Some(_) => {
                    let start = field_time(3, "source start")?;
                    let final_ = match fields.get(4) {
                        Some(_) => field_time(4, "source final")?,
                        None => start + target.duration(),
                    };
                    if final_ <= start {
                        return Err(format!(
                            "source final is not after source start for '{id}'"
                        ));
                    }
                    Resource::resolved(*id, start, final_)
                }
            }
        }
    };

    Ok(Mapping { target, source })
}

/// A source identifier must name an existing file, a URL, or a compilable pattern.
fn validate_source_id(id: &str) -> std::result::Result<(), String> {
    if id.is_empty() {
        return Err("empty source identifier".to_string());
    }
    if Path::new(id).is_file() || is_url(id) || Regex::new(id).is_ok() {
        return Ok(());
    }
    Err(format!("invalid source identifier \"{id}\""))
}

pub(crate) fn is_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| u.has_host())
        .unwrap_or(false)
}

pub fn format_mapping(mapping: &Mapping) -> String {
    let mut fields = vec![
        format_timestamp(mapping.target.start),
        format_timestamp(mapping.target.final_),
    ];
    match &mapping.source {
        Resource::Unset => {}
        Resource::Partial { id } => fields.push(id.clone()),
        Resource::Resolved { id, start, final_ } => {
            fields.push(id.clone());
            fields.push(format_timestamp(*start));
            fields.push(format_timestamp(*final_));
        }
    }
    let mut row = fields.join("\t");
    row.push('\n');
    row
}

/// The mapping sequence shared by the acceptance workers.
///
/// Every write goes through `update`, which holds the lock while the whole file is rewritten,
/// so concurrent workers never interleave partial saves.
pub struct MappingStore {
    path: PathBuf,
    subtitles: Option<PathBuf>,
    inner: Mutex<Vec<Mapping>>,
}

impl MappingStore {
    pub fn new(path: impl Into<PathBuf>, mappings: Vec<Mapping>) -> Self {
        Self {
            path: path.into(),
            subtitles: None,
            inner: Mutex::new(mappings),
        }
    }

    /// Also mirror target boundaries to a subtitle file on every save.
    pub fn with_subtitles(mut self, path: Option<PathBuf>) -> Self {
        self.subtitles = path;
        self
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mappings = load(&path)?;
        Ok(Self::new(path, mappings))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Mapping>>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("mapping store lock poisoned"))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<Mapping> {
        self.lock()?
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("mapping index {index} out of range"))
    }

    pub fn snapshot(&self) -> Result<Vec<Mapping>> {
        Ok(self.lock()?.clone())
    }

    pub fn is_complete(&self) -> Result<bool> {
        Ok(is_complete(&self.lock()?))
    }

    /// Write one mapping and persist the whole store before releasing the lock.
    pub fn update(&self, index: usize, mapping: Mapping) -> Result<()> {
        let mut guard = self.lock()?;
        let slot = guard
            .get_mut(index)
            .ok_or_else(|| anyhow!("mapping index {index} out of range"))?;
        *slot = mapping;
        self.write_locked(&guard)
    }

    pub fn replace_all(&self, mappings: Vec<Mapping>) -> Result<()> {
        let mut guard = self.lock()?;
        *guard = mappings;
        self.write_locked(&guard)
    }

    pub fn persist(&self) -> Result<()> {
        let guard = self.lock()?;
        self.write_locked(&guard)
    }

    fn write_locked(&self, mappings: &[Mapping]) -> Result<()> {
        save(&self.path, mappings)?;
        if let Some(subtitles) = &self.subtitles {
            write_subtitles(subtitles, mappings)?;
        }
        Ok(())
    }
}
