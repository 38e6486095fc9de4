use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::splice::{ConcatPart, build_splice, changed_indices};
use super::{
    Canvas, ClipRequest, MuxRequest, OutputLayout, OutputSink, Quality, Renderer,
    TimelineInput, TimelineRequest,
};
use crate::montage::effects::{TimeRemap, source_span};
use crate::montage::logging::log_event;
use crate::montage::mapping::{Mapping, Resource, is_complete};
use crate::montage::sources::MediaCache;
use crate::ui::prelude::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyMode {
    /// One multi-input transcode of the whole timeline.
    Reencode,
    /// Per-mapping cache clips joined without re-encoding.
    Increment,
    /// Cache clips spliced into the previous output.
    Mixed,
}

impl AssemblyMode {
    pub fn from_flags(reencode: bool, increment: bool) -> Self {
        match (reencode, increment) {
            (true, true) => AssemblyMode::Mixed,
            (false, true) => AssemblyMode::Increment,
            _ => AssemblyMode::Reencode,
        }
    }

    pub fn uses_cache(self) -> bool {
        !matches!(self, AssemblyMode::Reencode)
    }
}

#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub mode: AssemblyMode,
    pub layout: OutputLayout,
    /// Requested sinks; empty means the whole-output file.
    pub sinks: Vec<OutputSink>,
    pub audio: Option<PathBuf>,
    pub max_length: Option<f64>,
    pub canvas: Option<Canvas>,
    pub quality: Quality,
    pub reencode_offset: f64,
    pub increment_offset: f64,
    pub mixed_offset: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyOutcome {
    /// Some mapping has no source yet; nothing was rendered.
    Incomplete,
    /// The output already reflects every mapping.
    Unchanged,
    Written,
}

pub struct Assembler<'a> {
    renderer: &'a dyn Renderer,
    media: &'a MediaCache,
    remap: &'a dyn TimeRemap,
    options: &'a AssemblyOptions,
}

impl<'a> Assembler<'a> {
    pub fn new(
        renderer: &'a dyn Renderer,
        media: &'a MediaCache,
        remap: &'a dyn TimeRemap,
        options: &'a AssemblyOptions,
    ) -> Self {
        Self {
            renderer,
            media,
            remap,
            options,
        }
    }

    pub fn options(&self) -> &AssemblyOptions {
        self.options
    }

    /// Cache clip path of the mapping at 0-based `index`.
    pub fn cache_path(&self, index: usize) -> PathBuf {
        self.options.layout.cache(index + 1)
    }

    /// Render the source interval of `mapping` into its cache clip.
    pub fn render_cache(&self, index: usize, mapping: &Mapping) -> Result<PathBuf> {
        let Resource::Resolved { id, start, final_ } = &mapping.source else {
            return Err(anyhow!("mapping {} has no source to cache", index + 1));
        };
        let handle = self.media.resolve(id)?;
        let output = self.cache_path(index);
        self.renderer.render_clip(&ClipRequest {
            url: handle.playable_url,
            start: *start,
            duration: final_ - start + self.options.increment_offset,
            output: output.clone(),
            canvas: self.options.canvas,
            quality: self.options.quality,
        })?;
        Ok(output)
    }

    /// Render the cache clip if it is missing. Returns whether a render happened.
    pub fn ensure_cache(&self, index: usize, mapping: &Mapping) -> Result<bool> {
        if self.cache_path(index).is_file() {
            return Ok(false);
        }
        self.render_cache(index, mapping)?;
        Ok(true)
    }

    /// Produce the output for `current`; `previous` is the store as it was loaded, used by
    /// the mixed mode to find what changed.
    pub fn assemble(&self, current: &[Mapping], previous: &[Mapping]) -> Result<AssemblyOutcome> {
        if current.is_empty() || !is_complete(current) {
            log_event(
                Level::Warn,
                "montage.assemble.incomplete",
                "Mappings are incomplete; skipping assembly",
            );
            return Ok(AssemblyOutcome::Incomplete);
        }

        match self.options.mode {
            AssemblyMode::Reencode => self.reencode(current),
            AssemblyMode::Increment => {
                self.ensure_caches(current)?;
                let parts: Vec<ConcatPart> = (0..current.len())
                    .map(|i| ConcatPart::Whole(self.cache_path(i)))
                    .collect();
                self.concat_and_mux(current, &parts)
            }
            AssemblyMode::Mixed => self.mixed(current, previous),
        }
    }

    fn length(&self, current: &[Mapping]) -> f64 {
        let end = current.last().map(|m| m.target.final_).unwrap_or(0.0);
        match self.options.max_length {
            Some(max) if max > 0.0 => max.min(end),
            _ => end,
        }
    }

    fn reencode(&self, current: &[Mapping]) -> Result<AssemblyOutcome> {
        let mut inputs = Vec::with_capacity(current.len());
        for mapping in current {
            let Resource::Resolved { id, start, .. } = &mapping.source else {
                continue;
            };
            let handle = self.media.resolve(id)?;
            let span = source_span(self.remap, mapping.target.start, mapping.target.final_);
            inputs.push(TimelineInput {
                url: handle.playable_url,
                start: *start,
                duration: (span + self.options.reencode_offset).max(0.0),
            });
        }

        let sinks = if self.options.sinks.is_empty() {
            vec![OutputSink::File(self.options.layout.whole())]
        } else {
            self.options.sinks.clone()
        };

        log_event(
            Level::Info,
            "montage.assemble.reencode",
            format!("Re-encoding {} mapping(s)", inputs.len()),
        );
        self.renderer.render_timeline(&TimelineRequest {
            inputs,
            audio: self.options.audio.clone(),
            length: self.length(current),
            canvas: self.options.canvas,
            effect: self.remap.filter(),
            quality: self.options.quality,
            format: self.options.layout.format().to_string(),
            sinks,
        })?;
        Ok(AssemblyOutcome::Written)
    }

    fn mixed(&self, current: &[Mapping], previous: &[Mapping]) -> Result<AssemblyOutcome> {
        self.ensure_caches(current)?;
        let whole = self.options.layout.whole();

        if !whole.is_file() {
            log_event(
                Level::Info,
                "montage.assemble.seed",
                "No previous output; joining every cache clip",
            );
            let parts: Vec<ConcatPart> = (0..current.len())
                .map(|i| ConcatPart::Whole(self.cache_path(i)))
                .collect();
            return self.concat_and_mux(current, &parts);
        }

        let changed = changed_indices(current, previous);
        if changed.is_empty() {
            log_event(
                Level::Info,
                "montage.assemble.unchanged",
                "Output is up to date",
            );
            return Ok(AssemblyOutcome::Unchanged);
        }

        log_event(
            Level::Info,
            "montage.assemble.splice",
            format!("Splicing {} changed mapping(s)", changed.len()),
        );
        let parts = build_splice(current, &changed, &whole, self.options.mixed_offset, |i| {
            self.cache_path(i)
        });
        self.concat_and_mux(current, &parts)
    }

    fn ensure_caches(&self, current: &[Mapping]) -> Result<()> {
        for (index, mapping) in current.iter().enumerate() {
            if self.ensure_cache(index, mapping)? {
                log_event(
                    Level::Debug,
                    "montage.assemble.cache",
                    format!("Rendered missing cache clip {}", index + 1),
                );
            }
        }
        Ok(())
    }

    fn concat_and_mux(&self, current: &[Mapping], parts: &[ConcatPart]) -> Result<AssemblyOutcome> {
        let intermediate = self.options.layout.intermediate();
        self.renderer.concat_lossless(parts, &intermediate)?;

        let whole = self.options.layout.whole();
        let mut sinks = vec![OutputSink::File(whole.clone())];
        sinks.extend(
            self.options
                .sinks
                .iter()
                .filter(|s| **s != OutputSink::File(whole.clone()))
                .cloned(),
        );

        self.renderer.mux(&MuxRequest {
            video: intermediate.clone(),
            audio: self.options.audio.clone(),
            length: self.length(current),
            format: self.options.layout.format().to_string(),
            sinks,
        })?;

        remove_if_exists(&intermediate)?;
        Ok(AssemblyOutcome::Written)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
