//! Per-mapping source acceptance: propose, optionally render, judge, retry or give up.
//!
//! Each mapping runs through an explicit state machine. Workers pull mapping indices from a
//! shared counter; every accepted mapping is written back and persisted immediately, so an
//! interrupted run resumes from the saved store.

mod filters;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use rand::SeedableRng;
use rand::rngs::StdRng;

pub use self::filters::{
    Candidate, Check, CutsCheck, DarkCheck, DetectorCheck, FilterKind, FilterSettings, Pace,
    PaceCheck, Presence, Predicate,
};
use super::logging::log_event;
use super::mapping::{Mapping, MappingStore, Resource};
use super::render::Assembler;
use super::sources::{MediaCache, SourceSelector};
use crate::common::progress::create_mapping_bar;
use crate::ui::prelude::Level;

pub const DEFAULT_RETRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Predicate runs per mapping before the last candidate is forced through. Zero accepts
    /// the first candidate without judging it.
    pub retries: usize,
    pub threads: usize,
    pub seed: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            threads: 1,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Unresolved,
    Proposed { source: Resource },
    Accepted { source: Resource, forced: bool },
}

/// How a single mapping was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Its stored source was still valid and unchanged.
    Kept,
    Accepted { proposals: usize },
    /// The retry budget ran out and the last candidate was taken.
    Forced { proposals: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub kept: usize,
    pub accepted: usize,
    pub forced: usize,
    pub proposals: usize,
}

impl LoopReport {
    fn record(&mut self, settlement: Settlement) {
        match settlement {
            Settlement::Kept => self.kept += 1,
            Settlement::Accepted { proposals } => {
                self.accepted += 1;
                self.proposals += proposals;
            }
            Settlement::Forced { proposals } => {
                self.forced += 1;
                self.proposals += proposals;
            }
        }
    }
}

fn mapping_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

pub struct AcceptanceLoop<'a> {
    store: &'a MappingStore,
    selector: &'a SourceSelector<'a>,
    predicate: &'a dyn Check,
    media: &'a MediaCache,
    /// Present in incremental modes: candidates are rendered into their cache clip and judged
    /// from there.
    assembler: Option<&'a Assembler<'a>>,
    settings: LoopSettings,
}

impl<'a> AcceptanceLoop<'a> {
    pub fn new(
        store: &'a MappingStore,
        selector: &'a SourceSelector<'a>,
        predicate: &'a dyn Check,
        media: &'a MediaCache,
        assembler: Option<&'a Assembler<'a>>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            store,
            selector,
            predicate,
            media,
            assembler,
            settings,
        }
    }

    fn workers(&self) -> usize {
        if self.selector.mode().is_chronological() {
            1
        } else {
            self.settings.threads.max(1)
        }
    }

    /// Settle every mapping. The first error stops all workers and is returned.
    pub fn run(&self) -> Result<LoopReport> {
        let total = self.store.len()?;
        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let failure: Mutex<Option<anyhow::Error>> = Mutex::new(None);
        let report: Mutex<LoopReport> = Mutex::new(LoopReport::default());
        let pb = create_mapping_bar(total);

        std::thread::scope(|scope| {
            for _ in 0..self.workers().min(total.max(1)) {
                scope.spawn(|| {
                    while !abort.load(Ordering::SeqCst) {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        if index >= total {
                            break;
                        }
                        match self.settle(index) {
                            Ok(settlement) => {
                                if let Ok(mut report) = report.lock() {
                                    report.record(settlement);
                                }
                                pb.inc(1);
                            }
                            Err(err) => {
                                abort.store(true, Ordering::SeqCst);
                                if let Ok(mut slot) = failure.lock()
                                    && slot.is_none()
                                {
                                    *slot = Some(err.context(format!("mapping {}", index + 1)));
                                }
                            }
                        }
                    }
                });
            }
        });

        pb.finish_and_clear();
        if let Some(err) = failure
            .into_inner()
            .map_err(|_| anyhow!("acceptance failure slot poisoned"))?
        {
            return Err(err);
        }
        report
            .into_inner()
            .map_err(|_| anyhow!("acceptance report poisoned"))
    }

    /// Run one mapping to acceptance.
    pub fn settle(&self, index: usize) -> Result<Settlement> {
        let mapping = self.store.get(index)?;
        let mut rng = StdRng::seed_from_u64(mapping_seed(self.settings.seed, index));

        let mut constraint = SourceSelector::constraint_of(&mapping).map(str::to_string);
        let mut state = match self.selector.revalidate(&mapping) {
            Some(source) if source == mapping.source => {
                self.ensure_cache(index, &mapping)?;
                return Ok(Settlement::Kept);
            }
            Some(source) => {
                constraint = source.id().map(regex::escape);
                State::Proposed { source }
            }
            None => State::Unresolved,
        };

        let mut proposals = 0;
        let mut rendered = false;
        loop {
            state = match state {
                State::Unresolved => {
                    let earlier: Vec<Mapping> = if self.selector.mode().is_chronological() {
                        self.store.snapshot()?.into_iter().take(index).collect()
                    } else {
                        Vec::new()
                    };
                    let source = self.selector.select(
                        index,
                        &mapping,
                        constraint.as_deref(),
                        &earlier,
                        &mut rng,
                    )?;
                    State::Proposed { source }
                }
                State::Proposed { source } => {
                    proposals += 1;
                    if self.settings.retries == 0 {
                        State::Accepted {
                            source,
                            forced: false,
                        }
                    } else {
                        let candidate = mapping.clone().with_source(source.clone());
                        rendered = self.assembler.is_some();
                        if self.judge(index, &candidate)? {
                            State::Accepted {
                                source,
                                forced: false,
                            }
                        } else if proposals >= self.settings.retries {
                            State::Accepted {
                                source,
                                forced: true,
                            }
                        } else {
                            log_event(
                                Level::Debug,
                                "montage.accept.retry",
                                format!("Mapping {} rejected, retrying", index + 1),
                            );
                            State::Unresolved
                        }
                    }
                }
                State::Accepted { source, forced } => {
                    let accepted = mapping.clone().with_source(source);
                    // a judged candidate already left its render in the cache clip
                    if !rendered && let Some(assembler) = self.assembler {
                        assembler.render_cache(index, &accepted)?;
                    }
                    self.store.update(index, accepted)?;
                    return Ok(if forced {
                        log_event(
                            Level::Warn,
                            "montage.accept.exhausted",
                            format!(
                                "Mapping {} kept after {proposals} rejected candidate(s)",
                                index + 1
                            ),
                        );
                        Settlement::Forced { proposals }
                    } else {
                        Settlement::Accepted { proposals }
                    });
                }
            };
        }
    }

    fn ensure_cache(&self, index: usize, mapping: &Mapping) -> Result<()> {
        if let Some(assembler) = self.assembler {
            assembler.ensure_cache(index, mapping)?;
        }
        Ok(())
    }

    /// Judge a candidate, from its freshly rendered cache clip when incremental.
    fn judge(&self, index: usize, candidate: &Mapping) -> Result<bool> {
        let Resource::Resolved { id, start, final_ } = &candidate.source else {
            return Ok(false);
        };
        let subject = match self.assembler {
            Some(assembler) => {
                let clip = assembler.render_cache(index, candidate)?;
                Candidate::new(clip.to_string_lossy(), 0.0, candidate.duration())
            }
            None => Candidate::new(self.media.resolve(id)?.playable_url, *start, *final_),
        };
        self.predicate.accept(&subject)
    }
}
