//! Mapping model: target-timeline intervals paired with the source media that fills them.

mod store;
mod subtitles;

pub(crate) use self::store::is_url;
pub use self::store::{MappingStore, format_mapping, is_complete, load, parse_mapping, save};
pub use self::subtitles::{read_subtitles, write_subtitles};

/// An interval on the output timeline. Always fully resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: f64,
    pub final_: f64,
}

impl Interval {
    pub fn new(start: f64, final_: f64) -> Self {
        Self { start, final_ }
    }

    pub fn duration(&self) -> f64 {
        self.final_ - self.start
    }
}

/// What is known about the source side of a mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    /// Nothing chosen yet.
    Unset,
    /// Identifier or pattern known, bounds still open.
    Partial { id: String },
    /// Fully chosen source interval.
    Resolved { id: String, start: f64, final_: f64 },
}

impl Resource {
    pub fn resolved(id: impl Into<String>, start: f64, final_: f64) -> Self {
        Self::Resolved {
            id: id.into(),
            start,
            final_,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Resource::Unset => None,
            Resource::Partial { id } | Resource::Resolved { id, .. } => Some(id),
        }
    }

    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            Resource::Resolved { start, final_, .. } => Some((*start, *final_)),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resource::Resolved { id, .. } if !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub target: Interval,
    pub source: Resource,
}

impl Mapping {
    pub fn target_only(start: f64, final_: f64) -> Self {
        Self {
            target: Interval::new(start, final_),
            source: Resource::Unset,
        }
    }

    pub fn with_source(mut self, source: Resource) -> Self {
        self.source = source;
        self
    }

    pub fn duration(&self) -> f64 {
        self.target.duration()
    }
}

/// Drop mappings that start at or after `max_length` and clip the one straddling it.
pub fn truncate_mappings(mappings: &mut Vec<Mapping>, max_length: f64) {
    mappings.retain(|m| m.target.start < max_length);
    let Some(last) = mappings.last_mut() else {
        return;
    };
    if last.target.final_ <= max_length {
        return;
    }
    last.target.final_ = max_length;
    if let Resource::Resolved { start, final_, .. } = &mut last.source {
        *final_ = *start + (max_length - last.target.start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_nonempty_resolved_sources_count() {
        assert!(!Resource::Unset.is_resolved());
        assert!(
            !Resource::Partial {
                id: "a.mp4".into()
            }
            .is_resolved()
        );
        assert!(!Resource::resolved("", 0.0, 1.0).is_resolved());
        assert!(Resource::resolved("a.mp4", 0.0, 1.0).is_resolved());
    }

    #[test]
    fn truncation_clips_last_mapping_and_its_source() {
        let mut mappings = vec![
            Mapping::target_only(0.0, 4.0).with_source(Resource::resolved("a", 10.0, 14.0)),
            Mapping::target_only(4.0, 9.0).with_source(Resource::resolved("b", 20.0, 25.0)),
            Mapping::target_only(9.0, 12.0),
        ];
        truncate_mappings(&mut mappings, 6.0);

        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[1].target, Interval::new(4.0, 6.0));
        assert_eq!(mappings[1].source.bounds(), Some((20.0, 22.0)));
    }

    #[test]
    fn truncation_past_the_end_is_a_no_op() {
        let mut mappings = vec![Mapping::target_only(0.0, 4.0)];
        truncate_mappings(&mut mappings, 10.0);
        assert_eq!(mappings, vec![Mapping::target_only(0.0, 4.0)]);
    }
}
