//! Anchor definitions and the registry that owns their runtime search state.
//!
//! The registry is the single source of truth for each anchor's recent
//! matches and its current search region. The resolver reads target matches
//! from it and writes derived regions back into it.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::core::region::{Adjustment, Match, Region};

/// Default number of matches retained per anchor.
pub const DEFAULT_HISTORY_SIZE: usize = 5;

/// "My search region is the last match of `(target_state, target_anchor)`,
/// shifted and grown by `adjustment`."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDependency {
    pub target_state: String,
    pub target_anchor: String,
    pub adjustment: Adjustment,
}

/// What drives an anchor's search region. At most one source is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSource {
    /// No restriction: the whole screen is searched.
    Whole,
    /// A fixed, configured region.
    Static(Region),
    /// Derived from another anchor's most recent match.
    Dependent(RegionDependency),
}

/// A named, searchable visual element owned by one state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorSpec {
    pub id: String,
    pub state: String,
    pub source: RegionSource,
    /// Once a derived region is resolved, keep it for the rest of the run.
    pub fixed: bool,
}

impl AnchorSpec {
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
            source: RegionSource::Whole,
            fixed: false,
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.source = RegionSource::Static(region);
        self
    }

    pub fn with_dependency(mut self, dependency: RegionDependency) -> Self {
        self.source = RegionSource::Dependent(dependency);
        self
    }

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn dependency(&self) -> Option<&RegionDependency> {
        match &self.source {
            RegionSource::Dependent(dep) => Some(dep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct AnchorEntry {
    spec: AnchorSpec,
    matches: VecDeque<Match>,
    resolved: Option<Region>,
    misses: u32,
}

/// Per-anchor match history and resolved regions.
///
/// Mutated only by the scheduler's worker (or the startup sequence before the
/// worker exists), so no interior locking is used.
#[derive(Debug, Clone)]
pub struct AnchorRegistry {
    entries: BTreeMap<String, AnchorEntry>,
    history_size: usize,
}

impl AnchorRegistry {
    pub fn new(specs: impl IntoIterator<Item = AnchorSpec>, history_size: usize) -> Self {
        let entries = specs
            .into_iter()
            .map(|spec| {
                (
                    spec.id.clone(),
                    AnchorEntry {
                        spec,
                        matches: VecDeque::new(),
                        resolved: None,
                        misses: 0,
                    },
                )
            })
            .collect();
        Self {
            entries,
            history_size: history_size.max(1),
        }
    }

    pub fn contains(&self, anchor_id: &str) -> bool {
        self.entries.contains_key(anchor_id)
    }

    pub fn spec(&self, anchor_id: &str) -> Option<&AnchorSpec> {
        self.entries.get(anchor_id).map(|entry| &entry.spec)
    }

    /// Append a match, keeping only the most recent `history_size` entries.
    /// Unknown anchors are ignored.
    pub fn record_match(&mut self, anchor_id: &str, found: Match) {
        let Some(entry) = self.entries.get_mut(anchor_id) else {
            debug!(anchor = anchor_id, "ignoring match for unknown anchor");
            return;
        };
        entry.matches.push_back(found);
        while entry.matches.len() > self.history_size {
            entry.matches.pop_front();
        }
        entry.misses = 0;
    }

    /// Count a NotFound and return the number of consecutive misses.
    pub fn record_miss(&mut self, anchor_id: &str) -> u32 {
        match self.entries.get_mut(anchor_id) {
            Some(entry) => {
                entry.misses = entry.misses.saturating_add(1);
                entry.misses
            }
            None => 0,
        }
    }

    pub fn consecutive_misses(&self, anchor_id: &str) -> u32 {
        self.entries.get(anchor_id).map_or(0, |entry| entry.misses)
    }

    pub fn last_match(&self, anchor_id: &str) -> Option<&Match> {
        self.entries
            .get(anchor_id)
            .and_then(|entry| entry.matches.back())
    }

    /// Recent matches, oldest first.
    pub fn matches(&self, anchor_id: &str) -> impl Iterator<Item = &Match> {
        self.entries
            .get(anchor_id)
            .into_iter()
            .flat_map(|entry| entry.matches.iter())
    }

    /// Static region if configured, otherwise the last derived region.
    pub fn search_region(&self, anchor_id: &str) -> Option<Region> {
        let entry = self.entries.get(anchor_id)?;
        match &entry.spec.source {
            RegionSource::Static(region) => Some(*region),
            _ => entry.resolved,
        }
    }

    pub fn has_defined_region(&self, anchor_id: &str) -> bool {
        self.search_region(anchor_id).is_some()
    }

    pub(crate) fn set_resolved_region(&mut self, anchor_id: &str, region: Region) {
        if let Some(entry) = self.entries.get_mut(anchor_id) {
            entry.resolved = Some(region);
        }
    }
}
