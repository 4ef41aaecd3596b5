//! Dependent search-region resolution.
//!
//! Before an anchor with a [`RegionDependency`] is searched, its region is
//! recomputed from the target anchor's latest match. Resolution depends only
//! on whether the target has matched; whether the dependent anchor itself has
//! ever been found is irrelevant.

use tracing::{debug, warn};

use crate::core::anchors::{AnchorRegistry, RegionDependency};
use crate::core::region::Region;

/// Outcome of a resolution attempt for one anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The anchor is fixed and already resolved; nothing recomputed.
    Fixed(Region),
    /// The anchor has no dependency (whole screen or static region).
    NotDependent,
    /// The target anchor has not matched yet. The anchor stays unresolved.
    Deferred,
    /// The derived region has a non-positive dimension (or, when `None`, a
    /// coordinate overflowed) and was not applied.
    Invalid(Option<Region>),
    /// A new region was written into the registry.
    Applied(Region),
    /// The anchor id is not registered.
    UnknownAnchor,
}

/// Derive a search region from a target region and the dependency offsets.
/// `None` when the offsets push a coordinate out of `i32` range.
pub fn derive_region(target: Region, dependency: &RegionDependency) -> Option<Region> {
    target.adjusted(&dependency.adjustment)
}

/// Refresh `anchor_id`'s derived search region from its dependency target.
pub fn resolve_region(registry: &mut AnchorRegistry, anchor_id: &str) -> Resolution {
    let Some(spec) = registry.spec(anchor_id) else {
        return Resolution::UnknownAnchor;
    };
    let fixed = spec.fixed;
    let Some(dependency) = spec.dependency().cloned() else {
        return Resolution::NotDependent;
    };

    if let Some(region) = registry.search_region(anchor_id).filter(|_| fixed) {
        return Resolution::Fixed(region);
    }

    let Some(target) = registry
        .last_match(&dependency.target_anchor)
        .map(|found| found.region())
    else {
        debug!(
            anchor = anchor_id,
            target_state = %dependency.target_state,
            target = %dependency.target_anchor,
            "region resolution deferred: target has no match yet"
        );
        return Resolution::Deferred;
    };

    let Some(derived) = derive_region(target, &dependency) else {
        warn!(
            anchor = anchor_id,
            target = %dependency.target_anchor,
            region = %target,
            "derived region overflows screen coordinates; check adjustment"
        );
        return Resolution::Invalid(None);
    };
    if !derived.has_positive_size() {
        warn!(
            anchor = anchor_id,
            target = %dependency.target_anchor,
            region = %derived,
            "derived region has non-positive size; check adjustment"
        );
        return Resolution::Invalid(Some(derived));
    }

    registry.set_resolved_region(anchor_id, derived);
    debug!(anchor = anchor_id, region = %derived, "derived region applied");
    Resolution::Applied(derived)
}
