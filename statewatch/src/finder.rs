//! Resolve, locate and record a single anchor.

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::anchors::AnchorRegistry;
use crate::core::region::Match;
use crate::core::resolver::resolve_region;
use crate::io::config::SearchSettings;
use crate::io::locator::{Locator, SearchRequest};

/// Look for `anchor_id` on screen.
///
/// The anchor's derived region is refreshed first. A dependent anchor whose
/// region cannot be resolved yet is not searched and counts as NotFound.
/// Successful matches are recorded in the registry.
///
/// Returns `Ok(None)` for NotFound; `Err` only for unknown anchors or locator
/// backend failures.
#[instrument(skip_all, fields(anchor = anchor_id))]
pub fn find_anchor(
    registry: &mut AnchorRegistry,
    locator: &dyn Locator,
    search: &SearchSettings,
    anchor_id: &str,
) -> Result<Option<Match>> {
    let spec = registry
        .spec(anchor_id)
        .ok_or_else(|| anyhow!("unknown anchor '{}'", anchor_id))?;
    let dependent = spec.dependency().is_some();

    resolve_region(registry, anchor_id);
    let region = registry.search_region(anchor_id);
    if dependent && region.is_none() {
        note_miss(registry, search, anchor_id, "region unresolved");
        return Ok(None);
    }

    let request = SearchRequest {
        anchor_id: anchor_id.to_string(),
        region,
        similarity: search.similarity,
        max_duration: search.max_search(),
    };
    match locator.locate(&request)? {
        Some(found) => {
            debug!(region = %found.region(), score = found.score(), "anchor found");
            registry.record_match(anchor_id, found.clone());
            Ok(Some(found))
        }
        None => {
            note_miss(registry, search, anchor_id, "not found");
            Ok(None)
        }
    }
}

fn note_miss(registry: &mut AnchorRegistry, search: &SearchSettings, anchor_id: &str, why: &str) {
    let misses = registry.record_miss(anchor_id);
    if misses > search.miss_log_threshold {
        warn!(anchor = anchor_id, misses, reason = why, "anchor repeatedly missing");
    } else {
        debug!(anchor = anchor_id, misses, reason = why, "anchor missing");
    }
}
