//! Replay fixtures: recorded locate histories per anchor (JSON).
//!
//! Loaded once at startup and read-only afterwards. The document is checked
//! against a JSON Schema before it is deserialised so that malformed fixtures
//! fail with every violation listed.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::catalog::Catalog;
use crate::core::region::{Match, Region};
use crate::io::replay::{ActionHistory, ActionRecord};

const FIXTURES_SCHEMA: &str = include_str!("../../schemas/fixtures.schema.json");

/// Score assigned to recorded matches that omit one.
const DEFAULT_SCORE: f64 = 1.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureFile {
    pub anchors: BTreeMap<String, Vec<RecordFixture>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFixture {
    pub succeeded: bool,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub found: Option<MatchFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFixture {
    pub region: Region,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Per-anchor histories ready for the replay engine.
pub type FixtureSet = HashMap<String, ActionHistory>;

/// Load and validate fixtures from a JSON file.
pub fn load_fixtures(path: &Path) -> Result<FixtureSet> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let fixtures = parse_fixtures(&raw).with_context(|| format!("load {}", path.display()))?;
    debug!(path = %path.display(), anchors = fixtures.len(), "fixtures loaded");
    Ok(fixtures)
}

/// Parse fixtures: schema conformance, then conversion into histories.
pub fn parse_fixtures(raw: &str) -> Result<FixtureSet> {
    let instance: Value = serde_json::from_str(raw).context("parse fixtures json")?;
    let schema: Value = serde_json::from_str(FIXTURES_SCHEMA).context("parse fixtures schema")?;
    validate_schema(&instance, &schema)?;
    let file: FixtureFile = serde_json::from_value(instance).context("parse fixtures")?;
    Ok(into_histories(file))
}

/// Anchor ids present in the fixtures but not declared in the catalog.
pub fn unknown_anchors<'a>(fixtures: &'a FixtureSet, catalog: &Catalog) -> Vec<&'a str> {
    let mut unknown: Vec<&str> = fixtures
        .keys()
        .filter(|id| catalog.anchor(id).is_none())
        .map(String::as_str)
        .collect();
    unknown.sort_unstable();
    unknown
}

fn into_histories(file: FixtureFile) -> FixtureSet {
    file.anchors
        .into_iter()
        .map(|(anchor_id, records)| {
            let history = records
                .into_iter()
                .map(|record| ActionRecord {
                    succeeded: record.succeeded,
                    found: record.found.map(|m| {
                        Match::new(&anchor_id, m.region, m.score.unwrap_or(DEFAULT_SCORE))
                    }),
                })
                .collect();
            (anchor_id, history)
        })
        .collect()
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("fixtures schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
