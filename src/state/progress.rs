//! Versioned progress-state blob
//!
//! A task in progress carries a JSON snapshot of its worker's in-memory crawl
//! state. The blob is internally tagged by `"version"` so a worker can refuse
//! a snapshot written by an incompatible build instead of misreading it.
//!
//! ```json
//! {
//!   "version": "1",
//!   "initial": false,
//!   "currentUrlId": 42,
//!   "currentDepth": 1,
//!   "seenSet": ["http://example.com", "http://example.com/"],
//!   "configHash": "9f86d0...",
//!   "modules": { "link-collector": { "inserted": 12 } }
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Version tag written by this build
pub const PROGRESS_VERSION: &str = "1";

/// Errors raised while encoding or decoding a progress blob
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Malformed progress blob: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Progress blob has no version tag")]
    MissingVersion,

    #[error("Unsupported progress blob version: {0}")]
    UnsupportedVersion(String),
}

/// Per-module checkpoint data, namespaced by module name
///
/// Each module owns exactly one entry and stores whatever serializable value
/// it needs to pick up again after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleStates(BTreeMap<String, Value>);

impl ModuleStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and deserializes the entry owned by `module`
    pub fn get<T: DeserializeOwned>(&self, module: &str) -> Result<Option<T>, ProgressError> {
        match self.0.get(module) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Replaces the entry owned by `module`
    pub fn set<T: Serialize>(&mut self, module: &str, value: &T) -> Result<(), ProgressError> {
        self.0
            .insert(module.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&mut self, module: &str) -> Option<Value> {
        self.0.remove(module)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.0.contains_key(module)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// In-memory crawl state checkpointed into the task row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    /// True until the first URL of this run has been claimed. When false, the
    /// URL named by `current_url_id` was claimed and its outcome is unconfirmed.
    pub initial: bool,

    /// Id of the URL row currently (or last) being processed
    pub current_url_id: Option<i64>,

    /// Depth of the last claimed URL; drives the breadth-first tie-break
    #[serde(default)]
    pub current_depth: u32,

    /// Frontier seen-set snapshot (both trailing-slash variants of each URL)
    pub seen_set: BTreeSet<String>,

    /// Hash of the configuration the run was started with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    /// Module-private checkpoint data
    #[serde(default)]
    pub modules: ModuleStates,
}

#[derive(Serialize)]
#[serde(tag = "version")]
enum VersionedRef<'a> {
    #[serde(rename = "1")]
    V1(&'a ProgressState),
}

#[derive(Deserialize)]
#[serde(tag = "version")]
enum Versioned {
    #[serde(rename = "1")]
    V1(ProgressState),
}

impl ProgressState {
    /// Creates the state of a run that has not claimed anything yet
    pub fn fresh(config_hash: Option<String>) -> Self {
        Self {
            initial: true,
            current_url_id: None,
            current_depth: 0,
            seen_set: BTreeSet::new(),
            config_hash,
            modules: ModuleStates::new(),
        }
    }

    /// Serializes the state into a versioned JSON blob
    pub fn encode(&self) -> Result<String, ProgressError> {
        Ok(serde_json::to_string(&VersionedRef::V1(self))?)
    }

    /// Parses a versioned JSON blob
    ///
    /// The version tag is checked before the body so an unknown version is
    /// reported as such rather than as a field mismatch.
    pub fn decode(blob: &str) -> Result<Self, ProgressError> {
        let value: Value = serde_json::from_str(blob)?;
        match value.get("version") {
            None => return Err(ProgressError::MissingVersion),
            Some(Value::String(v)) if v == PROGRESS_VERSION => {}
            Some(other) => {
                let version = match other {
                    Value::String(s) => s.clone(),
                    v => v.to_string(),
                };
                return Err(ProgressError::UnsupportedVersion(version));
            }
        }

        let Versioned::V1(state) = serde_json::from_value(value)?;
        Ok(state)
    }
}
