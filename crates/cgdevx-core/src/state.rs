//! Persistent record of one platform installation.
//!
//! The store is loaded once per command, threaded by `&mut` through every
//! stage, and written back with [`StateStore::save`] after each stage
//! boundary. On disk it is a YAML document with the sections `input`,
//! `params`, `internal`, `fragments` and `checkpoints`; sections missing
//! from older files default to empty.

use crate::error::{DevxError, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStore {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Operator-supplied configuration, keyed by input name.
    #[serde(default)]
    input: BTreeMap<String, serde_yaml::Value>,
    /// Template tokens (`<CC_CLUSTER_FQDN>`) to scalar values.
    #[serde(default, rename = "params")]
    parameters: BTreeMap<String, String>,
    /// Secrets and runtime state never substituted into templates.
    #[serde(default, rename = "internal")]
    internals: BTreeMap<String, String>,
    /// Block tokens (`# <TF_VCS_REMOTE_BACKEND>`) to multi-line snippets.
    #[serde(default)]
    fragments: BTreeMap<String, String>,
    #[serde(default)]
    checkpoints: Vec<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    path: PathBuf,
}

fn default_version() -> u32 {
    1
}

impl StateStore {
    /// An empty store that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            version: 1,
            input: BTreeMap::new(),
            parameters: BTreeMap::new(),
            internals: BTreeMap::new(),
            fragments: BTreeMap::new(),
            checkpoints: Vec::new(),
            updated_at: Utc::now(),
            path: path.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load the store from `path`. A missing file is a fresh install, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(path));
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::new(path));
        }
        let mut store: StateStore = serde_yaml::from_str(&data)?;
        store.path = path.to_path_buf();
        Ok(store)
    }

    /// Load the store living under a state home directory.
    pub fn open(home: &Path) -> Result<Self> {
        Self::load(&paths::state_path(home))
    }

    /// Like [`StateStore::open`] but fails when nothing has been persisted yet.
    pub fn open_existing(home: &Path) -> Result<Self> {
        let path = paths::state_path(home);
        if !path.exists() {
            return Err(DevxError::NotInstalled);
        }
        Self::load(&path)
    }

    pub fn save(&mut self) -> Result<()> {
        self.updated_at = Utc::now();
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&self.path, data.as_bytes())
    }

    /// Remove the persisted document. Only the final destroy step calls this.
    pub fn delete(&self) -> Result<()> {
        crate::io::remove_if_exists(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_persisted(&self) -> bool {
        self.path.exists()
    }

    // -----------------------------------------------------------------------
    // Input parameters
    // -----------------------------------------------------------------------

    /// `None` when the key was never supplied; `Some(Value::Null)` when it was
    /// supplied as an explicit null.
    pub fn get_input_param(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.input.get(key)
    }

    /// String view of an input parameter, treating empty strings as absent.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn require_input(&self, key: &str) -> Result<&str> {
        self.input_str(key)
            .ok_or_else(|| DevxError::MissingValue(key.to_string()))
    }

    /// Merge new input parameters; incoming values win on conflict.
    pub fn update_input_params<I, K>(&mut self, params: I)
    where
        I: IntoIterator<Item = (K, serde_yaml::Value)>,
        K: Into<String>,
    {
        for (k, v) in params {
            self.input.insert(k.into(), v);
        }
    }

    pub fn input_params(&self) -> &BTreeMap<String, serde_yaml::Value> {
        &self.input
    }

    // -----------------------------------------------------------------------
    // Template parameters, fragments, internals
    // -----------------------------------------------------------------------

    pub fn param(&self, token: &str) -> Option<&str> {
        self.parameters.get(token).map(String::as_str)
    }

    pub fn require_param(&self, token: &str) -> Result<&str> {
        self.param(token)
            .ok_or_else(|| DevxError::MissingValue(token.to_string()))
    }

    pub fn set_param(&mut self, token: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(token.into(), value.into());
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn fragment(&self, token: &str) -> Option<&str> {
        self.fragments.get(token).map(String::as_str)
    }

    pub fn set_fragment(&mut self, token: impl Into<String>, snippet: impl Into<String>) {
        self.fragments.insert(token.into(), snippet.into());
    }

    pub fn fragments(&self) -> &BTreeMap<String, String> {
        &self.fragments
    }

    pub fn internal(&self, key: &str) -> Option<&str> {
        self.internals.get(key).map(String::as_str)
    }

    pub fn require_internal(&self, key: &str) -> Result<&str> {
        self.internal(key)
            .ok_or_else(|| DevxError::MissingValue(key.to_string()))
    }

    pub fn set_internal(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.internals.insert(key.into(), value.into());
    }

    pub fn internals(&self) -> &BTreeMap<String, String> {
        &self.internals
    }

    /// Substitute every fragment and parameter token in `text`.
    ///
    /// Fragments go first so that parameter tokens inside a fragment are
    /// resolved too.
    pub fn render(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (token, snippet) in &self.fragments {
            if out.contains(token.as_str()) {
                out = out.replace(token.as_str(), snippet);
            }
        }
        for (token, value) in &self.parameters {
            if out.contains(token.as_str()) {
                out = out.replace(token.as_str(), value);
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Record `name` as complete. Appends once; repeated calls are no-ops.
    pub fn set_checkpoint(&mut self, name: &str) {
        if !self.has_checkpoint(name) {
            self.checkpoints.push(name.to_string());
        }
    }

    pub fn has_checkpoint(&self, name: &str) -> bool {
        self.checkpoints.iter().any(|c| c == name)
    }

    /// Checkpoints in the order they were recorded.
    pub fn checkpoints(&self) -> &[String] {
        &self.checkpoints
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
