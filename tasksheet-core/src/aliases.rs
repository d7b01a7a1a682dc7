//! Assignee alias table: raw tracker name → canonical display name.
//!
//! The table is a flat YAML mapping. A missing or unreadable file degrades to
//! an empty table so that names simply pass through unchanged.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    names: HashMap<String, String>,
}

impl AliasTable {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    /// Strictly load the table from `path`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the table, falling back to an empty one on any failure.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(table) => {
                tracing::info!(path = %path.display(), entries = table.len(), "loaded assignee aliases");
                table
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "assignee alias table unavailable; names pass through unchanged",
                );
                Self::default()
            }
        }
    }

    /// Canonical name for `raw`, or `raw` itself when unmapped.
    pub fn resolve(&self, raw: &str) -> String {
        self.names
            .get(raw.trim())
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
