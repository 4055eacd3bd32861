use crate::error::TagFlowError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which lists a reconciliation pass may rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileScope {
    /// Only lists owned by the note open in the focused editor. Avoids
    /// background writes racing the editor buffer of unopened notes.
    #[default]
    ActiveNoteOnly,
    AllLists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagFlowConfig {
    /// Name of the blob holding the persisted list registry.
    pub blob_name: String,
    /// Interval of the periodic sweep over every list.
    pub sweep_interval_secs: u64,
    /// Quiet period before a note's create/modify/delete is handled. A
    /// delete followed by a re-create inside the window (editor save via a
    /// backup file) is handled as a modification.
    pub debounce_millis: u64,
    /// Scope used for edit, view-change and graph-view triggers.
    pub interactive_scope: ReconcileScope,
    /// Order member links by note path instead of host iteration order.
    pub sort_members: bool,
    /// Prefer host-parsed tag metadata over scanning raw text.
    pub use_metadata: bool,
}

impl Default for TagFlowConfig {
    fn default() -> Self {
        Self {
            blob_name: "tagFlowData.json".to_string(),
            sweep_interval_secs: 60 * 60,
            debounce_millis: 500,
            interactive_scope: ReconcileScope::ActiveNoteOnly,
            sort_members: false,
            use_metadata: true,
        }
    }
}

impl TagFlowConfig {
    pub fn from_toml(raw: &str) -> Result<Self, TagFlowError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read a TOML config file, falling back to defaults if it does not
    /// exist. Any other read failure is an error.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, TagFlowError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => Self::from_toml(&raw),
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            Err(_) => {
                tracing::debug!(
                    "No config at {}, using defaults",
                    path.as_ref().display()
                );
                Ok(Self::default())
            }
        }
    }
}
