//! Which views are re-sent after a streamed subcommand completes.
//!
//! ```toml
//! [commands]
//! ctx = ["current_context", "nodes_list", "tf_clusters"]
//! bootstrap = ["current_context", "nodes_list", "tf_clusters"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ws_protocol::{
    CONSOLE_WS_KIND_CURRENT_CONTEXT, CONSOLE_WS_KIND_KUBE_CONTEXTS_LIST, CONSOLE_WS_KIND_NODES_LIST,
    CONSOLE_WS_KIND_TF_CLUSTERS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// A derived view the client renders.
pub enum ViewKind {
    TfClusters,
    KubeContextsList,
    CurrentContext,
    NodesList,
}

impl ViewKind {
    pub fn frame_kind(self) -> &'static str {
        match self {
            Self::TfClusters => CONSOLE_WS_KIND_TF_CLUSTERS,
            Self::KubeContextsList => CONSOLE_WS_KIND_KUBE_CONTEXTS_LIST,
            Self::CurrentContext => CONSOLE_WS_KIND_CURRENT_CONTEXT,
            Self::NodesList => CONSOLE_WS_KIND_NODES_LIST,
        }
    }
}

/// Views sent for `get_initial_data`, in order.
pub const INITIAL_VIEWS: &[ViewKind] = &[
    ViewKind::TfClusters,
    ViewKind::KubeContextsList,
    ViewKind::CurrentContext,
    ViewKind::NodesList,
];

/// Views refreshed after a configuration update has been applied.
pub const UPDATE_VIEWS: &[ViewKind] = &[ViewKind::TfClusters, ViewKind::NodesList];

const CONTEXT_CHANGING_VIEWS: &[ViewKind] = &[
    ViewKind::CurrentContext,
    ViewKind::NodesList,
    ViewKind::TfClusters,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Maps subcommand names to the views they invalidate. Commands that are not
/// listed refresh nothing.
pub struct CommandEffectTable {
    #[serde(default)]
    commands: BTreeMap<String, Vec<ViewKind>>,
}

impl Default for CommandEffectTable {
    fn default() -> Self {
        let mut commands = BTreeMap::new();
        for command in ["ctx", "bootstrap"] {
            commands.insert(command.to_string(), CONTEXT_CHANGING_VIEWS.to_vec());
        }
        Self { commands }
    }
}

impl CommandEffectTable {
    pub fn empty() -> Self {
        Self {
            commands: BTreeMap::new(),
        }
    }

    /// Parses a table. The parsed table replaces the defaults entirely.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut table: Self = toml::from_str(raw).context("failed to parse command effect table")?;
        for views in table.commands.values_mut() {
            let mut seen = Vec::with_capacity(views.len());
            views.retain(|view| {
                if seen.contains(view) {
                    return false;
                }
                seen.push(*view);
                true
            });
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid command effect table {}", path.display()))
    }

    pub fn with_command(mut self, command: impl Into<String>, views: Vec<ViewKind>) -> Self {
        self.commands.insert(command.into(), views);
        self
    }

    pub fn views_after(&self, command: &str) -> &[ViewKind] {
        self.commands
            .get(command)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
