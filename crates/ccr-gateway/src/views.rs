//! Builds the outbound frame for each derived view.
//!
//! Views are recomputed from the tool and the configuration file on every
//! request. Failures are rendered into the view payload rather than dropped:
//! map-like views carry `{"error": ...}`, the context view an `Error: ...` string.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use ccr_config::{ConfigStore, RepoPathResolver};
use ccr_runtime::ClusterControlPlane;

use crate::command_effects::ViewKind;
use crate::ws_protocol::{build_console_frame, ConsoleResponseFrame};

fn error_payload(message: impl std::fmt::Display) -> Value {
    json!({ "error": message.to_string() })
}

pub async fn tf_clusters_view(store: &ConfigStore) -> Value {
    match store.read_clusters().await {
        Ok(clusters) => Value::Object(clusters),
        Err(error) => {
            tracing::warn!(%error, "tf_clusters view unavailable");
            error_payload(error)
        }
    }
}

pub async fn current_context_view(control_plane: &dyn ClusterControlPlane) -> Value {
    match control_plane.current_context().await {
        Ok(context) => Value::String(context),
        Err(error) => Value::String(format!("Error: {error}")),
    }
}

pub async fn nodes_list_view(control_plane: &dyn ClusterControlPlane) -> Value {
    match control_plane.list_nodes().await {
        Ok(nodes) => serde_json::to_value(nodes).unwrap_or_else(error_payload),
        Err(error) => error_payload(error),
    }
}

pub async fn kube_contexts_view(control_plane: &dyn ClusterControlPlane) -> Value {
    Value::from(control_plane.kube_contexts().await)
}

pub async fn render_view(
    kind: ViewKind,
    control_plane: &dyn ClusterControlPlane,
    store: &ConfigStore,
) -> ConsoleResponseFrame {
    let data = match kind {
        ViewKind::TfClusters => tf_clusters_view(store).await,
        ViewKind::KubeContextsList => kube_contexts_view(control_plane).await,
        ViewKind::CurrentContext => current_context_view(control_plane).await,
        ViewKind::NodesList => nodes_list_view(control_plane).await,
    };
    build_console_frame(kind.frame_kind(), data)
}

/// Resolves the repository root by asking the cluster tool.
pub struct ControlPlaneRepoResolver {
    control_plane: Arc<dyn ClusterControlPlane>,
}

impl ControlPlaneRepoResolver {
    pub fn new(control_plane: Arc<dyn ClusterControlPlane>) -> Self {
        Self { control_plane }
    }
}

#[async_trait]
impl RepoPathResolver for ControlPlaneRepoResolver {
    async fn resolve_repo_path(&self) -> Result<PathBuf, String> {
        self.control_plane
            .repo_path()
            .await
            .map_err(|error| error.to_string())
    }
}
