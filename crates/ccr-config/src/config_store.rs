//! Validated read/update operations over `terraform/clusters.tf`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use ccr_core::write_text_atomic;

use crate::config_patcher::{patch_block, BlockTarget, PatchError};
use crate::hcl_reader::{decode_hcl_body, HclReadError};

pub const CLUSTERS_VARIABLE_ANCHOR: &str = "variable \"clusters\" {";
pub const CLUSTERS_DEFAULT_MARKER: &str = "default = {";
/// Cluster entries sit inside `variable { default = { .. } }`.
pub const CLUSTERS_BLOCK_DEPTH: usize = 2;

const CLUSTERS_TARGET: BlockTarget<'static> = BlockTarget {
    anchor: Some(CLUSTERS_VARIABLE_ANCHOR),
    marker: CLUSTERS_DEFAULT_MARKER,
    depth: CLUSTERS_BLOCK_DEPTH,
};

#[derive(Debug, Error)]
/// Enumerates configuration read/update failures.
pub enum ConfigError {
    #[error("Could not determine repository path: {0}")]
    RepoPathUnresolvable(String),
    #[error("Terraform file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to process {}: {source}", path.display())]
    ParseFailure {
        path: PathBuf,
        #[source]
        source: HclReadError,
    },
    #[error("Failed to process {}: no `variable \"clusters\"` block with a map default", path.display())]
    MissingClustersVariable { path: PathBuf },
    #[error("Cluster '{0}' not found in configuration.")]
    ClusterNotFound(String),
    #[error("Configuration for cluster '{0}' must be a JSON object.")]
    InvalidClusterConfig(String),
    #[error("Failed to update {}: {source}", path.display())]
    Patch {
        path: PathBuf,
        #[source]
        source: PatchError,
    },
    #[error("Refusing to write {}: rewritten block does not read back to the requested clusters", path.display())]
    VerificationFailed { path: PathBuf },
    #[error("Failed to write {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

/// Resolves the repository root that holds `terraform/clusters.tf`.
///
/// The error string is shown to the operator as-is.
#[async_trait]
pub trait RepoPathResolver: Send + Sync {
    async fn resolve_repo_path(&self) -> Result<PathBuf, String>;
}

#[derive(Debug, Clone)]
/// Resolver that always returns the same directory.
pub struct StaticRepoPathResolver {
    pub repo_root: PathBuf,
}

#[async_trait]
impl RepoPathResolver for StaticRepoPathResolver {
    async fn resolve_repo_path(&self) -> Result<PathBuf, String> {
        Ok(self.repo_root.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of a successful `update_cluster`.
pub struct ClusterUpdate {
    pub cluster_name: String,
    pub path: PathBuf,
    pub message: String,
}

pub fn clusters_file_path(repo_root: &Path) -> PathBuf {
    repo_root.join("terraform").join("clusters.tf")
}

/// Pulls `variable "clusters" { default = {..} }` out of a decoded document.
pub fn extract_clusters_default(document: &Map<String, Value>) -> Option<&Map<String, Value>> {
    document
        .get("variable")?
        .as_array()?
        .iter()
        .find_map(|block| block.get("clusters"))?
        .get("default")?
        .as_object()
}

/// Reads and rewrites the cluster map. Every call re-reads the file; nothing is
/// cached between calls.
pub struct ConfigStore {
    resolver: Arc<dyn RepoPathResolver>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(resolver: Arc<dyn RepoPathResolver>) -> Self {
        Self {
            resolver,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn clusters_file(&self) -> Result<PathBuf, ConfigError> {
        let repo_root = self
            .resolver
            .resolve_repo_path()
            .await
            .map_err(ConfigError::RepoPathUnresolvable)?;
        Ok(clusters_file_path(&repo_root))
    }

    pub async fn read_clusters(&self) -> Result<Map<String, Value>, ConfigError> {
        let path = self.clusters_file().await?;
        let document = read_document(&path).await?;
        let clusters = decode_clusters(&path, &document)?;
        tracing::debug!(path = %path.display(), clusters = clusters.len(), "read cluster configuration");
        Ok(clusters)
    }

    /// Replaces the entry for `cluster_name` and rewrites the `default` block.
    ///
    /// Unknown cluster names are rejected before the file is touched. Updates
    /// from all connections of this process are serialised.
    pub async fn update_cluster(
        &self,
        cluster_name: &str,
        config: Value,
    ) -> Result<ClusterUpdate, ConfigError> {
        let _guard = self.write_lock.lock().await;
        let path = self.clusters_file().await?;
        let document = read_document(&path).await?;
        let mut clusters = decode_clusters(&path, &document)?;

        if !clusters.contains_key(cluster_name) {
            return Err(ConfigError::ClusterNotFound(cluster_name.to_string()));
        }
        if !config.is_object() {
            return Err(ConfigError::InvalidClusterConfig(cluster_name.to_string()));
        }
        clusters.insert(cluster_name.to_string(), config);

        let patched = patch_block(&document, &CLUSTERS_TARGET, &clusters).map_err(|source| {
            ConfigError::Patch {
                path: path.clone(),
                source,
            }
        })?;
        match decode_clusters(&path, &patched) {
            Ok(reread) if reread == clusters => {}
            _ => return Err(ConfigError::VerificationFailed { path }),
        }
        write_text_atomic(&path, &patched).map_err(|error| ConfigError::Write {
            path: path.clone(),
            message: format!("{error:#}"),
        })?;

        tracing::info!(path = %path.display(), cluster = cluster_name, "updated cluster configuration");
        Ok(ClusterUpdate {
            cluster_name: cluster_name.to_string(),
            message: format!("Updated configuration for {cluster_name}."),
            path,
        })
    }
}

async fn read_document(path: &Path) -> Result<String, ConfigError> {
    if !tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
    {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn decode_clusters(path: &Path, document: &str) -> Result<Map<String, Value>, ConfigError> {
    let decoded = decode_hcl_body(document).map_err(|source| ConfigError::ParseFailure {
        path: path.to_path_buf(),
        source,
    })?;
    extract_clusters_default(&decoded)
        .cloned()
        .ok_or_else(|| ConfigError::MissingClustersVariable {
            path: path.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::tempdir;

    use super::{
        clusters_file_path, ConfigError, ConfigStore, RepoPathResolver, StaticRepoPathResolver,
    };

    const CLUSTERS_TF: &str = r#"terraform {
  required_version = ">= 1.6"
}

variable "clusters" {
  type = map(any)
  default = {
    prod = {
      workers     = 3
      worker_type = "cx41"
      labels = {
        tier = "gold"
      }
    }
    staging = {
      workers     = 1
      worker_type = "cx21"
    }
  }
}

locals {
  names = keys(var.clusters)
}
"#;

    struct FailingResolver;

    #[async_trait]
    impl RepoPathResolver for FailingResolver {
        async fn resolve_repo_path(&self) -> Result<PathBuf, String> {
            Err("ccr: not inside a cluster repository".to_string())
        }
    }

    fn seed_repo(root: &Path, contents: &str) -> PathBuf {
        let path = clusters_file_path(root);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create terraform dir");
        std::fs::write(&path, contents).expect("write clusters.tf");
        path
    }

    fn store_for(root: &Path) -> ConfigStore {
        ConfigStore::new(Arc::new(StaticRepoPathResolver {
            repo_root: root.to_path_buf(),
        }))
    }

    #[tokio::test]
    async fn functional_read_clusters_returns_default_map() {
        let temp = tempdir().expect("tempdir");
        seed_repo(temp.path(), CLUSTERS_TF);
        let clusters = store_for(temp.path()).read_clusters().await.expect("read");
        assert_eq!(
            serde_json::Value::Object(clusters),
            json!({
                "prod": {"workers": 3, "worker_type": "cx41", "labels": {"tier": "gold"}},
                "staging": {"workers": 1, "worker_type": "cx21"}
            })
        );
    }

    #[tokio::test]
    async fn functional_update_cluster_rewrites_only_target_entry() {
        let temp = tempdir().expect("tempdir");
        let path = seed_repo(temp.path(), CLUSTERS_TF);
        let store = store_for(temp.path());

        let update = store
            .update_cluster("staging", json!({"workers": 2, "worker_type": "cx31"}))
            .await
            .expect("update");
        assert_eq!(update.message, "Updated configuration for staging.");
        assert_eq!(update.path, path);

        let clusters = store.read_clusters().await.expect("re-read");
        assert_eq!(clusters["staging"], json!({"workers": 2, "worker_type": "cx31"}));
        assert_eq!(
            clusters["prod"],
            json!({"workers": 3, "worker_type": "cx41", "labels": {"tier": "gold"}})
        );

        let on_disk = std::fs::read_to_string(&path).expect("read back");
        assert!(on_disk.starts_with("terraform {\n  required_version = \">= 1.6\"\n}\n"));
        assert!(on_disk.ends_with("  }\n}\n\nlocals {\n  names = keys(var.clusters)\n}\n"));
    }

    #[tokio::test]
    async fn regression_update_cluster_ignores_marker_text_in_comments_strings_and_heredocs() {
        let temp = tempdir().expect("tempdir");
        let header = concat!(
            "variable \"clusters\" {\n",
            "  # default = {} is overridden below\n",
            "  description = \"map; default = { } when empty\"\n",
            "  notes = <<-EOT\n",
            "    default = { is documented here }\n",
            "  EOT\n",
        );
        let path = seed_repo(
            temp.path(),
            &format!("{header}  default = {{\n    prod = {{\n      workers = 3\n    }}\n  }}\n}}\n"),
        );

        store_for(temp.path())
            .update_cluster("prod", json!({"workers": 5}))
            .await
            .expect("update");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read back"),
            format!("{header}  default = {{\n    prod = {{\n      workers = 5\n    }}\n  }}\n}}\n")
        );
    }

    #[tokio::test]
    async fn regression_update_cluster_keeps_sibling_function_calls_valid() {
        let temp = tempdir().expect("tempdir");
        let path = seed_repo(
            temp.path(),
            concat!(
                "variable \"clusters\" {\n",
                "  default = {\n",
                "    prod = {\n",
                "      workers = 3\n",
                "    }\n",
                "    dev = {\n",
                "      name    = format(\"%s-dev\", \"x\")\n",
                "      workers = 1\n",
                "    }\n",
                "  }\n",
                "}\n",
            ),
        );

        store_for(temp.path())
            .update_cluster("prod", json!({"workers": 5}))
            .await
            .expect("update");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read back"),
            concat!(
                "variable \"clusters\" {\n",
                "  default = {\n",
                "    prod = {\n",
                "      workers = 5\n",
                "    }\n",
                "    dev = {\n",
                "      name = format(\"%s-dev\", \"x\")\n",
                "      workers = 1\n",
                "    }\n",
                "  }\n",
                "}\n",
            )
        );
    }

    #[tokio::test]
    async fn regression_update_unknown_cluster_leaves_file_untouched() {
        let temp = tempdir().expect("tempdir");
        let path = seed_repo(temp.path(), CLUSTERS_TF);
        let error = store_for(temp.path())
            .update_cluster("nonexistent", json!({"workers": 9}))
            .await
            .expect_err("unknown cluster");
        assert!(matches!(error, ConfigError::ClusterNotFound(ref name) if name == "nonexistent"));
        assert_eq!(
            error.to_string(),
            "Cluster 'nonexistent' not found in configuration."
        );
        assert_eq!(std::fs::read_to_string(&path).expect("read"), CLUSTERS_TF);
    }

    #[tokio::test]
    async fn regression_update_rejects_non_object_config() {
        let temp = tempdir().expect("tempdir");
        let path = seed_repo(temp.path(), CLUSTERS_TF);
        let error = store_for(temp.path())
            .update_cluster("prod", json!(["not", "a", "map"]))
            .await
            .expect_err("invalid config");
        assert!(matches!(error, ConfigError::InvalidClusterConfig(_)));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), CLUSTERS_TF);
    }

    #[tokio::test]
    async fn unit_read_clusters_reports_missing_file_and_resolver_errors() {
        let temp = tempdir().expect("tempdir");
        let error = store_for(temp.path())
            .read_clusters()
            .await
            .expect_err("missing file");
        assert!(matches!(error, ConfigError::FileNotFound(_)));
        assert!(error.to_string().starts_with("Terraform file not found: "));

        let error = ConfigStore::new(Arc::new(FailingResolver))
            .read_clusters()
            .await
            .expect_err("resolver failure");
        assert_eq!(
            error.to_string(),
            "Could not determine repository path: ccr: not inside a cluster repository"
        );
    }

    #[tokio::test]
    async fn unit_read_clusters_reports_parse_failure_and_missing_variable() {
        let temp = tempdir().expect("tempdir");
        seed_repo(temp.path(), "variable \"clusters\" {\n  default = {\n");
        let error = store_for(temp.path())
            .read_clusters()
            .await
            .expect_err("parse failure");
        assert!(matches!(error, ConfigError::ParseFailure { .. }));

        seed_repo(temp.path(), "variable \"region\" {\n  default = \"eu\"\n}\n");
        let error = store_for(temp.path())
            .read_clusters()
            .await
            .expect_err("missing variable");
        assert!(matches!(error, ConfigError::MissingClustersVariable { .. }));
    }

    #[tokio::test]
    async fn integration_concurrent_updates_are_serialised() {
        let temp = tempdir().expect("tempdir");
        seed_repo(temp.path(), CLUSTERS_TF);
        let store = Arc::new(store_for(temp.path()));

        let mut handles = Vec::new();
        for workers in 1..=8u64 {
            let store = Arc::clone(&store);
            let name = if workers % 2 == 0 { "prod" } else { "staging" };
            handles.push(tokio::spawn(async move {
                store
                    .update_cluster(name, json!({"workers": workers}))
                    .await
                    .map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("update");
        }

        let clusters = store.read_clusters().await.expect("read");
        assert_eq!(clusters.len(), 2);
        assert!(clusters["prod"]["workers"].as_u64().is_some());
        assert!(clusters["staging"]["workers"].as_u64().is_some());
    }
}
