//! Enumerates context names from a kubeconfig file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct KubeConfig {
    #[serde(default)]
    contexts: Option<Vec<NamedContext>>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: Option<String>,
}

/// Returns the kubeconfig path used when none is configured: the first entry
/// of `KUBECONFIG`, otherwise `~/.kube/config`.
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    if let Some(raw) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&raw).find(|path| !path.as_os_str().is_empty()) {
            return Some(first);
        }
    }
    dirs::home_dir().map(|home| home.join(".kube").join("config"))
}

/// Extracts `contexts[].name` in file order. Entries without a name are skipped.
pub fn parse_kube_contexts(raw: &str) -> Result<Vec<String>, serde_yaml::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let config: Option<KubeConfig> = serde_yaml::from_str(raw)?;
    Ok(config
        .and_then(|config| config.contexts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|context| context.name)
        .collect())
}

/// Loads context names from `path` (or the default location). A missing or
/// unreadable file yields an empty list.
pub fn load_kube_contexts(path: Option<&Path>) -> Vec<String> {
    let Some(path) = path.map(Path::to_path_buf).or_else(default_kubeconfig_path) else {
        tracing::warn!("kubeconfig location could not be determined");
        return Vec::new();
    };
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to read kubeconfig");
            return Vec::new();
        }
    };
    match parse_kube_contexts(&raw) {
        Ok(contexts) => contexts,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to parse kubeconfig");
            Vec::new()
        }
    }
}
