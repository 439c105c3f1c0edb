//! Reduction of `kubectl get nodes -o json` style output to table rows.

use serde::{Deserialize, Serialize};

const NODE_ROLE_LABEL: &str = "node-role.kubernetes.io";
const DEFAULT_NODE_ROLE: &str = "worker";
const MISSING_FIELD: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Ready,
    NotReady,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One row of the nodes view.
pub struct NodeSummary {
    pub name: String,
    pub status: NodeStatus,
    /// Comma separated role names, `worker` when the node carries none.
    pub roles: String,
    /// Creation timestamp as reported by the API server.
    pub age: String,
}

#[derive(Debug, Default, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<NodeItem>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeItem {
    #[serde(default)]
    metadata: NodeMetadata,
    #[serde(default)]
    status: NodeStatusBlock,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeMetadata {
    name: Option<String>,
    #[serde(default)]
    labels: serde_json::Map<String, serde_json::Value>,
    creation_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatusBlock {
    #[serde(default)]
    conditions: Vec<NodeCondition>,
}

#[derive(Debug, Deserialize)]
struct NodeCondition {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    status: String,
}

impl NodeItem {
    fn summarize(self) -> NodeSummary {
        let status = match self
            .status
            .conditions
            .iter()
            .find(|condition| condition.kind == "Ready")
        {
            Some(condition) if condition.status == "True" => NodeStatus::Ready,
            Some(_) => NodeStatus::NotReady,
            None => NodeStatus::Unknown,
        };
        let mut roles = self
            .metadata
            .labels
            .keys()
            .filter(|key| key.contains(NODE_ROLE_LABEL))
            .map(|key| key.rsplit('/').next().unwrap_or(key.as_str()).to_string())
            .collect::<Vec<_>>();
        if roles.is_empty() {
            roles.push(DEFAULT_NODE_ROLE.to_string());
        }
        NodeSummary {
            name: self
                .metadata
                .name
                .unwrap_or_else(|| MISSING_FIELD.to_string()),
            status,
            roles: roles.join(", "),
            age: self
                .metadata
                .creation_timestamp
                .unwrap_or_else(|| MISSING_FIELD.to_string()),
        }
    }
}

/// Parses a node list document and summarizes every item in order.
pub fn summarize_nodes(raw: &str) -> Result<Vec<NodeSummary>, serde_json::Error> {
    let list: NodeList = serde_json::from_str(raw)?;
    Ok(list.items.into_iter().map(NodeItem::summarize).collect())
}
