//! Wire format of the `/ws/commands` channel.
//!
//! Inbound frames are `{"type": ..., "payload": {...}}`, outbound frames are
//! `{"type": ..., "data": ...}`.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CONSOLE_WS_HEARTBEAT_INTERVAL_SECONDS: u64 = 15;

pub const CONSOLE_WS_KIND_TF_CLUSTERS: &str = "tf_clusters";
pub const CONSOLE_WS_KIND_KUBE_CONTEXTS_LIST: &str = "kube_contexts_list";
pub const CONSOLE_WS_KIND_CURRENT_CONTEXT: &str = "current_context";
pub const CONSOLE_WS_KIND_NODES_LIST: &str = "nodes_list";
pub const CONSOLE_WS_KIND_LOG: &str = "log";
pub const CONSOLE_WS_KIND_LOG_ERROR: &str = "log_error";
pub const CONSOLE_WS_KIND_COMMAND_END: &str = "command_end";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleRequestKind {
    GetInitialData,
    GetNodes,
    UpdateTfCluster,
    RunCommand,
}

impl FromStr for ConsoleRequestKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "get_initial_data" => Ok(Self::GetInitialData),
            "get_nodes" => Ok(Self::GetNodes),
            "update_tf_cluster" => Ok(Self::UpdateTfCluster),
            "run_command" => Ok(Self::RunCommand),
            other => bail!(
                "unsupported request type '{}'; supported types are get_initial_data, get_nodes, update_tf_cluster, run_command",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A validated inbound request.
pub enum ConsoleRequest {
    GetInitialData,
    GetNodes,
    UpdateTfCluster { cluster_name: String, config: Value },
    RunCommand { command: String, args: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsoleResponseFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConsoleRequestFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

fn required_string(payload: &Map<String, Value>, field: &str) -> Result<String> {
    let raw = payload
        .get(field)
        .ok_or_else(|| anyhow!("payload field '{field}' is required"))?
        .as_str()
        .ok_or_else(|| anyhow!("payload field '{field}' must be a string"))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("payload field '{field}' must be non-empty");
    }
    Ok(trimmed.to_string())
}

fn optional_string_list(payload: &Map<String, Value>, field: &str) -> Result<Vec<String>> {
    let Some(value) = payload.get(field) else {
        return Ok(Vec::new());
    };
    if value.is_null() {
        return Ok(Vec::new());
    }
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("payload field '{field}' must be an array of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("payload field '{field}' must be an array of strings"))
        })
        .collect()
}

/// Parses and validates one inbound text frame.
pub fn parse_console_request(raw: &str) -> Result<ConsoleRequest> {
    let frame = serde_json::from_str::<RawConsoleRequestFrame>(raw)
        .context("failed to parse request frame JSON")?;
    let kind = ConsoleRequestKind::from_str(frame.kind.trim())?;
    let payload = match frame.payload {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => bail!("request payload must be a JSON object"),
    };

    Ok(match kind {
        ConsoleRequestKind::GetInitialData => ConsoleRequest::GetInitialData,
        ConsoleRequestKind::GetNodes => ConsoleRequest::GetNodes,
        ConsoleRequestKind::UpdateTfCluster => ConsoleRequest::UpdateTfCluster {
            cluster_name: required_string(&payload, "cluster_name")?,
            config: payload
                .get("config")
                .cloned()
                .ok_or_else(|| anyhow!("payload field 'config' is required"))?,
        },
        ConsoleRequestKind::RunCommand => ConsoleRequest::RunCommand {
            command: required_string(&payload, "command")?,
            args: optional_string_list(&payload, "args")?,
        },
    })
}

pub fn build_console_frame(kind: &str, data: Value) -> ConsoleResponseFrame {
    ConsoleResponseFrame {
        kind: kind.to_string(),
        data,
    }
}

pub fn build_console_log_frame(message: impl Into<String>) -> ConsoleResponseFrame {
    build_console_frame(CONSOLE_WS_KIND_LOG, Value::String(message.into()))
}

pub fn build_console_error_frame(message: impl Into<String>) -> ConsoleResponseFrame {
    build_console_frame(CONSOLE_WS_KIND_LOG_ERROR, Value::String(message.into()))
}
