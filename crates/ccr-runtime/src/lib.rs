//! Process-facing runtime for ccr-console.
//!
//! Streams external command output as typed events, wraps the `ccr` CLI
//! contract (repository path, current context, node listing) and enumerates
//! kubeconfig contexts.

pub mod cluster_tool;
pub mod command_runner;
pub mod control_plane;
pub mod kube_contexts;
pub mod nodes;

pub use cluster_tool::{ClusterTool, ClusterToolConfig, ToolError, DEFAULT_APPLY_ARGS, DEFAULT_CLUSTER_TOOL};
pub use command_runner::{
    run_command, CommandEvent, CommandEventStream, CommandOutcome, CommandRunOptions, CommandSpec,
};
pub use control_plane::{CcrControlPlane, ClusterControlPlane};
pub use kube_contexts::{default_kubeconfig_path, load_kube_contexts, parse_kube_contexts};
pub use nodes::{summarize_nodes, NodeStatus, NodeSummary};
