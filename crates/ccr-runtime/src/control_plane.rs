//! Seam between the session layer and the cluster tooling.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::cluster_tool::{ClusterTool, ToolError};
use crate::command_runner::{
    run_command, CommandEvent, CommandEventStream, CommandOutcome, CommandRunOptions, CommandSpec,
};
use crate::kube_contexts::load_kube_contexts;
use crate::nodes::NodeSummary;

#[async_trait]
/// Everything a session needs from the cluster side: queries for the views and
/// streaming execution of tool subcommands.
///
/// Streams returned by `run_*` always end with one `CommandEnd`, including when
/// the tool is not installed.
pub trait ClusterControlPlane: Send + Sync {
    async fn repo_path(&self) -> Result<PathBuf, ToolError>;
    async fn current_context(&self) -> Result<String, ToolError>;
    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, ToolError>;
    /// Context names known to the kubeconfig. Never fails; errors yield `[]`.
    async fn kube_contexts(&self) -> Vec<String>;
    fn run_subcommand(&self, command: &str, args: &[String]) -> CommandEventStream;
    fn run_apply(&self) -> CommandEventStream;
}

#[derive(Debug, Clone)]
/// Control plane backed by the real `ccr` executable and kubeconfig.
pub struct CcrControlPlane {
    tool: ClusterTool,
    kubeconfig: Option<PathBuf>,
    run_options: CommandRunOptions,
}

impl CcrControlPlane {
    pub fn new(tool: ClusterTool, kubeconfig: Option<PathBuf>, run_options: CommandRunOptions) -> Self {
        Self {
            tool,
            kubeconfig,
            run_options,
        }
    }

    pub fn tool(&self) -> &ClusterTool {
        &self.tool
    }

    fn launch(&self, spec: CommandSpec) -> CommandEventStream {
        if let Err(error) = self.tool.resolve_program() {
            let command_line = spec.display();
            tracing::warn!(command = %command_line, %error, "cluster tool unavailable");
            return CommandEventStream::from_events(vec![
                CommandEvent::LogError(format!("Failed to execute command: {error}")),
                CommandEvent::CommandEnd(CommandOutcome::failed_to_start(command_line)),
            ]);
        }
        run_command(spec, self.run_options.clone())
    }
}

#[async_trait]
impl ClusterControlPlane for CcrControlPlane {
    async fn repo_path(&self) -> Result<PathBuf, ToolError> {
        self.tool.repo_path().await
    }

    async fn current_context(&self) -> Result<String, ToolError> {
        self.tool.current_context().await
    }

    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, ToolError> {
        self.tool.list_nodes().await
    }

    async fn kube_contexts(&self) -> Vec<String> {
        let kubeconfig = self.kubeconfig.clone();
        match tokio::task::spawn_blocking(move || load_kube_contexts(kubeconfig.as_deref())).await {
            Ok(contexts) => contexts,
            Err(error) => {
                tracing::warn!(%error, "kubeconfig loader task failed");
                Vec::new()
            }
        }
    }

    fn run_subcommand(&self, command: &str, args: &[String]) -> CommandEventStream {
        self.launch(self.tool.subcommand_spec(command, args))
    }

    fn run_apply(&self) -> CommandEventStream {
        self.launch(self.tool.apply_spec())
    }
}
