//! Invocation contract for the `ccr` cluster CLI.

use std::path::PathBuf;
use std::process::Stdio;

use thiserror::Error;

use crate::command_runner::CommandSpec;
use crate::nodes::{summarize_nodes, NodeSummary};

pub const DEFAULT_CLUSTER_TOOL: &str = "ccr";
pub const DEFAULT_APPLY_ARGS: &[&str] = &["tofu", "apply", "-auto-approve"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates failures talking to the cluster CLI.
pub enum ToolError {
    #[error("'{program}' command not found in system PATH.")]
    ToolNotFound { program: String },
    #[error("Failed to execute command '{command}': {message}")]
    Spawn { command: String, message: String },
    #[error("{message}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        message: String,
    },
    #[error("Command '{command}' returned no output. Is the current context valid and the cluster running?")]
    EmptyOutput { command: String },
    #[error("Failed to parse JSON output from '{command}'. The command did not return valid JSON.")]
    MalformedOutput { command: String, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Which program to run and how to apply configuration changes.
pub struct ClusterToolConfig {
    pub program: String,
    pub apply_args: Vec<String>,
}

impl Default for ClusterToolConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_CLUSTER_TOOL.to_string(),
            apply_args: DEFAULT_APPLY_ARGS.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
/// Thin wrapper over the cluster CLI. Each call resolves the executable again,
/// so installing or removing the tool takes effect without a restart. Streamed
/// specs keep the configured program name so rendered command lines read the
/// way the operator typed them.
pub struct ClusterTool {
    config: ClusterToolConfig,
}

impl ClusterTool {
    pub fn new(config: ClusterToolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterToolConfig {
        &self.config
    }

    /// Resolves the configured program on `PATH` (or as a path).
    pub fn resolve_program(&self) -> Result<PathBuf, ToolError> {
        which::which(&self.config.program).map_err(|_| ToolError::ToolNotFound {
            program: self.config.program.clone(),
        })
    }

    /// Builds `<tool> <command> <args...>` for streaming.
    pub fn subcommand_spec(&self, command: &str, args: &[String]) -> CommandSpec {
        let argv = std::iter::once(command.to_string()).chain(args.iter().cloned());
        CommandSpec::new(self.config.program.clone(), argv)
    }

    /// Builds the configuration apply command.
    pub fn apply_spec(&self) -> CommandSpec {
        CommandSpec::new(self.config.program.clone(), self.config.apply_args.clone())
    }

    /// `get-repo-path`: directory of the cluster repository.
    pub async fn repo_path(&self) -> Result<PathBuf, ToolError> {
        let stdout = self.run_captured("get-repo-path").await?;
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Err(ToolError::EmptyOutput {
                command: self.render("get-repo-path"),
            });
        }
        Ok(PathBuf::from(trimmed))
    }

    /// `ctx`: name of the active kube context.
    pub async fn current_context(&self) -> Result<String, ToolError> {
        Ok(self.run_captured("ctx").await?.trim().to_string())
    }

    /// `list-nodes`: node inventory reduced to [`NodeSummary`] rows.
    pub async fn list_nodes(&self) -> Result<Vec<NodeSummary>, ToolError> {
        let stdout = self.run_captured("list-nodes").await?;
        if stdout.trim().is_empty() {
            return Err(ToolError::EmptyOutput {
                command: self.render("list-nodes"),
            });
        }
        summarize_nodes(&stdout).map_err(|error| ToolError::MalformedOutput {
            command: self.render("list-nodes"),
            detail: error.to_string(),
        })
    }

    fn render(&self, subcommand: &str) -> String {
        CommandSpec::new(self.config.program.clone(), [subcommand]).display()
    }

    /// Runs a subcommand to completion and returns its stdout. A non-zero exit
    /// turns trimmed stderr into the error message.
    async fn run_captured(&self, subcommand: &str) -> Result<String, ToolError> {
        let program = self.resolve_program()?;
        let command_line = self.render(subcommand);
        let output = tokio::process::Command::new(&program)
            .arg(subcommand)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|error| ToolError::Spawn {
                command: command_line.clone(),
                message: error.to_string(),
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                match exit_code {
                    Some(code) => format!(
                        "Command '{command_line}' failed with exit code {code} but no stderr output."
                    ),
                    None => format!(
                        "Command '{command_line}' was terminated by a signal without stderr output."
                    ),
                }
            } else {
                stderr
            };
            tracing::debug!(command = %command_line, ?exit_code, "cluster tool call failed");
            return Err(ToolError::CommandFailed {
                command: command_line,
                exit_code,
                message,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
