//! Per-connection request dispatch.
//!
//! One request is handled at a time. Streamed command events are forwarded as
//! they arrive and views are re-sent only after the command's `command_end`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;

use ccr_config::ConfigStore;
use ccr_runtime::{ClusterControlPlane, CommandEvent, CommandEventStream};

use crate::command_effects::{CommandEffectTable, ViewKind, INITIAL_VIEWS, UPDATE_VIEWS};
use crate::views::{render_view, ControlPlaneRepoResolver};
use crate::ws_protocol::{
    build_console_error_frame, build_console_frame, build_console_log_frame, parse_console_request,
    ConsoleRequest, ConsoleResponseFrame, CONSOLE_WS_KIND_COMMAND_END,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The client side of the session went away.
pub struct SessionClosed;

impl std::fmt::Display for SessionClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("session transport closed")
    }
}

impl std::error::Error for SessionClosed {}

#[async_trait]
/// Destination of outbound frames for one session.
pub trait OutboundSink: Send {
    async fn send_frame(&mut self, frame: ConsoleResponseFrame) -> Result<(), SessionClosed>;
}

#[async_trait]
impl OutboundSink for Vec<ConsoleResponseFrame> {
    async fn send_frame(&mut self, frame: ConsoleResponseFrame) -> Result<(), SessionClosed> {
        self.push(frame);
        Ok(())
    }
}

#[derive(Clone)]
/// Shared by every connection of the process. Holds no per-session state.
pub struct SessionCoordinator {
    control_plane: Arc<dyn ClusterControlPlane>,
    store: Arc<ConfigStore>,
    effects: Arc<CommandEffectTable>,
}

impl SessionCoordinator {
    pub fn new(
        control_plane: Arc<dyn ClusterControlPlane>,
        store: Arc<ConfigStore>,
        effects: CommandEffectTable,
    ) -> Self {
        Self {
            control_plane,
            store,
            effects: Arc::new(effects),
        }
    }

    /// Builds a coordinator whose config store locates the repository through
    /// the control plane.
    pub fn with_control_plane(control_plane: Arc<dyn ClusterControlPlane>, effects: CommandEffectTable) -> Self {
        let resolver = Arc::new(ControlPlaneRepoResolver::new(Arc::clone(&control_plane)));
        let store = Arc::new(ConfigStore::new(resolver));
        Self::new(control_plane, store, effects)
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Parses one inbound text frame and dispatches it. Invalid frames are
    /// answered with a single `log_error`.
    pub async fn handle_text<S>(&self, raw: &str, sink: &mut S) -> Result<(), SessionClosed>
    where
        S: OutboundSink + ?Sized,
    {
        match parse_console_request(raw) {
            Ok(request) => self.dispatch(request, sink).await,
            Err(error) => {
                tracing::debug!(error = %format!("{error:#}"), "rejected request frame");
                sink.send_frame(build_console_error_frame(format!("Invalid request: {error:#}")))
                    .await
            }
        }
    }

    pub async fn dispatch<S>(&self, request: ConsoleRequest, sink: &mut S) -> Result<(), SessionClosed>
    where
        S: OutboundSink + ?Sized,
    {
        match request {
            ConsoleRequest::GetInitialData => self.send_views(INITIAL_VIEWS, sink).await,
            ConsoleRequest::GetNodes => self.send_views(&[ViewKind::NodesList], sink).await,
            ConsoleRequest::UpdateTfCluster {
                cluster_name,
                config,
            } => self.update_cluster(&cluster_name, config, sink).await,
            ConsoleRequest::RunCommand { command, args } => {
                tracing::info!(command = %command, ?args, "running cluster tool subcommand");
                let events = self.control_plane.run_subcommand(&command, &args);
                forward_command_events(events, sink).await?;
                self.send_views(self.effects.views_after(&command), sink).await
            }
        }
    }

    async fn update_cluster<S>(&self, cluster_name: &str, config: Value, sink: &mut S) -> Result<(), SessionClosed>
    where
        S: OutboundSink + ?Sized,
    {
        let update = match self.store.update_cluster(cluster_name, config).await {
            Ok(update) => update,
            Err(error) => {
                tracing::warn!(cluster = cluster_name, %error, "cluster update rejected");
                return sink.send_frame(build_console_error_frame(error.to_string())).await;
            }
        };
        sink.send_frame(build_console_log_frame(update.message)).await?;
        forward_command_events(self.control_plane.run_apply(), sink).await?;
        self.send_views(UPDATE_VIEWS, sink).await
    }

    async fn send_views<S>(&self, views: &[ViewKind], sink: &mut S) -> Result<(), SessionClosed>
    where
        S: OutboundSink + ?Sized,
    {
        for view in views {
            let frame = render_view(*view, self.control_plane.as_ref(), &self.store).await;
            sink.send_frame(frame).await?;
        }
        Ok(())
    }
}

/// Forwards every event of `events` in order. Stops early only when the sink
/// closes; the process itself keeps running.
pub async fn forward_command_events<S>(mut events: CommandEventStream, sink: &mut S) -> Result<(), SessionClosed>
where
    S: OutboundSink + ?Sized,
{
    while let Some(event) = events.next().await {
        let frame = match event {
            CommandEvent::Log(line) => build_console_log_frame(line),
            CommandEvent::LogError(line) => build_console_error_frame(line),
            CommandEvent::CommandEnd(outcome) => {
                tracing::debug!(
                    command = %outcome.command_line,
                    exit_code = ?outcome.exit_code,
                    success = outcome.success,
                    "forwarding command end"
                );
                build_console_frame(CONSOLE_WS_KIND_COMMAND_END, Value::String(outcome.summary))
            }
        };
        sink.send_frame(frame).await?;
    }
    Ok(())
}
