//! Turns parsed CLI flags into a running console server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use ccr_gateway::{run_console_server, CommandEffectTable, ConsoleServerConfig, SessionCoordinator};
use ccr_runtime::{CcrControlPlane, ClusterTool, ClusterToolConfig, CommandRunOptions};

use crate::cli_args::Cli;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn parse_apply_args(raw: &str) -> Result<Vec<String>> {
    let args = shell_words::split(raw).with_context(|| format!("invalid --apply-args '{raw}'"))?;
    if args.is_empty() {
        bail!("--apply-args must name at least one argument");
    }
    Ok(args)
}

fn load_command_effects(cli: &Cli) -> Result<CommandEffectTable> {
    match &cli.command_effects {
        Some(path) => CommandEffectTable::load(path),
        None => Ok(CommandEffectTable::default()),
    }
}

pub(crate) struct ConsoleRuntime {
    pub(crate) server: ConsoleServerConfig,
    pub(crate) coordinator: SessionCoordinator,
}

pub(crate) fn build_console_runtime(cli: &Cli) -> Result<ConsoleRuntime> {
    let tool = ClusterTool::new(ClusterToolConfig {
        program: cli.ccr_bin.clone(),
        apply_args: parse_apply_args(&cli.apply_args)?,
    });
    if let Err(error) = tool.resolve_program() {
        tracing::warn!(%error, "cluster tool not available yet; requests will report it");
    }
    let run_options = CommandRunOptions {
        working_dir: None,
        timeout: cli.command_timeout_secs.map(Duration::from_secs),
    };
    let control_plane = Arc::new(CcrControlPlane::new(tool, cli.kubeconfig.clone(), run_options));
    let effects = load_command_effects(cli)?;

    Ok(ConsoleRuntime {
        server: ConsoleServerConfig {
            bind: cli.bind.clone(),
            static_dir: cli.static_dir.clone(),
        },
        coordinator: SessionCoordinator::with_control_plane(control_plane, effects),
    })
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let runtime = build_console_runtime(&cli).context("failed to assemble console runtime")?;
    tracing::info!(
        ccr_bin = %cli.ccr_bin,
        apply_args = %cli.apply_args,
        timeout_secs = ?cli.command_timeout_secs,
        "starting ccr console"
    );
    run_console_server(runtime.server, runtime.coordinator).await
}
