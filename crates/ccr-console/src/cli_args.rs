use std::path::PathBuf;

use clap::Parser;

use ccr_gateway::DEFAULT_CONSOLE_BIND;
use ccr_runtime::DEFAULT_CLUSTER_TOOL;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "ccr-console",
    about = "Browser console for ccr-managed clusters",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "CCR_CONSOLE_BIND",
        default_value = DEFAULT_CONSOLE_BIND,
        help = "Socket address the HTTP/WebSocket server binds to"
    )]
    pub(crate) bind: String,

    #[arg(
        long = "static-dir",
        env = "CCR_CONSOLE_STATIC_DIR",
        default_value = "static",
        help = "Directory holding index.html and the assets served under /static"
    )]
    pub(crate) static_dir: PathBuf,

    #[arg(
        long = "ccr-bin",
        env = "CCR_CONSOLE_CCR_BIN",
        default_value = DEFAULT_CLUSTER_TOOL,
        help = "Cluster tool executable, looked up on PATH unless it is a path"
    )]
    pub(crate) ccr_bin: String,

    #[arg(
        long = "apply-args",
        env = "CCR_CONSOLE_APPLY_ARGS",
        default_value = "tofu apply -auto-approve",
        help = "Arguments passed to the cluster tool to apply configuration changes (shell-quoted)"
    )]
    pub(crate) apply_args: String,

    #[arg(
        long = "command-timeout-secs",
        env = "CCR_CONSOLE_COMMAND_TIMEOUT_SECS",
        value_parser = parse_positive_u64,
        help = "Kill streamed commands that run longer than this many seconds"
    )]
    pub(crate) command_timeout_secs: Option<u64>,

    #[arg(
        long = "command-effects",
        env = "CCR_CONSOLE_COMMAND_EFFECTS",
        help = "TOML file mapping subcommands to the views refreshed after they finish"
    )]
    pub(crate) command_effects: Option<PathBuf>,

    #[arg(
        long,
        env = "CCR_CONSOLE_KUBECONFIG",
        help = "Kubeconfig used to list contexts (defaults to $KUBECONFIG or ~/.kube/config)"
    )]
    pub(crate) kubeconfig: Option<PathBuf>,
}
