//! WebSocket gateway for the ccr console.
//!
//! Serves the browser client, accepts `/ws/commands` sessions and dispatches
//! each request to the configuration store or the cluster tool.

pub mod command_effects;
pub mod server_bootstrap;
pub mod session_coordinator;
pub mod views;
mod websocket;
pub mod ws_protocol;

pub use command_effects::{CommandEffectTable, ViewKind, INITIAL_VIEWS, UPDATE_VIEWS};
pub use server_bootstrap::{
    build_console_router, run_console_server, ConsoleServerConfig, ConsoleServerState,
    CONSOLE_WS_ENDPOINT, DEFAULT_CONSOLE_BIND,
};
pub use session_coordinator::{forward_command_events, OutboundSink, SessionClosed, SessionCoordinator};
pub use views::ControlPlaneRepoResolver;
pub use ws_protocol::{parse_console_request, ConsoleRequest, ConsoleResponseFrame};
