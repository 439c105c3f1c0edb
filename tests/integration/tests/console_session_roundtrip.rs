use std::{
    net::SocketAddr,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use ccr_config::{extract_clusters_default, decode_hcl_body};
use ccr_gateway::{
    build_console_router, CommandEffectTable, ConsoleServerState, SessionCoordinator,
    CONSOLE_WS_ENDPOINT,
};
use ccr_runtime::{CcrControlPlane, ClusterTool, ClusterToolConfig, CommandRunOptions};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message as ClientWsMessage};

type ClientSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const CLUSTERS_TF: &str = r#"locals {
  owner = "platform"
}

variable "clusters" {
  description = "Cluster definitions keyed by name"
  type        = any
  default     = {
    prod = {
      region    = "eu-west-1"
      workers   = 5
      labels    = ["critical", "eu"]
    }
    dev = {
      region  = "eu-west-1"
      workers = 1
    }
  }
}

# trailing content must survive rewrites
output "cluster_names" {
  value = keys(var.clusters)
}
"#;

const NODES_JSON: &str = r#"{"items": [
  {"metadata": {"name": "cp-1", "creationTimestamp": "2024-05-01T08:00:00Z",
    "labels": {"node-role.kubernetes.io/control-plane": ""}},
   "status": {"conditions": [{"type": "Ready", "status": "True"}]}},
  {"metadata": {"name": "worker-1", "labels": {}},
   "status": {"conditions": [{"type": "Ready", "status": "False"}]}}
]}"#;

struct ClusterSandbox {
    _root: tempfile::TempDir,
    repo: PathBuf,
    ccr_bin: PathBuf,
}

impl ClusterSandbox {
    fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let repo = root.path().join("repo");
        std::fs::create_dir_all(repo.join("terraform")).expect("create terraform dir");
        std::fs::write(repo.join("terraform").join("clusters.tf"), CLUSTERS_TF)
            .expect("write clusters.tf");
        let state = root.path().join("state");
        std::fs::create_dir_all(&state).expect("create state dir");
        std::fs::write(state.join("context"), "kind-dev\n").expect("seed context");

        let script = format!(
            r#"#!/bin/sh
case "$1" in
  get-repo-path) echo "{repo}" ;;
  ctx)
    if [ -n "$2" ]; then
      echo "$2" > "{state}/context"
      echo "Switched to context $2"
    else
      cat "{state}/context"
    fi
    ;;
  list-nodes) cat <<'JSON'
{nodes}
JSON
  ;;
  tofu)
    echo "Plan: 0 to add, 1 to change, 0 to destroy."
    echo "tofu: provider warning" >&2
    echo "Apply complete!"
    ;;
  *) echo "unknown command: $1" >&2; exit 3 ;;
esac
"#,
            repo = repo.display(),
            state = state.display(),
            nodes = NODES_JSON,
        );
        let ccr_bin = root.path().join("ccr");
        std::fs::write(&ccr_bin, script).expect("write fake ccr");
        let mut permissions = std::fs::metadata(&ccr_bin).expect("metadata").permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&ccr_bin, permissions).expect("chmod fake ccr");

        Self {
            _root: root,
            repo,
            ccr_bin,
        }
    }

    fn clusters_file(&self) -> PathBuf {
        self.repo.join("terraform").join("clusters.tf")
    }

    fn coordinator(&self) -> SessionCoordinator {
        let control_plane = Arc::new(CcrControlPlane::new(
            ClusterTool::new(ClusterToolConfig {
                program: self.ccr_bin.display().to_string(),
                ..ClusterToolConfig::default()
            }),
            Some(self.repo.join("missing-kubeconfig")),
            CommandRunOptions {
                working_dir: None,
                timeout: Some(Duration::from_secs(30)),
            },
        ));
        SessionCoordinator::with_control_plane(control_plane, CommandEffectTable::default())
    }
}

async fn spawn_console(sandbox: &ClusterSandbox, static_dir: &Path) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    let state = Arc::new(ConsoleServerState::new(
        sandbox.coordinator(),
        static_dir.to_path_buf(),
    ));
    let app = build_console_router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    addr
}

async fn connect(addr: SocketAddr) -> ClientSocket {
    let (socket, _) = connect_async(format!("ws://{addr}{CONSOLE_WS_ENDPOINT}"))
        .await
        .expect("connect websocket");
    socket
}

async fn send_json(socket: &mut ClientSocket, value: Value) {
    socket
        .send(ClientWsMessage::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

async fn recv_json(socket: &mut ClientSocket) -> Value {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let message = socket
                .next()
                .await
                .expect("websocket closed early")
                .expect("read frame");
            match message {
                ClientWsMessage::Text(text) => {
                    return serde_json::from_str::<Value>(text.as_str()).expect("json frame");
                }
                ClientWsMessage::Ping(payload) => {
                    socket
                        .send(ClientWsMessage::Pong(payload))
                        .await
                        .expect("send pong");
                }
                ClientWsMessage::Close(_) => panic!("websocket closed before json frame"),
                _ => continue,
            }
        }
    })
    .await
    .expect("frame before timeout")
}

/// Reads frames up to and including `command_end`.
async fn recv_until_command_end(socket: &mut ClientSocket) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = recv_json(socket).await;
        let done = frame["type"] == json!("command_end");
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

fn frames_of_type<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
    frames.iter().filter(|frame| frame["type"] == json!(kind)).collect()
}

#[tokio::test]
async fn integration_initial_data_reflects_repository_and_tool_state() {
    let sandbox = ClusterSandbox::new();
    let addr = spawn_console(&sandbox, &sandbox.repo).await;
    let mut socket = connect(addr).await;

    send_json(&mut socket, json!({"type": "get_initial_data", "payload": {}})).await;
    let clusters = recv_json(&mut socket).await;
    let contexts = recv_json(&mut socket).await;
    let context = recv_json(&mut socket).await;
    let nodes = recv_json(&mut socket).await;

    assert_eq!(clusters["type"], json!("tf_clusters"));
    assert_eq!(clusters["data"]["prod"]["labels"], json!(["critical", "eu"]));
    assert_eq!(contexts, json!({"type": "kube_contexts_list", "data": []}));
    assert_eq!(context, json!({"type": "current_context", "data": "kind-dev"}));
    assert_eq!(
        nodes["data"],
        json!([
            {"name": "cp-1", "status": "Ready", "roles": "control-plane", "age": "2024-05-01T08:00:00Z"},
            {"name": "worker-1", "status": "NotReady", "roles": "worker", "age": "N/A"}
        ])
    );
}

#[tokio::test]
async fn integration_update_cluster_rewrites_file_streams_apply_and_refreshes() {
    let sandbox = ClusterSandbox::new();
    let addr = spawn_console(&sandbox, &sandbox.repo).await;
    let mut socket = connect(addr).await;

    send_json(
        &mut socket,
        json!({
            "type": "update_tf_cluster",
            "payload": {
                "cluster_name": "dev",
                "config": {"region": "us-east-1", "workers": 2, "spot": true}
            }
        }),
    )
    .await;

    let frames = recv_until_command_end(&mut socket).await;
    assert_eq!(
        frames[0],
        json!({"type": "log", "data": "Updated configuration for dev."})
    );
    let logs = frames_of_type(&frames[1..], "log");
    assert_eq!(
        logs.iter().map(|frame| frame["data"].clone()).collect::<Vec<_>>(),
        vec![
            json!("Plan: 0 to add, 1 to change, 0 to destroy."),
            json!("Apply complete!")
        ]
    );
    assert_eq!(frames_of_type(&frames, "log_error").len(), 1);
    let command_end = frames.last().expect("command_end");
    let summary = command_end["data"].as_str().expect("summary");
    assert!(summary.starts_with("Command finished: "), "{summary}");
    assert!(summary.ends_with("tofu apply -auto-approve"), "{summary}");

    let clusters = recv_json(&mut socket).await;
    assert_eq!(clusters["type"], json!("tf_clusters"));
    assert_eq!(
        clusters["data"]["dev"],
        json!({"region": "us-east-1", "workers": 2, "spot": true})
    );
    let nodes = recv_json(&mut socket).await;
    assert_eq!(nodes["type"], json!("nodes_list"));

    let on_disk = std::fs::read_to_string(sandbox.clusters_file()).expect("read clusters.tf");
    assert!(on_disk.starts_with("locals {\n  owner = \"platform\"\n}\n"));
    assert!(on_disk.ends_with(
        "\n# trailing content must survive rewrites\noutput \"cluster_names\" {\n  value = keys(var.clusters)\n}\n"
    ));
    let decoded = decode_hcl_body(&on_disk).expect("rewritten file decodes");
    let clusters = extract_clusters_default(&decoded).expect("clusters default");
    assert_eq!(clusters["prod"]["workers"], json!(5));
    assert_eq!(clusters["dev"]["spot"], json!(true));
}

#[tokio::test]
async fn integration_update_unknown_cluster_leaves_file_untouched() {
    let sandbox = ClusterSandbox::new();
    let addr = spawn_console(&sandbox, &sandbox.repo).await;
    let mut socket = connect(addr).await;

    send_json(
        &mut socket,
        json!({"type": "update_tf_cluster", "payload": {"cluster_name": "qa", "config": {"workers": 1}}}),
    )
    .await;
    assert_eq!(
        recv_json(&mut socket).await,
        json!({"type": "log_error", "data": "Cluster 'qa' not found in configuration."})
    );

    // Nothing else was queued: the next response belongs to the next request.
    send_json(&mut socket, json!({"type": "get_nodes"})).await;
    assert_eq!(recv_json(&mut socket).await["type"], json!("nodes_list"));
    assert_eq!(
        std::fs::read_to_string(sandbox.clusters_file()).expect("read clusters.tf"),
        CLUSTERS_TF
    );
}

#[tokio::test]
async fn integration_context_switch_refreshes_context_views() {
    let sandbox = ClusterSandbox::new();
    let addr = spawn_console(&sandbox, &sandbox.repo).await;
    let mut socket = connect(addr).await;

    send_json(
        &mut socket,
        json!({"type": "run_command", "payload": {"command": "ctx", "args": ["prod-eu"]}}),
    )
    .await;
    let frames = recv_until_command_end(&mut socket).await;
    assert_eq!(
        frames[0],
        json!({"type": "log", "data": "Switched to context prod-eu"})
    );

    assert_eq!(
        recv_json(&mut socket).await,
        json!({"type": "current_context", "data": "prod-eu"})
    );
    assert_eq!(recv_json(&mut socket).await["type"], json!("nodes_list"));
    assert_eq!(recv_json(&mut socket).await["type"], json!("tf_clusters"));
}

#[tokio::test]
async fn integration_failing_subcommand_reports_stderr_and_exit_code() {
    let sandbox = ClusterSandbox::new();
    let addr = spawn_console(&sandbox, &sandbox.repo).await;
    let mut socket = connect(addr).await;

    send_json(
        &mut socket,
        json!({"type": "run_command", "payload": {"command": "explode"}}),
    )
    .await;
    let frames = recv_until_command_end(&mut socket).await;
    assert_eq!(
        frames[0],
        json!({"type": "log_error", "data": "unknown command: explode"})
    );
    let summary = frames[1]["data"].as_str().expect("summary");
    assert!(summary.ends_with("(exit code 3)"), "{summary}");

    send_json(&mut socket, json!({"type": "get_nodes"})).await;
    assert_eq!(recv_json(&mut socket).await["type"], json!("nodes_list"));
}
