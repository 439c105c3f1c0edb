//! Streams the output of one external process as ordered events.
//!
//! Standard output and standard error are drained concurrently by two reader
//! tasks. Lines from one channel keep their order; the two channels interleave
//! in arrival order. Both readers and the process exit are joined before the
//! single terminal [`CommandEvent::CommandEnd`] is sent.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

const COMMAND_EVENT_BUFFER: usize = 256;
const READER_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Program plus argument vector. No shell is involved.
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Splits a shell-style command line into program and arguments.
    pub fn parse(command_line: &str) -> Result<Self, String> {
        let mut words = shell_words::split(command_line)
            .map_err(|error| format!("invalid command line '{command_line}': {error}"))?;
        if words.is_empty() {
            return Err("command line must be non-empty".to_string());
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }

    /// Renders the command line with shell quoting where needed.
    pub fn display(&self) -> String {
        shell_words::join(std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Per-invocation execution options.
pub struct CommandRunOptions {
    pub working_dir: Option<PathBuf>,
    /// Kill the process once this much time has passed.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Terminal summary of one invocation.
pub struct CommandOutcome {
    pub command_line: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub summary: String,
}

impl CommandOutcome {
    /// Outcome of an invocation that never produced a process.
    pub fn failed_to_start(command_line: String) -> Self {
        Self {
            summary: format!("Command failed to start: {command_line}"),
            command_line,
            exit_code: None,
            success: false,
            timed_out: false,
            duration_ms: 0,
        }
    }

    fn from_exit(
        command_line: String,
        exit_code: Option<i32>,
        timed_out: bool,
        timeout: Option<Duration>,
        duration_ms: u64,
    ) -> Self {
        let success = !timed_out && exit_code == Some(0);
        let summary = match (timed_out, exit_code) {
            (true, _) => format!(
                "Command timed out after {}s: {command_line}",
                timeout.unwrap_or_default().as_secs_f64()
            ),
            (false, Some(0)) => format!("Command finished: {command_line}"),
            (false, Some(code)) => format!("Command finished: {command_line} (exit code {code})"),
            (false, None) => format!("Command finished: {command_line} (terminated by signal)"),
        };
        Self {
            command_line,
            exit_code,
            success,
            timed_out,
            duration_ms,
            summary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One streamed item of a command invocation.
pub enum CommandEvent {
    Log(String),
    LogError(String),
    CommandEnd(CommandOutcome),
}

impl CommandEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CommandEnd(_))
    }
}

/// Finite, single-consumption stream of [`CommandEvent`]s.
pub struct CommandEventStream {
    inner: ReceiverStream<CommandEvent>,
}

impl CommandEventStream {
    /// Builds a stream that yields `events` and then ends.
    pub fn from_events(events: Vec<CommandEvent>) -> Self {
        let (sender, receiver) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers every event, so this never fails.
            let _ = sender.try_send(event);
        }
        Self {
            inner: ReceiverStream::new(receiver),
        }
    }

    /// Drains the stream into a vector.
    pub async fn collect_events(mut self) -> Vec<CommandEvent> {
        let mut events = Vec::new();
        while let Some(event) = futures_util::StreamExt::next(&mut self).await {
            events.push(event);
        }
        events
    }
}

impl Stream for CommandEventStream {
    type Item = CommandEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Starts `spec` and returns its event stream.
///
/// A spawn failure yields one `LogError` followed by a failed `CommandEnd`, so
/// every stream ends with exactly one terminal event. Dropping the stream does
/// not stop the process; its remaining output is discarded.
pub fn run_command(spec: CommandSpec, options: CommandRunOptions) -> CommandEventStream {
    let (sender, receiver) = mpsc::channel(COMMAND_EVENT_BUFFER);
    tokio::spawn(drive_command(spec, options, sender));
    CommandEventStream {
        inner: ReceiverStream::new(receiver),
    }
}

async fn drive_command(spec: CommandSpec, options: CommandRunOptions, sender: mpsc::Sender<CommandEvent>) {
    let command_line = spec.display();
    let started = Instant::now();

    let mut command = tokio::process::Command::new(&spec.program);
    command.args(&spec.args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(working_dir) = &options.working_dir {
        command.current_dir(working_dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => {
            tracing::warn!(command = %command_line, %error, "failed to spawn command");
            let _ = sender
                .send(CommandEvent::LogError(format!(
                    "Failed to execute command: {command_line}: {error}"
                )))
                .await;
            let _ = sender
                .send(CommandEvent::CommandEnd(CommandOutcome::failed_to_start(command_line)))
                .await;
            return;
        }
    };
    tracing::info!(command = %command_line, pid = ?child.id(), "command started");

    let stdout_reader = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(forward_lines(stdout, sender.clone(), CommandEvent::Log)));
    let stderr_reader = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(forward_lines(stderr, sender.clone(), CommandEvent::LogError)));

    let mut timed_out = false;
    let wait_result = match options.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                timed_out = true;
                let _ = child.start_kill();
                child.wait().await
            }
        },
        None => child.wait().await,
    };

    join_reader(stdout_reader, timed_out).await;
    join_reader(stderr_reader, timed_out).await;

    let exit_code = match wait_result {
        Ok(status) => status.code(),
        Err(error) => {
            let _ = sender
                .send(CommandEvent::LogError(format!(
                    "Failed to wait for command: {command_line}: {error}"
                )))
                .await;
            None
        }
    };
    if timed_out {
        let _ = sender
            .send(CommandEvent::LogError(format!(
                "Command exceeded its deadline and was killed: {command_line}"
            )))
            .await;
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let outcome = CommandOutcome::from_exit(
        command_line,
        exit_code,
        timed_out,
        options.timeout,
        duration_ms,
    );
    tracing::info!(
        command = %outcome.command_line,
        exit_code = ?outcome.exit_code,
        success = outcome.success,
        duration_ms = outcome.duration_ms,
        "command finished"
    );
    let _ = sender.send(CommandEvent::CommandEnd(outcome)).await;
}

/// Waits for a reader task. After a timeout kill, descendants may still hold
/// the pipe open, so the wait is bounded and the reader aborted.
async fn join_reader(reader: Option<JoinHandle<()>>, bounded: bool) {
    let Some(mut reader) = reader else {
        return;
    };
    if bounded {
        if tokio::time::timeout(READER_DRAIN_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
    } else {
        let _ = reader.await;
    }
}

async fn forward_lines<R>(reader: R, sender: mpsc::Sender<CommandEvent>, wrap: fn(String) -> CommandEvent)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    let mut receiver_open = true;
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                if !receiver_open {
                    continue;
                }
                let line = String::from_utf8_lossy(&buffer).trim_end().to_string();
                if sender.send(wrap(line)).await.is_err() {
                    // Keep draining so the child never blocks on a full pipe.
                    receiver_open = false;
                }
            }
            Err(error) => {
                if receiver_open {
                    let _ = sender
                        .send(CommandEvent::LogError(format!("failed to read command output: {error}")))
                        .await;
                }
                break;
            }
        }
    }
}
