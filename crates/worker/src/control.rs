//! Operator control events.
//!
//! Commands are read line by line from the terminal on a background task
//! and forwarded to the dispatcher over an `mpsc` channel. When stdin
//! closes the sender is dropped, which the dispatcher sees as a closed
//! control channel.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Buffer size of the control channel.
pub const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// One operator request to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Pause if running, resume if paused.
    TogglePause,
    Pause,
    Resume,
    /// Re-read the prompt file and replace the pending queue.
    Reload,
    /// Exit after the in-flight job. Only honoured while paused.
    Terminate,
    /// Log the current session state.
    Status,
}

impl ControlEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TogglePause => "toggle_pause",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Reload => "reload",
            Self::Terminate => "terminate",
            Self::Status => "status",
        }
    }

    /// Parse a terminal command. Returns `None` for unknown input.
    pub fn parse_command(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "p" => Some(Self::TogglePause),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "r" | "reload" => Some(Self::Reload),
            "q" | "quit" => Some(Self::Terminate),
            "s" | "status" => Some(Self::Status),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Help line logged at startup and on `help`.
pub const COMMAND_HELP: &str =
    "commands: p (pause/resume), r (reload prompt file), q (quit, while paused), s (status)";

/// Forward commands from `reader` until EOF or until the receiver is gone.
pub async fn forward_commands<R>(reader: R, tx: mpsc::Sender<ControlEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Control input closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read control input");
                break;
            }
        };

        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if matches!(command, "h" | "help" | "?") {
            tracing::info!("{COMMAND_HELP}");
            continue;
        }

        match ControlEvent::parse_command(command) {
            Some(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            None => tracing::warn!(input = command, "Unknown command; {COMMAND_HELP}"),
        }
    }
}

/// Spawn the stdin reader task.
pub fn spawn_stdin_reader(tx: mpsc::Sender<ControlEvent>) -> JoinHandle<()> {
    tokio::spawn(forward_commands(BufReader::new(tokio::io::stdin()), tx))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
