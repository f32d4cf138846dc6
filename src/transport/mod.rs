//! The remote command/file transport consumed by the scheduler.
//!
//! The scheduler never talks to the cluster directly; every remote effect
//! goes through a [`RemoteExecutor`]. The executor is expected to reconnect
//! transparently: `ensure_connected` is called at the start of every tick and
//! a failure only skips that tick.

pub mod local;

use std::pin::Pin;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// A single remote command execution, exposing the command's stdout as a
/// sequence of lines.
pub struct CommandChannel {
    reader: Pin<Box<dyn AsyncBufRead + Send>>,
}

impl CommandChannel {
    pub fn new(reader: impl AsyncBufRead + Send + 'static) -> Self {
        Self {
            reader: Box::pin(reader),
        }
    }

    /// Channel whose output is a fixed set of lines. Used by transports that
    /// buffer the whole response, and by tests.
    pub fn from_lines(lines: Vec<String>) -> Self {
        let data = lines.join("\n").into_bytes();
        Self::new(tokio::io::BufReader::new(std::io::Cursor::new(data)))
    }

    /// Read the next output line, without its terminator.
    /// `Ok(None)` marks the end of the output.
    pub async fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Drain the channel, collecting all remaining output lines.
    pub async fn read_all(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.read_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }
}

/// Executes commands and transfers files on the cluster's login node.
///
/// Implementations must make `open_channel` and `ensure_connected` reconnect
/// on demand; the scheduler treats their failures as transient.
pub trait RemoteExecutor: Send {
    /// Check connectivity, re-establishing the session if needed.
    fn ensure_connected(&mut self) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Start `command` remotely and return a channel over its stdout.
    fn open_channel(&mut self, command: String) -> BoxFuture<'_, anyhow::Result<CommandChannel>>;

    /// Upload a local file to the same relative path on the remote side.
    fn upload_file(&mut self, local_path: String) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Make sure a remote directory exists. Returns `true` when it already
    /// existed or was created.
    fn ensure_directory(&mut self, remote_dir: String) -> BoxFuture<'_, anyhow::Result<bool>>;
}
