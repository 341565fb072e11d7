//! Stdio transport: line-delimited JSON over a child process's pipes.
//!
//! Spawns the configured command with piped stdin/stdout (stderr is
//! inherited so the child's diagnostics reach the host's stderr), frames
//! outbound envelopes as one JSON object per `\n`-terminated line, and
//! reassembles inbound lines across partial reads via [`LinesCodec`].
//!
//! Shutdown escalates through three stages: close stdin, then SIGTERM,
//! then SIGKILL, with a configurable wait between each.

use std::collections::HashMap;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use async_trait::async_trait;
use harbormcp_protocol::{JsonRpcMessage, validate_message};

use crate::error::{TransportError, TransportResult};
use crate::traits::{EVENT_CHANNEL_CAPACITY, Transport, TransportEvent};

type BoxedReader = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;
type BoxedWriter = Pin<Box<dyn AsyncWrite + Send + Sync + 'static>>;
type LineWriter = FramedWrite<BoxedWriter, LinesCodec>;

/// How many characters of a malformed inbound line are logged.
const MALFORMED_LINE_PREVIEW: usize = 160;

/// Stdio transport configuration.
#[derive(Debug, Clone)]
pub struct StdioConfig {
    /// Command to spawn
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment for the child; `None` inherits the caller's environment
    pub env: Option<HashMap<String, String>>,
    /// Wait after closing stdin before escalating to SIGTERM
    pub graceful_timeout: Duration,
    /// Wait after SIGTERM before escalating to SIGKILL
    pub sigterm_timeout: Duration,
}

impl StdioConfig {
    /// Configuration for `command` with default timeouts (5 s per stage).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: None,
            graceful_timeout: Duration::from_secs(5),
            sigterm_timeout: Duration::from_secs(5),
        }
    }

    /// Append arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

enum StreamSource {
    /// Spawn the configured command on `start`
    Spawn,
    /// Use pre-supplied raw streams (in-process pipes, tests)
    Raw {
        reader: Option<BoxedReader>,
        writer: Option<BoxedWriter>,
    },
}

/// Stdio transport over a spawned child process or raw stream pair.
pub struct StdioTransport {
    config: StdioConfig,
    source: StreamSource,
    child: Option<Child>,
    writer: TokioMutex<Option<LineWriter>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.config.command)
            .field("args", &self.config.args)
            .field("spawned", &self.child.is_some())
            .finish()
    }
}

impl StdioTransport {
    /// Create a transport that will spawn `config.command` on `start`.
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            source: StreamSource::Spawn,
            child: None,
            writer: TokioMutex::new(None),
            reader_task: None,
        }
    }

    /// Create a transport over raw async streams.
    ///
    /// `reader` is what we read inbound envelopes from (the peer's stdout);
    /// `writer` is what we write outbound envelopes to (the peer's stdin).
    pub fn from_raw<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
        W: AsyncWrite + Send + Sync + 'static,
    {
        Self {
            config: StdioConfig::new("<raw>"),
            source: StreamSource::Raw {
                reader: Some(Box::pin(reader)),
                writer: Some(Box::pin(writer)),
            },
            child: None,
            writer: TokioMutex::new(None),
            reader_task: None,
        }
    }

    fn spawn_child(&mut self) -> TransportResult<(BoxedReader, BoxedWriter)> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(env) = &self.config.env {
            command.env_clear();
            command.envs(env);
        }

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {e}", self.config.command)))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Configuration("child process stdin was not piped".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Configuration("child process stdout was not piped".to_string())
        })?;

        debug!(command = %self.config.command, pid = child.id(), "spawned child process");
        self.child = Some(child);
        Ok((Box::pin(stdout), Box::pin(stdin)))
    }

    fn send_sigterm(child: &Child) {
        if let Some(pid) = child.id() {
            // SAFETY: plain kill(2) on a pid this transport spawned
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                warn!(pid, "SIGTERM delivery failed; process may have already exited");
            }
        }
    }

    /// Stage the child down: close stdin, SIGTERM, SIGKILL.
    async fn escalate_shutdown(&mut self, mut child: Child) -> TransportResult<()> {
        // Stage 1: closing stdin signals a graceful exit
        {
            let mut writer = self.writer.lock().await;
            if let Some(mut w) = writer.take() {
                if let Err(e) = SinkExt::<String>::close(&mut w).await {
                    warn!(error = %e, "Failed to close stdin stream");
                }
            }
        }

        match timeout(self.config.graceful_timeout, child.wait()).await {
            Ok(Ok(_status)) => {
                info!("Process exited gracefully after stdin close");
                return Ok(());
            }
            Ok(Err(e)) => {
                return Err(TransportError::Shutdown(format!(
                    "waiting for child failed: {e}"
                )));
            }
            Err(_elapsed) => {}
        }

        // Stage 2: SIGTERM
        Self::send_sigterm(&child);
        match timeout(self.config.sigterm_timeout, child.wait()).await {
            Ok(Ok(_status)) => {
                info!("Process exited after SIGTERM");
                return Ok(());
            }
            Ok(Err(e)) => {
                return Err(TransportError::Shutdown(format!(
                    "waiting for child failed: {e}"
                )));
            }
            Err(_elapsed) => {}
        }

        // Stage 3: SIGKILL
        match child.start_kill() {
            Ok(()) => {
                let _ = child.wait().await;
                warn!("Force killed process with SIGKILL");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "SIGKILL delivery failed");
                Err(TransportError::Shutdown(format!("SIGKILL failed: {e}")))
            }
        }
    }
}

fn line_preview(line: &str) -> String {
    if line.chars().count() > MALFORMED_LINE_PREVIEW {
        let truncated: String = line.chars().take(MALFORMED_LINE_PREVIEW).collect();
        format!("{truncated}…")
    } else {
        line.to_string()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&mut self) -> TransportResult<mpsc::Receiver<TransportEvent>> {
        if self.reader_task.is_some() {
            return Err(TransportError::Configuration(
                "stdio transport already started".to_string(),
            ));
        }

        let raw_streams = match &mut self.source {
            StreamSource::Spawn => None,
            StreamSource::Raw { reader, writer } => {
                let reader = reader.take().ok_or_else(|| {
                    TransportError::Configuration("raw reader stream already consumed".to_string())
                })?;
                let writer = writer.take().ok_or_else(|| {
                    TransportError::Configuration("raw writer stream already consumed".to_string())
                })?;
                Some((reader, writer))
            }
        };
        let (reader, writer) = match raw_streams {
            Some(streams) => streams,
            None => self.spawn_child()?,
        };

        *self.writer.lock().await = Some(FramedWrite::new(writer, LinesCodec::new()));

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut lines = FramedRead::new(BufReader::new(reader), LinesCodec::new());

        let task = tokio::spawn(async move {
            while let Some(item) = lines.next().await {
                match item {
                    Ok(line) => match validate_message(&line) {
                        Ok(message) => {
                            if tx.send(TransportEvent::Message(message)).await.is_err() {
                                debug!("event channel closed, stopping stdio reader task");
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                line = %line_preview(&line),
                                "received malformed JSON message from child process"
                            );
                        }
                    },
                    Err(e) => {
                        let _ = tx
                            .send(TransportEvent::Closed {
                                reason: Some(format!("read failed: {e}")),
                            })
                            .await;
                        return;
                    }
                }
            }
            let _ = tx
                .send(TransportEvent::Closed {
                    reason: Some("child process closed stdout".to_string()),
                })
                .await;
        });
        self.reader_task = Some(task);

        Ok(rx)
    }

    async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        let line = message
            .to_json()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer
            .send(line)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn shutdown(&mut self) -> TransportResult<()> {
        let result = match self.child.take() {
            Some(child) => self.escalate_shutdown(child).await,
            None => {
                // Raw streams: dropping the writer closes the pipe
                *self.writer.lock().await = None;
                Ok(())
            }
        };

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        result
    }

    fn endpoint(&self) -> String {
        format!("stdio://{}", self.config.command)
    }
}
