//! Spawning and supervising one capture-tool process.
//!
//! Output is read line by line from both pipes and forwarded as
//! [`ProcessEvent`]s; the orchestrator never touches the child directly. A
//! [`ProcessHandle`] is the only way to stop it.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::args::{FlagError, LinkError};

/// How long to wait for the pipes to drain after the process is gone.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Everything a supervised process reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output {
        id: String,
        stream: OutputStream,
        line: String,
        at: Instant,
    },
    /// Sent once, after both pipes are drained. `code` is `None` when the
    /// process died from a signal.
    Exited { id: String, code: Option<i32> },
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("invalid extra flags: {0}")]
    Flags(#[from] FlagError),
    #[error("create working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Fully built invocation.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub id: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub dir: PathBuf,
    /// Time between SIGTERM and a forced kill.
    pub kill_grace: Duration,
}

/// Control side of a supervised process.
///
/// Dropping the handle also stops the process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stop_tx: mpsc::UnboundedSender<()>,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, stop_tx: mpsc::UnboundedSender<()>) -> Self {
        Self { pid, stop_tx }
    }

    /// A handle not attached to any real process. The receiver sees every
    /// termination request; dropping it marks the "process" as exited.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(None, tx), rx)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask for graceful termination. Returns false if the process is already gone.
    pub fn terminate(&self) -> bool {
        self.stop_tx.send(()).is_ok()
    }

    pub fn has_exited(&self) -> bool {
        self.stop_tx.is_closed()
    }
}

/// Starts capture processes. Implemented by [`ToolLauncher`] and by test fakes.
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        request: LaunchRequest,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<ProcessHandle, LaunchError>;
}

/// Runs the real external tool with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolLauncher;

impl Launcher for ToolLauncher {
    fn launch(
        &self,
        request: LaunchRequest,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<ProcessHandle, LaunchError> {
        std::fs::create_dir_all(&request.dir).map_err(|source| LaunchError::WorkDir {
            path: request.dir.clone(),
            source,
        })?;

        let mut child = Command::new(&request.program)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: request.program.display().to_string(),
                source,
            })?;
        let pid = child.id();
        tracing::info!(download_id = %request.id, pid, "capture tool started");

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_line_reader(
                out,
                request.id.clone(),
                OutputStream::Stdout,
                events.clone(),
            ));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_line_reader(
                err,
                request.id.clone(),
                OutputStream::Stderr,
                events.clone(),
            ));
        }

        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        tokio::spawn(supervise(
            child,
            request.id,
            stop_rx,
            request.kill_grace,
            readers,
            events,
        ));
        Ok(ProcessHandle::new(pid, stop_tx))
    }
}

/// Byte-based line reader: invalid UTF-8 is decoded lossily instead of
/// ending the stream.
fn spawn_line_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    id: String,
    kind: OutputStream,
    events: mpsc::UnboundedSender<ProcessEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    tracing::debug!(download_id = %id, stream = kind.as_str(), "{}", line);
                    let event = ProcessEvent::Output {
                        id: id.clone(),
                        stream: kind,
                        line,
                        at: Instant::now(),
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(download_id = %id, stream = kind.as_str(), "output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

async fn supervise(
    mut child: Child,
    id: String,
    mut stop_rx: mpsc::UnboundedReceiver<()>,
    kill_grace: Duration,
    readers: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = stop_rx.recv() => {
            tracing::info!(download_id = %id, "terminating capture tool");
            terminate(&mut child, kill_grace, &id).await
        }
    };

    for reader in readers {
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
            tracing::debug!(download_id = %id, "output reader did not finish after exit");
        }
    }

    let code = match status {
        Ok(s) => s.code(),
        Err(e) => {
            tracing::warn!(download_id = %id, "wait for capture tool: {}", e);
            None
        }
    };
    tracing::info!(download_id = %id, ?code, "capture tool exited");
    let _ = events.send(ProcessEvent::Exited { id, code });
}

/// SIGTERM, then a forced kill if the process outlives `grace`.
async fn terminate(child: &mut Child, grace: Duration, id: &str) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => return status,
                Err(_) => {
                    tracing::warn!(download_id = %id, "capture tool ignored SIGTERM for {:?}; killing", grace)
                }
            },
            Err(nix::errno::Errno::ESRCH) => return child.wait().await,
            Err(e) => tracing::debug!(download_id = %id, "SIGTERM failed: {}", e),
        }
    }
    #[cfg(not(unix))]
    let _ = (grace, id);

    child.kill().await?;
    child.wait().await
}
