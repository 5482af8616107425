//! [`PipeServer`] and [`PipeClient`]: a named-pipe (FIFO) transport with one
//! inbound and one outbound channel per connection, mirroring the Python
//! original's `os.mkfifo`-based server/client pair but built on
//! `tokio::net::unix::pipe` instead of a hand-rolled non-blocking reader
//! thread — `tokio`'s reactor already multiplexes FIFO readiness, so the
//! scaling-backoff reconnect loop only has to handle "writer went away and
//! came back", not raw `EAGAIN` polling.

use crate::envelope::{IpcRequest, IpcResponse};
use crate::error::RelayError;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

fn make_fifo(path: &Path) -> Result<(), RelayError> {
    mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|e| RelayError::PipeUnavailable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// The server half of a relay channel: reads lines from `{id}.in` and
/// delivers them to `on_message`; queues outbound lines to `{id}.out` once a
/// client opens it for reading.
pub struct PipeServer {
    /// Channel identifier, also the FIFO file stem.
    pub id: String,
    server_path: PathBuf,
    client_path: PathBuf,
    outgoing: mpsc::UnboundedSender<String>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

/// A cheaply-cloneable handle for replying on a [`PipeServer`]'s outbound
/// FIFO from inside its message callback, mirroring the Python original's
/// callback signature `(self, line)` which closes over `self.Send`.
#[derive(Clone)]
pub struct ReplySender(mpsc::UnboundedSender<String>);

impl ReplySender {
    /// Queue a line for delivery on the channel this callback was invoked
    /// from.
    pub fn send(&self, msg: impl Into<String>) {
        let _ = self.0.send(msg.into());
    }
}

impl PipeServer {
    /// Create the server's inbound FIFO and start reading from it,
    /// delivering each trimmed line, plus a handle for replying on the same
    /// channel, to `on_message`. `overwrite` removes a stale FIFO left by a
    /// previous, uncleanly-terminated run.
    pub async fn open(
        io_dir: &Path,
        id: impl Into<String>,
        overwrite: bool,
        on_message: impl Fn(String, ReplySender) + Send + Sync + 'static,
    ) -> Result<Self, RelayError> {
        let id = id.into();
        let server_path = io_dir.join(format!("{id}.in"));
        let client_path = io_dir.join(format!("{id}.out"));

        if overwrite && server_path.exists() {
            let _ = std::fs::remove_file(&server_path);
        }
        make_fifo(&server_path)?;

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

        let reader_path = server_path.clone();
        let reply = ReplySender(outgoing_tx.clone());
        let reader_task = tokio::spawn(async move {
            loop {
                let receiver = match pipe::OpenOptions::new().open_receiver(&reader_path) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(path = %reader_path.display(), error = %e, "failed to open server fifo for reading");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        continue;
                    }
                };
                let mut lines = BufReader::new(receiver).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let trimmed = line.trim_end_matches(['\n', '\r']).to_string();
                            if !trimmed.is_empty() {
                                on_message(trimmed, reply.clone());
                            }
                        }
                        Ok(None) => break, // writer closed; reopen
                        Err(e) => {
                            warn!(error = %e, "server fifo read error");
                            break;
                        }
                    }
                }
            }
        });

        let writer_path = client_path.clone();
        let writer_task = tokio::spawn(async move {
            let mut sender: Option<pipe::Sender> = None;
            while let Some(msg) = outgoing_rx.recv().await {
                if sender.is_none() {
                    if !writer_path.exists() {
                        continue; // no client listening yet; drop (matches teacher's buffered-send best-effort semantics)
                    }
                    sender = pipe::OpenOptions::new().open_sender(&writer_path).ok();
                }
                if let Some(s) = sender.as_mut() {
                    let line = format!("{msg}\n");
                    if s.write_all(line.as_bytes()).await.is_err() {
                        sender = None;
                    }
                }
            }
        });

        Ok(Self {
            id,
            server_path,
            client_path,
            outgoing: outgoing_tx,
            reader_task,
            writer_task,
        })
    }

    /// Queue a line for delivery to whatever client currently has this
    /// channel's outbound FIFO open for reading.
    pub fn send(&self, msg: impl Into<String>) {
        let _ = self.outgoing.send(msg.into());
    }

    /// Whether the server's inbound FIFO still exists on disk.
    pub fn is_open(&self) -> bool {
        self.server_path.exists()
    }

    /// Whether a client's outbound FIFO (the peer this channel would reply
    /// to) currently exists on disk. Used by the reaper to recognize a
    /// channel whose client has gone away without a clean disconnect.
    pub fn has_peer(&self) -> bool {
        self.client_path.exists()
    }

    /// Stop reading/writing and remove the inbound FIFO from disk.
    pub async fn dispose(self) {
        self.reader_task.abort();
        self.writer_task.abort();
        let _ = std::fs::remove_file(&self.server_path);
    }
}

/// The client half of a relay channel: connects to a server's `{id}.in`
/// FIFO and opens its own `{id}.out` FIFO for the server to reply on.
pub struct PipeClient {
    client_path: PathBuf,
    sender: Mutex<pipe::Sender>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<IpcResponse>>>>,
    reader_task: JoinHandle<()>,
}

impl PipeClient {
    /// Connect to a running [`PipeServer`] at `server_path` (its `.in`
    /// FIFO), waiting up to `timeout` for any stale `.out` FIFO from a prior
    /// client to clear before claiming it.
    pub async fn connect(server_path: &Path, timeout: Duration) -> Result<Self, RelayError> {
        let id = server_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let io_dir = server_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let client_path = io_dir.join(format!("{id}.out"));

        let deadline = tokio::time::Instant::now() + timeout;
        while client_path.exists() {
            if tokio::time::Instant::now() >= deadline {
                return Err(RelayError::ConnectTimeout {
                    path: client_path.display().to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let sender = pipe::OpenOptions::new()
            .open_sender(server_path)
            .map_err(|e| RelayError::PipeUnavailable {
                path: server_path.display().to_string(),
                reason: e.to_string(),
            })?;
        make_fifo(&client_path)?;
        let receiver =
            pipe::OpenOptions::new()
                .open_receiver(&client_path)
                .map_err(|e| RelayError::PipeUnavailable {
                    path: client_path.display().to_string(),
                    reason: e.to_string(),
                })?;

        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<IpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_for_task = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(receiver).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim_end_matches(['\n', '\r']);
                        if trimmed.is_empty() {
                            continue;
                        }
                        match IpcResponse::parse(trimmed) {
                            Ok(resp) => {
                                let mut pending = pending_for_task.lock().await;
                                if let Some(tx) = pending.remove(&resp.message_id) {
                                    let _ = tx.send(resp);
                                }
                            }
                            Err(e) => debug!(error = %e, "dropping unparseable relay response"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "client fifo read error");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            client_path,
            sender: Mutex::new(sender),
            pending,
            reader_task,
        })
    }

    /// Send a request and await its matching response by `message_id`,
    /// failing after `timeout`. Unlike the Python original (which tracks a
    /// single in-flight response at a time), requests are correlated by id
    /// in a pending map, so multiple transactions may be in flight
    /// concurrently on the same client.
    pub async fn transact(
        &self,
        req: IpcRequest,
        timeout: Duration,
    ) -> Result<IpcResponse, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(req.message_id.clone(), tx);
        let line = format!("{}\n", req.to_line()?);
        {
            let mut sender = self.sender.lock().await;
            sender
                .write_all(line.as_bytes())
                .await
                .map_err(|e| RelayError::PipeUnavailable {
                    path: "client sender".into(),
                    reason: e.to_string(),
                })?;
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(RelayError::Timeout),
            Err(_) => {
                self.pending.lock().await.remove(&req.message_id);
                Err(RelayError::Timeout)
            }
        }
    }

    /// Whether this client's outbound (`.out`) FIFO still exists on disk.
    pub fn is_open(&self) -> bool {
        self.client_path.exists()
    }

    /// Stop reading and remove the outbound FIFO from disk.
    pub async fn dispose(self) {
        self.reader_task.abort();
        let _ = std::fs::remove_file(&self.client_path);
    }
}

/// A one-way writer to some other channel's inbound FIFO, used to tee a
/// [`crate::shell::LiveShell`]'s output into a listener that registered
/// itself from across the relay boundary. Lazily opens its sender and drops
/// it on write failure, same best-effort semantics as [`PipeServer`]'s
/// outbound half.
pub struct PipeWriter {
    outgoing: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl PipeWriter {
    /// Start writing to the FIFO at `path`, which need not exist yet.
    pub fn connect(path: PathBuf) -> Self {
        let (outgoing, mut rx) = mpsc::unbounded_channel::<String>();
        let task = tokio::spawn(async move {
            let mut sender: Option<pipe::Sender> = None;
            while let Some(msg) = rx.recv().await {
                if sender.is_none() {
                    if !path.exists() {
                        continue;
                    }
                    sender = pipe::OpenOptions::new().open_sender(&path).ok();
                }
                if let Some(s) = sender.as_mut() {
                    let line = format!("{msg}\n");
                    if s.write_all(line.as_bytes()).await.is_err() {
                        sender = None;
                    }
                }
            }
        });
        Self { outgoing, task }
    }

    /// A cloneable handle that can be used to queue lines synchronously from
    /// outside an async context (e.g. from a [`crate::shell::Listener`]).
    pub fn clone_sender(&self) -> mpsc::UnboundedSender<String> {
        self.outgoing.clone()
    }

    /// Queue a line for delivery.
    pub fn send(&self, msg: impl Into<String>) {
        let _ = self.outgoing.send(msg.into());
    }

    /// Stop the writer task.
    pub fn dispose(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn server_delivers_lines_to_callback() {
        let dir = tempfile::tempdir().unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        let server = PipeServer::open(dir.path(), "test", true, move |_line, _reply| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert!(server.is_open());

        let server_path = dir.path().join("test.in");
        let mut sender = tokio::net::unix::pipe::OpenOptions::new()
            .open_sender(&server_path)
            .unwrap();
        sender.write_all(b"hello\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);

        server.dispose().await;
    }

    #[tokio::test]
    async fn client_connects_and_transacts() {
        let dir = tempfile::tempdir().unwrap();
        let server = PipeServer::open(dir.path(), "chan", true, move |line, reply| {
            let req: IpcRequest = serde_json::from_str(&line).unwrap();
            let resp = IpcResponse::ok(req.message_id, serde_json::json!({"echo": true}));
            reply.send(resp.to_line().unwrap());
        })
        .await
        .unwrap();

        let server_path = dir.path().join("chan.in");
        let client = PipeClient::connect(&server_path, Duration::from_secs(2))
            .await
            .unwrap();
        let resp = client
            .transact(
                IpcRequest::new("ping", serde_json::json!({})),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert!(resp.is_success());

        client.dispose().await;
        server.dispose().await;
    }
}
