//! [`RelayServer`]: listens on a well-known "main" channel for `connect`
//! requests and spins up a dedicated channel plus [`LiveShell`] per
//! connecting client, mirroring the request handling the Python original's
//! `RemoteShell` expects on the other end of the wire (`bash`, `echo`,
//! `status`, `register_bash_listener`, `remove_bash_listener`, `shutdown`),
//! without a Python counterpart class of its own to ground directly on — the
//! original runs this side embedded in each compute site's agent loop rather
//! than as a standalone type.

use crate::envelope::{IpcRequest, IpcResponse};
use crate::error::RelayError;
use crate::pipe::{PipeServer, PipeWriter, ReplySender};
use crate::shell::{Listener, LiveShell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Channels older than this with no live peer are reaped.
const REAP_GRACE: Duration = Duration::from_secs(3);
const REAP_INTERVAL: Duration = Duration::from_secs(1);

struct Session {
    shell: LiveShell,
    tees: Mutex<HashMap<String, PipeWriter>>,
}

/// Accepts relay connections under `io_dir`, dispatching each client to its
/// own [`LiveShell`]-backed channel. A background reaper scans the channel
/// map once a second and disposes connections that have been stale (closed,
/// or with no peer FIFO left on disk) past a grace window; `shutdown`
/// flips the same flag the reaper watches to trigger orderly teardown.
pub struct RelayServer {
    main: Arc<Mutex<Option<PipeServer>>>,
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
    channels: Arc<Mutex<HashMap<String, PipeServer>>>,
    running: Arc<AtomicBool>,
    reaper: JoinHandle<()>,
}

impl RelayServer {
    /// Open the main channel at `io_dir/main.in` and start accepting
    /// `connect` requests.
    pub async fn start(io_dir: &Path) -> Result<Self, RelayError> {
        let sessions: Arc<Mutex<HashMap<String, Arc<Session>>>> = Arc::new(Mutex::new(HashMap::new()));
        let channels: Arc<Mutex<HashMap<String, PipeServer>>> = Arc::new(Mutex::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));

        let io_dir_owned = io_dir.to_path_buf();
        let sessions_for_cb = sessions.clone();
        let channels_for_cb = channels.clone();
        let running_for_cb = running.clone();
        let main = PipeServer::open(io_dir, "main", true, move |line, reply| {
            let sessions = sessions_for_cb.clone();
            let channels = channels_for_cb.clone();
            let io_dir = io_dir_owned.clone();
            let running = running_for_cb.clone();
            tokio::spawn(async move {
                handle_main_request(io_dir, sessions, channels, running, line, reply).await;
            });
        })
        .await?;

        let main = Arc::new(Mutex::new(Some(main)));
        let reaper = tokio::spawn(run_reaper(sessions.clone(), channels.clone(), main.clone(), running.clone()));

        Ok(Self { main, sessions, channels, running, reaper })
    }

    /// Open the main channel under the directory named by `cfg.io_dir`,
    /// creating it first if necessary.
    pub async fn start_from_config(cfg: &lw_config::RelayConfig) -> Result<Self, RelayError> {
        let io_dir = Path::new(&cfg.io_dir);
        std::fs::create_dir_all(io_dir).map_err(|e| RelayError::PipeUnavailable {
            path: io_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::start(io_dir).await
    }

    /// Number of currently connected client sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Tear down every session, the reaper, and the main channel. Idempotent
    /// with the reaper's own shutdown-triggered teardown: whichever runs
    /// first empties the maps, and the other finds nothing left to do.
    pub async fn dispose(self) {
        self.running.store(false, Ordering::SeqCst);
        self.reaper.abort();
        for (_, session) in self.sessions.lock().await.drain() {
            session.shell.dispose().await;
        }
        for (_, channel) in self.channels.lock().await.drain() {
            channel.dispose().await;
        }
        if let Some(main) = self.main.lock().await.take() {
            main.dispose().await;
        }
    }
}

/// Supervises the channel map: reaps stale channels on a 1s tick, and
/// performs the `shutdown` endpoint's orderly teardown once `running` is
/// flipped false, after which it returns (the reaper is "joined").
async fn run_reaper(
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
    channels: Arc<Mutex<HashMap<String, PipeServer>>>,
    main: Arc<Mutex<Option<PipeServer>>>,
    running: Arc<AtomicBool>,
) {
    let mut suspect: HashMap<String, Instant> = HashMap::new();
    loop {
        tokio::time::sleep(REAP_INTERVAL).await;

        if !running.load(Ordering::SeqCst) {
            debug!("relay shutdown requested; tearing down");
            for (_, session) in sessions.lock().await.drain() {
                session.shell.dispose().await;
            }
            for (_, channel) in channels.lock().await.drain() {
                channel.dispose().await;
            }
            if let Some(m) = main.lock().await.take() {
                m.dispose().await;
            }
            return;
        }

        let mut channels_guard = channels.lock().await;
        let now = Instant::now();
        let reapable: Vec<String> = channels_guard
            .iter()
            .filter(|(_, c)| !c.is_open() || !c.has_peer())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &reapable {
            suspect.entry(id.clone()).or_insert(now);
        }
        suspect.retain(|id, _| reapable.contains(id));

        let due: Vec<String> = suspect
            .iter()
            .filter(|(_, first_seen)| now.duration_since(*first_seen) >= REAP_GRACE)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            if let Some(channel) = channels_guard.remove(&id) {
                channel.dispose().await;
            }
            if let Some(session) = sessions.lock().await.remove(&id) {
                session.shell.dispose().await;
            }
            suspect.remove(&id);
            debug!(channel = %id, "reaped stale relay channel");
        }
    }
}

async fn handle_main_request(
    io_dir: PathBuf,
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
    channels: Arc<Mutex<HashMap<String, PipeServer>>>,
    running: Arc<AtomicBool>,
    line: String,
    reply: ReplySender,
) {
    let req: IpcRequest = match serde_json::from_str(&line) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "dropping unparseable relay request on main channel");
            return;
        }
    };

    let resp = if req.endpoint != "connect" {
        IpcResponse::error(req.message_id, 404, format!("unknown endpoint {}", req.endpoint))
    } else {
        match create_session(&io_dir, &sessions, &channels, &running).await {
            Ok(id) => IpcResponse::ok(req.message_id, serde_json::json!({ "path": format!("{id}.in") })),
            Err(e) => IpcResponse::error(req.message_id, 500, e.to_string()),
        }
    };
    if let Ok(l) = resp.to_line() {
        reply.send(l);
    }
}

async fn create_session(
    io_dir: &Path,
    sessions: &Arc<Mutex<HashMap<String, Arc<Session>>>>,
    channels: &Arc<Mutex<HashMap<String, PipeServer>>>,
    running: &Arc<AtomicBool>,
) -> Result<String, RelayError> {
    let id = lw_ident::KeyGenerator::new().generate_uid(8, &Default::default());
    let shell = LiveShell::start().await?;
    let session = Arc::new(Session {
        shell,
        tees: Mutex::new(HashMap::new()),
    });

    let io_dir_owned = io_dir.to_path_buf();
    let session_for_cb = session.clone();
    let sessions_for_cb = sessions.clone();
    let running_for_cb = running.clone();
    let channel = PipeServer::open(io_dir, id.clone(), true, move |line, reply| {
        let session = session_for_cb.clone();
        let io_dir = io_dir_owned.clone();
        let sessions = sessions_for_cb.clone();
        let running = running_for_cb.clone();
        tokio::spawn(async move {
            handle_channel_request(io_dir, session, sessions, running, line, reply).await;
        });
    })
    .await?;

    sessions.lock().await.insert(id.clone(), session);
    channels.lock().await.insert(id.clone(), channel);
    Ok(id)
}

async fn handle_channel_request(
    io_dir: PathBuf,
    session: Arc<Session>,
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
    running: Arc<AtomicBool>,
    line: String,
    reply: ReplySender,
) {
    let req: IpcRequest = match serde_json::from_str(&line) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "dropping unparseable relay request on session channel");
            return;
        }
    };

    let resp = match req.endpoint.as_str() {
        "bash" => handle_bash(&session, &req).await,
        "register_bash_listener" => handle_register_bash_listener(&io_dir, &session, &req).await,
        "remove_bash_listener" => handle_remove_bash_listener(&session, &req).await,
        "echo" => handle_echo(&req),
        "status" => handle_status(&sessions, &req).await,
        "shutdown" => handle_shutdown(&running, &req),
        other => IpcResponse::error(req.message_id.clone(), 404, format!("unknown endpoint {other}")),
    };
    if let Ok(l) = resp.to_line() {
        reply.send(l);
    }
}

async fn handle_bash(session: &Session, req: &IpcRequest) -> IpcResponse {
    let script = req.data.get("script").and_then(|v| v.as_str()).unwrap_or_default();
    match session.shell.exec_async(script).await {
        Ok(()) => IpcResponse::ok(req.message_id.clone(), serde_json::json!({})),
        Err(e) => IpcResponse::error(req.message_id.clone(), 500, e.to_string()),
    }
}

async fn handle_register_bash_listener(io_dir: &Path, session: &Session, req: &IpcRequest) -> IpcResponse {
    let stream = req.data.get("stream").and_then(|v| v.as_str()).unwrap_or_default();
    let channel = req.data.get("channel").and_then(|v| v.as_str()).unwrap_or_default();
    if channel.is_empty() || !matches!(stream, "out" | "err") {
        return IpcResponse::error(req.message_id.clone(), 400, "missing or invalid stream/channel");
    }

    let writer = PipeWriter::connect(io_dir.join(channel));
    let tx = writer.clone_sender();
    session.tees.lock().await.insert(format!("{stream}:{channel}"), writer);

    let cb: Listener = Arc::new(move |msg: &str| {
        let _ = tx.send(msg.to_string());
    });
    match stream {
        "out" => {
            session.shell.register_on_out(cb).await;
        }
        "err" => {
            session.shell.register_on_err(cb).await;
        }
        _ => unreachable!("validated above"),
    }
    IpcResponse::ok(req.message_id.clone(), serde_json::json!({}))
}

/// Disposes a tee registered by `register_bash_listener`, returning the
/// disposed channel id — an informative body over a bodiless 204, per
/// spec.md's design notes (either is acceptable; the id is more useful for
/// the relay's own tracing).
async fn handle_remove_bash_listener(session: &Session, req: &IpcRequest) -> IpcResponse {
    let stream = req.data.get("stream").and_then(|v| v.as_str()).unwrap_or_default();
    let channel = req.data.get("channel").and_then(|v| v.as_str()).unwrap_or_default();
    let key = format!("{stream}:{channel}");
    match session.tees.lock().await.remove(&key) {
        Some(writer) => {
            writer.dispose();
            IpcResponse::ok(req.message_id.clone(), serde_json::json!({ "disposed": key }))
        }
        None => IpcResponse::error(req.message_id.clone(), 404, format!("no such listener channel: {key}")),
    }
}

/// Echoes `data` back verbatim, a liveness check for the channel.
fn handle_echo(req: &IpcRequest) -> IpcResponse {
    IpcResponse::ok(req.message_id.clone(), req.data.clone())
}

/// Reports every currently connected client id, drawn from the session map.
async fn handle_status(sessions: &Arc<Mutex<HashMap<String, Arc<Session>>>>, req: &IpcRequest) -> IpcResponse {
    let clients: Vec<String> = sessions.lock().await.keys().cloned().collect();
    IpcResponse::ok(req.message_id.clone(), serde_json::json!({ "clients": clients }))
}

/// Flips the server-wide running flag; the reaper notices on its next tick
/// and performs orderly teardown.
fn handle_shutdown(running: &Arc<AtomicBool>, req: &IpcRequest) -> IpcResponse {
    running.store(false, Ordering::SeqCst);
    IpcResponse::ok(req.message_id.clone(), serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::PipeClient;
    use std::time::Duration;

    #[tokio::test]
    async fn connect_spawns_a_session_and_runs_a_command() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::start(dir.path()).await.unwrap();

        let main_path = dir.path().join("main.in");
        let main_client = PipeClient::connect(&main_path, Duration::from_secs(2)).await.unwrap();
        let resp = main_client
            .transact(IpcRequest::new("connect", serde_json::json!({})), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(resp.is_success());
        let channel_rel = resp.data.get("path").and_then(|v| v.as_str()).unwrap().to_string();
        main_client.dispose().await;
        assert_eq!(server.session_count().await, 1);

        let channel_path = dir.path().join(&channel_rel);
        let channel_client = PipeClient::connect(&channel_path, Duration::from_secs(2)).await.unwrap();
        let resp = channel_client
            .transact(
                IpcRequest::new("bash", serde_json::json!({"script": "echo hi"})),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert!(resp.is_success());

        channel_client.dispose().await;
        server.dispose().await;
    }

    #[tokio::test]
    async fn echo_returns_data_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::start(dir.path()).await.unwrap();
        let main_client = PipeClient::connect(&dir.path().join("main.in"), Duration::from_secs(2)).await.unwrap();
        let resp = main_client
            .transact(IpcRequest::new("connect", serde_json::json!({})), Duration::from_secs(2))
            .await
            .unwrap();
        let channel_rel = resp.data.get("path").and_then(|v| v.as_str()).unwrap().to_string();
        main_client.dispose().await;

        let channel_client = PipeClient::connect(&dir.path().join(&channel_rel), Duration::from_secs(2)).await.unwrap();
        let resp = channel_client
            .transact(IpcRequest::new("echo", serde_json::json!({"hello": "world"})), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.data, serde_json::json!({"hello": "world"}));

        channel_client.dispose().await;
        server.dispose().await;
    }

    #[tokio::test]
    async fn status_lists_connected_clients() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::start(dir.path()).await.unwrap();
        let main_client = PipeClient::connect(&dir.path().join("main.in"), Duration::from_secs(2)).await.unwrap();
        let resp = main_client
            .transact(IpcRequest::new("connect", serde_json::json!({})), Duration::from_secs(2))
            .await
            .unwrap();
        let channel_rel = resp.data.get("path").and_then(|v| v.as_str()).unwrap().to_string();
        main_client.dispose().await;

        let channel_client = PipeClient::connect(&dir.path().join(&channel_rel), Duration::from_secs(2)).await.unwrap();
        let resp = channel_client
            .transact(IpcRequest::new("status", serde_json::json!({})), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.data["clients"].as_array().unwrap().len(), 1);

        channel_client.dispose().await;
        server.dispose().await;
    }

    #[tokio::test]
    async fn remove_bash_listener_disposes_registered_tee() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::start(dir.path()).await.unwrap();
        let main_client = PipeClient::connect(&dir.path().join("main.in"), Duration::from_secs(2)).await.unwrap();
        let resp = main_client
            .transact(IpcRequest::new("connect", serde_json::json!({})), Duration::from_secs(2))
            .await
            .unwrap();
        let channel_rel = resp.data.get("path").and_then(|v| v.as_str()).unwrap().to_string();
        main_client.dispose().await;

        let channel_client = PipeClient::connect(&dir.path().join(&channel_rel), Duration::from_secs(2)).await.unwrap();
        let register = channel_client
            .transact(
                IpcRequest::new("register_bash_listener", serde_json::json!({"stream": "out", "channel": "tee.in"})),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert!(register.is_success());

        let removed = channel_client
            .transact(
                IpcRequest::new("remove_bash_listener", serde_json::json!({"stream": "out", "channel": "tee.in"})),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert!(removed.is_success());
        assert_eq!(removed.data.get("disposed").and_then(|v| v.as_str()), Some("out:tee.in"));

        let again = channel_client
            .transact(
                IpcRequest::new("remove_bash_listener", serde_json::json!({"stream": "out", "channel": "tee.in"})),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(again.status, 404);

        channel_client.dispose().await;
        server.dispose().await;
    }

    #[tokio::test]
    async fn shutdown_triggers_reaper_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::start(dir.path()).await.unwrap();
        let main_client = PipeClient::connect(&dir.path().join("main.in"), Duration::from_secs(2)).await.unwrap();
        let resp = main_client
            .transact(IpcRequest::new("connect", serde_json::json!({})), Duration::from_secs(2))
            .await
            .unwrap();
        let channel_rel = resp.data.get("path").and_then(|v| v.as_str()).unwrap().to_string();
        main_client.dispose().await;

        let channel_client = PipeClient::connect(&dir.path().join(&channel_rel), Duration::from_secs(2)).await.unwrap();
        let resp = channel_client
            .transact(IpcRequest::new("shutdown", serde_json::json!({})), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(resp.is_success());
        channel_client.dispose().await;

        assert!(!server.running.load(Ordering::SeqCst));
        tokio::time::sleep(REAP_INTERVAL + Duration::from_millis(200)).await;
        assert_eq!(server.sessions.lock().await.len(), 0);
        assert_eq!(server.channels.lock().await.len(), 0);
        assert!(server.main.lock().await.is_none());
    }
}
