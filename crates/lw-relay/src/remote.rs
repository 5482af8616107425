//! [`RemoteShell`]: the client side of a [`crate::server::RelayServer`]
//! session, projecting the same register/exec/await interface as
//! [`crate::shell::LiveShell`] across the relay boundary. Grounded on the
//! Python original's `RemoteShell` class: a `connect` handshake hands back a
//! per-client channel, two more channels are opened locally to receive
//! tee'd stdout/stderr, and those are registered with the remote session via
//! `register_bash_listener` requests before any command is run.

use crate::envelope::IpcRequest;
use crate::error::RelayError;
use crate::pipe::{PipeClient, PipeServer};
use crate::shell::{Listener, ShellResult, dedent, strip_trailing_newline};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

struct Listeners {
    out: Mutex<HashMap<u64, Listener>>,
    err: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

/// A [`crate::shell::LiveShell`] running on a remote relay, addressed
/// through a named-pipe channel instead of a local process handle.
pub struct RemoteShell {
    channel: PipeClient,
    out_tee: PipeServer,
    err_tee: PipeServer,
    mark: String,
    done: Arc<AtomicBool>,
    notify: Arc<Notify>,
    listeners: Arc<Listeners>,
    timeout: Duration,
}

impl RemoteShell {
    /// Connect to a [`crate::server::RelayServer`] listening at
    /// `server_path` (its main channel's `.in` FIFO), requesting a fresh
    /// session channel and wiring up local tee receivers for its output.
    pub async fn connect(server_path: &Path, timeout: Duration) -> Result<Self, RelayError> {
        let io_dir = server_path.parent().map(Path::to_path_buf).unwrap_or_default();

        let main = PipeClient::connect(server_path, timeout).await?;
        let resp = main
            .transact(IpcRequest::new("connect", serde_json::json!({})), timeout)
            .await?;
        main.dispose().await;
        if !resp.is_success() {
            return Err(RelayError::RequestFailed {
                status: resp.status,
                message: resp.data.get("error").and_then(|v| v.as_str()).unwrap_or_default().into(),
            });
        }
        let channel_rel = resp
            .data
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayError::InvalidEnvelope {
                reason: "connect response missing channel path".into(),
            })?;
        let channel_path = io_dir.join(channel_rel);
        let session_id = channel_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();

        let mark = format!("done_{}", lw_ident::KeyGenerator::new().generate_uid(12, &Default::default()));
        let done = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let listeners = Arc::new(Listeners {
            out: Mutex::new(HashMap::new()),
            err: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        });

        let out_mark = mark.clone();
        let out_done = done.clone();
        let out_notify = notify.clone();
        let out_listeners = listeners.clone();
        let out_tee = PipeServer::open(&io_dir, format!("{session_id}.bash_out"), true, move |line, _reply| {
            let msg = strip_trailing_newline(&line).to_string();
            if msg == out_mark {
                out_done.store(true, Ordering::SeqCst);
                out_notify.notify_waiters();
                return;
            }
            for cb in out_listeners.out.lock().expect("listener lock poisoned").values() {
                cb(&msg);
            }
        })
        .await?;

        let err_listeners = listeners.clone();
        let err_tee = PipeServer::open(&io_dir, format!("{session_id}.bash_err"), true, move |line, _reply| {
            let msg = strip_trailing_newline(&line).to_string();
            for cb in err_listeners.err.lock().expect("listener lock poisoned").values() {
                cb(&msg);
            }
        })
        .await?;

        let channel = PipeClient::connect(&channel_path, timeout).await?;
        for (stream, tee_id) in [("out", out_tee.id.clone()), ("err", err_tee.id.clone())] {
            let resp = channel
                .transact(
                    IpcRequest::new(
                        "register_bash_listener",
                        serde_json::json!({ "stream": stream, "channel": format!("{tee_id}.in") }),
                    ),
                    timeout,
                )
                .await?;
            if !resp.is_success() {
                out_tee.dispose().await;
                err_tee.dispose().await;
                channel.dispose().await;
                return Err(RelayError::RequestFailed {
                    status: resp.status,
                    message: format!(
                        "failed to register {stream} listener: {}",
                        resp.data.get("error").and_then(|v| v.as_str()).unwrap_or_default()
                    ),
                });
            }
        }

        Ok(Self {
            channel,
            out_tee,
            err_tee,
            mark,
            done,
            notify,
            listeners,
            timeout,
        })
    }

    /// Register a stdout listener, returning a handle for later removal.
    pub fn register_on_out(&self, cb: Listener) -> u64 {
        let id = self.listeners.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.out.lock().expect("listener lock poisoned").insert(id, cb);
        id
    }

    /// Register a stderr listener, returning a handle for later removal.
    pub fn register_on_err(&self, cb: Listener) -> u64 {
        let id = self.listeners.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.err.lock().expect("listener lock poisoned").insert(id, cb);
        id
    }

    /// Remove a previously registered stdout listener.
    pub fn remove_on_out(&self, id: u64) {
        self.listeners.out.lock().expect("listener lock poisoned").remove(&id);
    }

    /// Remove a previously registered stderr listener.
    pub fn remove_on_err(&self, id: u64) {
        self.listeners.err.lock().expect("listener lock poisoned").remove(&id);
    }

    async fn send_script(&self, script: &str) -> Result<(), RelayError> {
        let resp = self
            .channel
            .transact(IpcRequest::new("bash", serde_json::json!({ "script": script })), self.timeout)
            .await?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(RelayError::RequestFailed {
                status: resp.status,
                message: resp.data.get("error").and_then(|v| v.as_str()).unwrap_or_default().into(),
            })
        }
    }

    /// Queue a command on the remote shell without waiting for it to finish.
    pub async fn exec_async(&self, cmd: &str) -> Result<(), RelayError> {
        self.send_script(&dedent(cmd)).await
    }

    /// Echo the completion marker on the remote shell and wait for it to
    /// arrive over the stdout tee, with the same exponentially growing poll
    /// window as [`crate::shell::LiveShell::await_done`].
    pub async fn await_done(&self, timeout: Option<Duration>) -> Result<(), RelayError> {
        let start = tokio::time::Instant::now();
        let mut wait = Duration::from_millis(500);
        let max_wait = Duration::from_secs(864_000);
        loop {
            self.send_script(&format!("echo \"{}\"", self.mark)).await?;
            let got = tokio::time::timeout(wait, self.wait_for_mark()).await.is_ok();
            if got {
                self.done.store(false, Ordering::SeqCst);
                return Ok(());
            }
            wait = std::cmp::min(wait * 10, max_wait);
            if let Some(t) = timeout {
                if start.elapsed() > t {
                    return Ok(());
                }
            }
        }
    }

    async fn wait_for_mark(&self) {
        loop {
            if self.done.load(Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Run a command to completion, optionally capturing the stdout/stderr
    /// it produced while running.
    pub async fn exec(&self, cmd: &str, timeout: Option<Duration>, history: bool) -> Result<ShellResult, RelayError> {
        let out: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let err: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let (out_id, err_id) = if history {
            let out_clone = out.clone();
            let err_clone = err.clone();
            (
                Some(self.register_on_out(Arc::new(move |msg: &str| {
                    out_clone.lock().expect("capture lock poisoned").push(msg.to_string());
                }))),
                Some(self.register_on_err(Arc::new(move |msg: &str| {
                    err_clone.lock().expect("capture lock poisoned").push(msg.to_string());
                }))),
            )
        } else {
            (None, None)
        };

        self.exec_async(cmd).await?;
        self.await_done(timeout).await?;

        if let Some(id) = out_id {
            self.remove_on_out(id);
        }
        if let Some(id) = err_id {
            self.remove_on_err(id);
        }

        Ok(ShellResult {
            out: out.lock().expect("capture lock poisoned").clone(),
            err: err.lock().expect("capture lock poisoned").clone(),
        })
    }

    /// Tear down both tee channels and the session channel.
    pub async fn dispose(self) {
        self.out_tee.dispose().await;
        self.err_tee.dispose().await;
        self.channel.dispose().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::RelayServer;

    #[tokio::test]
    async fn connects_runs_a_command_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::start(dir.path()).await.unwrap();

        let main_path = dir.path().join("main.in");
        let remote = RemoteShell::connect(&main_path, Duration::from_secs(5)).await.unwrap();

        let result = remote.exec("echo over-the-wire", Some(Duration::from_secs(5)), true).await.unwrap();
        assert!(result.out.iter().any(|l| l == "over-the-wire"), "{:?}", result.out);

        remote.dispose().await;
        server.dispose().await;
    }
}
