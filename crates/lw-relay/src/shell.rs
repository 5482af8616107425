//! [`LiveShell`]: a persistent `bash` subprocess whose command boundaries
//! are detected by echoing a random marker line, the way the Python
//! original's `TerminalProcess`/`LiveShell` pair does — without the PTY
//! allocation, since nothing here needs a real terminal (no readline
//! prompts, no ANSI rendering); piped stdio is sufficient for a
//! script-driven command channel and is what `tokio::process` gives for
//! free.

use crate::error::RelayError;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// A registered output listener.
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// Captured output from [`LiveShell::exec`].
#[derive(Debug, Clone, Default)]
pub struct ShellResult {
    /// Stdout lines emitted while the command ran.
    pub out: Vec<String>,
    /// Stderr lines emitted while the command ran.
    pub err: Vec<String>,
}

pub(crate) fn strip_trailing_newline(s: &str) -> &str {
    s.trim_end_matches(['\n', '\r'])
}

/// Drop one level of leading whitespace shared by every non-blank line,
/// the way multi-line heredoc-style shell snippets are usually indented to
/// match surrounding Rust code.
pub fn dedent(s: &str) -> String {
    let indent = s
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches([' ', '\t']).len())
        .unwrap_or(0);
    s.lines()
        .map(|l| if l.len() >= indent { &l[indent..] } else { l.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

struct Listeners {
    out: Mutex<HashMap<u64, Listener>>,
    err: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

/// A long-lived `bash` process with registrable output listeners and a
/// marker-based "wait for the command to finish" primitive.
pub struct LiveShell {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    mark: String,
    done: Arc<AtomicBool>,
    notify: Arc<Notify>,
    listeners: Arc<Listeners>,
    out_task: JoinHandle<()>,
    err_task: JoinHandle<()>,
}

impl LiveShell {
    /// Spawn the backing `bash` process and start tee-ing its stdout/stderr
    /// to registered listeners.
    pub async fn start() -> Result<Self, RelayError> {
        let mark = format!("done_{}", lw_ident::KeyGenerator::new().generate_uid(12, &Default::default()));

        let mut child = Command::new("bash")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RelayError::PipeUnavailable {
                path: "bash".into(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| RelayError::PipeUnavailable {
            path: "bash stdin".into(),
            reason: "not piped".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| RelayError::PipeUnavailable {
            path: "bash stdout".into(),
            reason: "not piped".into(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| RelayError::PipeUnavailable {
            path: "bash stderr".into(),
            reason: "not piped".into(),
        })?;

        let listeners = Arc::new(Listeners {
            out: Mutex::new(HashMap::new()),
            err: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        });
        let done = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let out_mark = mark.clone();
        let out_listeners = listeners.clone();
        let out_done = done.clone();
        let out_notify = notify.clone();
        let out_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg = strip_trailing_newline(&line);
                if msg.is_empty() {
                    continue;
                }
                if msg == out_mark {
                    out_done.store(true, Ordering::SeqCst);
                    out_notify.notify_waiters();
                    continue;
                }
                for cb in out_listeners.out.lock().await.values() {
                    cb(msg);
                }
            }
        });

        let err_listeners = listeners.clone();
        let err_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg = strip_trailing_newline(&line);
                if msg.is_empty() {
                    continue;
                }
                for cb in err_listeners.err.lock().await.values() {
                    cb(msg);
                }
            }
        });

        Ok(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            mark,
            done,
            notify,
            listeners,
            out_task,
            err_task,
        })
    }

    /// Register a stdout listener, returning a handle for later removal.
    pub async fn register_on_out(&self, cb: Listener) -> u64 {
        let id = self.listeners.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.out.lock().await.insert(id, cb);
        id
    }

    /// Register a stderr listener, returning a handle for later removal.
    pub async fn register_on_err(&self, cb: Listener) -> u64 {
        let id = self.listeners.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.err.lock().await.insert(id, cb);
        id
    }

    /// Remove a previously registered stdout listener.
    pub async fn remove_on_out(&self, id: u64) {
        self.listeners.out.lock().await.remove(&id);
    }

    /// Remove a previously registered stderr listener.
    pub async fn remove_on_err(&self, id: u64) {
        self.listeners.err.lock().await.remove(&id);
    }

    /// Write a command to the shell's stdin without waiting for it to
    /// finish.
    pub async fn exec_async(&self, cmd: &str) -> Result<(), RelayError> {
        let line = format!("{}\n", dedent(cmd));
        self.stdin
            .lock()
            .await
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RelayError::PipeUnavailable {
                path: "bash stdin".into(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Echo the completion marker and wait for it to be seen on stdout,
    /// with an exponentially growing poll window — a command that emits no
    /// output otherwise gives no signal that it has finished.
    pub async fn await_done(&self, timeout: Option<Duration>) -> Result<(), RelayError> {
        let start = tokio::time::Instant::now();
        let mut wait = Duration::from_millis(500);
        let max_wait = Duration::from_secs(864_000);
        loop {
            self.stdin
                .lock()
                .await
                .write_all(format!("echo \"{}\"\n", self.mark).as_bytes())
                .await
                .map_err(|e| RelayError::PipeUnavailable {
                    path: "bash stdin".into(),
                    reason: e.to_string(),
                })?;

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
        let out: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let err: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (out_id, err_id) = if history {
            let out_clone = out.clone();
            let err_clone = err.clone();
            (
                Some(
                    self.register_on_out(Arc::new(move |msg: &str| {
                        out_clone.lock().expect("capture lock poisoned").push(msg.to_string());
                    }))
                    .await,
                ),
                Some(
                    self.register_on_err(Arc::new(move |msg: &str| {
                        err_clone.lock().expect("capture lock poisoned").push(msg.to_string());
                    }))
                    .await,
                ),
            )
        } else {
            (None, None)
        };

        self.exec_async(cmd).await?;
        self.await_done(timeout).await?;

        if let Some(id) = out_id {
            self.remove_on_out(id).await;
        }
        if let Some(id) = err_id {
            self.remove_on_err(id).await;
        }

        Ok(ShellResult {
            out: out.lock().expect("capture lock poisoned").clone(),
            err: err.lock().expect("capture lock poisoned").clone(),
        })
    }

    /// Terminate the backing process and stop its reader tasks. Takes `&self`
    /// rather than consuming it since a [`LiveShell`] may be shared via `Arc`
    /// across a session's request handlers.
    pub async fn dispose(&self) {
        self.out_task.abort();
        self.err_task.abort();
        let _ = self.child.lock().await.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedent_strips_shared_leading_whitespace() {
        let s = "    echo a\n    echo b\n";
        assert_eq!(dedent(s), "echo a\necho b");
    }

    #[tokio::test]
    async fn exec_captures_stdout() {
        let shell = LiveShell::start().await.unwrap();
        let result = shell.exec("echo hello", Some(Duration::from_secs(5)), true).await.unwrap();
        assert!(result.out.iter().any(|l| l == "hello"), "{:?}", result.out);
        shell.dispose().await;
    }

    #[tokio::test]
    async fn exec_without_history_returns_empty_capture() {
        let shell = LiveShell::start().await.unwrap();
        let result = shell.exec("echo hidden", Some(Duration::from_secs(5)), false).await.unwrap();
        assert!(result.out.is_empty());
        shell.dispose().await;
    }
}
