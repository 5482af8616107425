//! [`Logistics`]: queue, validate, and batch-execute transfers across the
//! five source transports.

use crate::error::DispatchError;
use crate::source::{BatchEndpoint, Source, SourceType};
use lw_relay::RemoteShell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

/// Outcome of [`Logistics::execute_transfers`]: completed pairs plus any
/// per-transfer error strings. A failed individual transfer never aborts
/// the batch; it is recorded here instead.
#[derive(Debug, Default, Clone)]
pub struct TransferResult {
    /// Transfers that completed (or were confirmed already in place).
    pub completed: Vec<(Source, Source)>,
    /// Accumulated error messages, one per failed transfer or task.
    pub errors: Vec<String>,
}

fn is_remote(t: SourceType) -> bool {
    matches!(
        t,
        SourceType::LocalBatch | SourceType::RemoteShell | SourceType::Http
    )
}

/// Validate that `src -> dest` is a legal transfer pairing.
///
/// Rules: `HTTP` is never a destination; at most one side may use a remote
/// transport; symlinks only ever connect two local sources.
pub fn validate_pair(src: &Source, dest: &Source) -> Result<(), DispatchError> {
    if dest.transport == SourceType::Http {
        return Err(DispatchError::ValidationFailed {
            reason: "HTTP cannot be a destination".into(),
        });
    }
    if is_remote(src.transport) && is_remote(dest.transport) {
        return Err(DispatchError::ValidationFailed {
            reason: format!(
                "at most one side may use a remote transport, got {} -> {}",
                src.transport, dest.transport
            ),
        });
    }
    if (src.transport == SourceType::Symlink && !dest.transport.is_local())
        || (dest.transport == SourceType::Symlink && !src.transport.is_local())
    {
        return Err(DispatchError::ValidationFailed {
            reason: "symlink transfers are local-only".into(),
        });
    }
    Ok(())
}

/// Queues transfers across transports and executes them in batched,
/// transport-grouped passes.
#[derive(Debug, Default)]
pub struct Logistics {
    queue: Vec<(Source, Source)>,
    remote_shell_socket: Option<PathBuf>,
}

impl Logistics {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self { queue: Vec::new(), remote_shell_socket: None }
    }

    /// Configure the relay main-channel socket used to open one
    /// [`RemoteShell`] per host pair for `REMOTE_SHELL` transfers.
    pub fn with_remote_shell_socket(mut self, socket: PathBuf) -> Self {
        self.remote_shell_socket = Some(socket);
        self
    }

    /// Validate and enqueue a transfer. Nothing is moved until
    /// [`execute_transfers`](Self::execute_transfers) is called.
    pub fn queue_transfer(&mut self, src: Source, dest: Source) -> Result<(), DispatchError> {
        validate_pair(&src, &dest)?;
        self.queue.push((src, dest));
        Ok(())
    }

    /// Remove a previously queued pair, if present.
    pub fn remove_transfer(&mut self, src: &Source, dest: &Source) {
        self.queue.retain(|(s, d)| !(s == src && d == dest));
    }

    /// Number of transfers currently queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Execute every queued transfer, grouped by transport (`LOCAL_BATCH`
    /// first, then `REMOTE_SHELL`, `HTTP`, and finally local `DIRECT`/
    /// `SYMLINK` transfers) so long-running bulk transports are kicked off
    /// before the cheap local copies proceed.
    pub async fn execute_transfers(&mut self, label: Option<&str>) -> TransferResult {
        let total = self.queue.len();
        info!(count = total, "starting transfers");
        let mut result = TransferResult::default();

        let mut local_batch: BTreeMap<(String, String), Vec<(Source, Source)>> = BTreeMap::new();
        let mut remote_shell: BTreeMap<(String, String), Vec<(Source, Source)>> = BTreeMap::new();
        let mut http: Vec<(Source, Source)> = Vec::new();
        let mut local: Vec<(Source, Source)> = Vec::new();

        for (src, dest) in self.queue.drain(..) {
            if src.transport == SourceType::LocalBatch || dest.transport == SourceType::LocalBatch
            {
                let key = (src.hash_key(), dest.hash_key());
                local_batch.entry(key).or_default().push((src, dest));
            } else if src.transport == SourceType::RemoteShell
                || dest.transport == SourceType::RemoteShell
            {
                let key = (host_of(&src), host_of(&dest));
                remote_shell.entry(key).or_default().push((src, dest));
            } else if src.transport == SourceType::Http {
                http.push((src, dest));
            } else {
                local.push((src, dest));
            }
        }

        let mut pending_batches: Vec<(String, &Vec<(Source, Source)>)> = Vec::new();
        for batch in local_batch.values() {
            match execute_local_batch(batch, label).await {
                Ok(task_id) => pending_batches.push((task_id, batch)),
                Err(e) => result.errors.push(e.to_string()),
            }
        }

        for batch in remote_shell.values() {
            match self.remote_shell_socket.as_deref() {
                None => {
                    for _ in batch {
                        result.errors.push("remote shell transport requires a configured relay socket".into());
                    }
                }
                Some(socket) => match RemoteShell::connect(socket, Duration::from_secs(30)).await {
                    Err(e) => {
                        for _ in batch {
                            result.errors.push(format!("could not open remote shell: {e}"));
                        }
                    }
                    Ok(shell) => {
                        for (src, dest) in batch {
                            match execute_remote_shell(&shell, src, dest).await {
                                Ok(()) => result.completed.push((src.clone(), dest.clone())),
                                Err(e) => result.errors.push(e.to_string()),
                            }
                        }
                        shell.dispose().await;
                    }
                },
            }
        }

        for (src, dest) in &http {
            match execute_http(src, dest).await {
                Ok(()) => result.completed.push((src.clone(), dest.clone())),
                Err(e) => result.errors.push(e.to_string()),
            }
        }

        if !local.is_empty() {
            info!(count = local.len(), "executing local transfers");
        }
        for (src, dest) in &local {
            match execute_local(src, dest).await {
                Ok(()) => result.completed.push((src.clone(), dest.clone())),
                Err(e) => result.errors.push(e.to_string()),
            }
        }

        for (task_id, batch) in &pending_batches {
            match join_local_batch(task_id).await {
                Ok(()) => result
                    .completed
                    .extend(batch.iter().map(|(s, d)| (s.clone(), d.clone()))),
                Err(e) => result.errors.push(e.to_string()),
            }
        }

        info!(attempted = total, "finished transfers");
        result
    }

    /// Cancel any outstanding `LOCAL_BATCH` tasks by id. Best-effort: errors
    /// from individual cancel requests are swallowed, matching the
    /// fire-and-forget cleanup semantics used on interrupt.
    pub async fn cancel(&self, task_ids: &[String]) {
        for id in task_ids {
            let _ = Command::new("transfer")
                .args(["task", "cancel", id])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }
    }
}

fn host_of(s: &Source) -> String {
    s.address.split(':').next().unwrap_or("").to_string()
}

async fn execute_local_batch(
    batch: &[(Source, Source)],
    label: Option<&str>,
) -> Result<String, DispatchError> {
    let Some((first_src, first_dest)) = batch.first() else {
        return Err(DispatchError::TransferFailed {
            reason: "empty local_batch group".into(),
        });
    };
    let src_ep = to_batch_endpoint(first_src)?;
    let dest_ep = to_batch_endpoint(first_dest)?;

    let manifest_file = tempfile::NamedTempFile::new().map_err(|e| DispatchError::TransferFailed {
        reason: format!("could not create batch manifest: {e}"),
    })?;
    let mut manifest = String::new();
    for (src, dest) in batch {
        let s = to_batch_endpoint(src)?;
        let d = to_batch_endpoint(dest)?;
        manifest.push_str(&format!("\"{}\" \"{}\"\n", s.path.display(), d.path.display()));
    }
    std::fs::write(manifest_file.path(), manifest).map_err(|e| DispatchError::TransferFailed {
        reason: format!("could not write batch manifest: {e}"),
    })?;

    let mut args = vec![
        "transfer".to_string(),
        src_ep.endpoint.clone(),
        dest_ep.endpoint.clone(),
        "--batch".to_string(),
        manifest_file.path().display().to_string(),
        "--sync-level".to_string(),
        "checksum".to_string(),
    ];
    if let Some(label) = label {
        args.push("--label".to_string());
        args.push(label.to_string());
    }

    let output = Command::new("transfer")
        .args(&args[1..])
        .output()
        .await
        .map_err(|e| DispatchError::TransferFailed {
            reason: format!("failed to invoke batch transfer tool: {e}"),
        })?;
    if !output.status.success() {
        return Err(DispatchError::TransferFailed {
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("Task ID: "))
        .map(|s| s.to_string())
        .ok_or_else(|| DispatchError::TransferFailed {
            reason: "batch transfer tool did not report a task id".into(),
        })
}

fn to_batch_endpoint(s: &Source) -> Result<BatchEndpoint, DispatchError> {
    if s.transport == SourceType::LocalBatch {
        return BatchEndpoint::parse(&s.address);
    }
    let path = Path::new(&s.address);
    if !path.is_absolute() {
        return Err(DispatchError::InvalidSource {
            address: s.address.clone(),
            reason: "local path must be absolute to join a batch transfer".into(),
        });
    }
    Ok(BatchEndpoint {
        endpoint: "local".to_string(),
        path: path.to_path_buf(),
    })
}

async fn join_local_batch(task_id: &str) -> Result<(), DispatchError> {
    loop {
        let output = Command::new("transfer")
            .args(["task", "show", task_id, "-F", "json"])
            .output()
            .await
            .map_err(|e| DispatchError::TransferFailed {
                reason: format!("failed to poll task {task_id}: {e}"),
            })?;
        let text = String::from_utf8_lossy(&output.stdout);
        let status: serde_json::Value =
            serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        match status.get("status").and_then(|v| v.as_str()) {
            Some("ACTIVE") => {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
            _ => return Ok(()),
        }
    }
}

/// Issue one rsync-like copy through an already-open relay shell, then
/// verify the destination actually landed before reporting success.
async fn execute_remote_shell(shell: &RemoteShell, src: &Source, dest: &Source) -> Result<(), DispatchError> {
    let copy = shell
        .exec(&format!("rsync -a {} {}", src.address, dest.address), Some(Duration::from_secs(300)), true)
        .await
        .map_err(|e| DispatchError::TransferFailed {
            reason: format!("remote shell transfer failed: {e}"),
        })?;
    if !copy.err.is_empty() {
        return Err(DispatchError::TransferFailed {
            reason: format!("rsync reported errors: {}", copy.err.join("; ")),
        });
    }

    let check = shell
        .exec(
            &format!("test -e {} && echo __lw_exists__ || echo __lw_missing__", dest.address),
            Some(Duration::from_secs(30)),
            true,
        )
        .await
        .map_err(|e| DispatchError::TransferFailed {
            reason: format!("remote existence check failed: {e}"),
        })?;
    if !check.out.iter().any(|l| l.trim() == "__lw_exists__") {
        return Err(DispatchError::TransferFailed {
            reason: format!("destination not found on remote host after transfer: {}", dest.address),
        });
    }
    Ok(())
}

async fn execute_http(src: &Source, dest: &Source) -> Result<(), DispatchError> {
    if let Some(parent) = Path::new(&dest.address).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DispatchError::TransferFailed {
                reason: format!("could not create destination directory: {e}"),
            })?;
    }
    let status = Command::new("curl")
        .args(["-fSL", "-C", "-", "-o", &dest.address, &src.address])
        .status()
        .await
        .map_err(|e| DispatchError::TransferFailed {
            reason: format!("http transfer failed: {e}"),
        })?;
    if !status.success() {
        return Err(DispatchError::TransferFailed {
            reason: format!("curl exited with {status}"),
        });
    }
    Ok(())
}

async fn execute_local(src: &Source, dest: &Source) -> Result<(), DispatchError> {
    let dest_path = Path::new(&dest.address);
    if dest_path.exists() {
        let already_symlink = dest_path.is_symlink();
        if already_symlink && dest.transport == SourceType::Symlink {
            return Ok(());
        }
        if !already_symlink && checksums_match(&src.address, &dest.address).await? {
            return Ok(());
        }
        tokio::fs::remove_file(dest_path)
            .await
            .map_err(|e| DispatchError::TransferFailed {
                reason: format!("could not remove stale destination: {e}"),
            })?;
    }
    match dest.transport {
        SourceType::Symlink => {
            #[cfg(unix)]
            tokio::fs::symlink(&src.address, &dest.address)
                .await
                .map_err(|e| DispatchError::TransferFailed {
                    reason: format!("symlink failed: {e}"),
                })?;
            Ok(())
        }
        SourceType::Direct => {
            tokio::fs::copy(&src.address, &dest.address)
                .await
                .map_err(|e| DispatchError::TransferFailed {
                    reason: format!("copy failed: {e}"),
                })?;
            Ok(())
        }
        other => Err(DispatchError::TransferFailed {
            reason: format!("unsupported local destination transport {other}"),
        }),
    }
}

async fn checksums_match(a: &str, b: &str) -> Result<bool, DispatchError> {
    let (ha, hb) = tokio::try_join!(sha256_of(a), sha256_of(b)).map_err(|e| {
        DispatchError::TransferFailed {
            reason: format!("checksum failed: {e}"),
        }
    })?;
    Ok(ha == hb)
}

async fn sha256_of(path: &str) -> std::io::Result<String> {
    use sha2::{Digest, Sha256};
    let bytes = tokio::fs::read(path).await?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
