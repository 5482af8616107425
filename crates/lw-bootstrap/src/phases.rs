//! The `WAITING_FOR_RELAY` → `LOADING_TASK` → `RESOLVING_STEP` → `EXECUTING`
//! → `REPORT` sequence. Grounded on `StageAndRunTransform` in the original
//! implementation's `agents/bootstrap.py`: poll for the relay socket, load
//! the staged task, resolve one step's bound context, run its protocol
//! catching any failure, and report without raising from the core itself.

use crate::config::BootstrapConfig;
use crate::error::BootstrapError;
use lw_library::{DataInstance, ExecutionContext, ExecutionResult, TransformInstanceLibrary};
use lw_plan::TaskBundle;
use lw_relay::RemoteShell;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

/// Outcome of running a single step: the protocol's own result plus, on
/// failure, the path a traceback-equivalent was written to.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Whether the step's protocol reported success.
    pub result: ExecutionResult,
    /// Path a failure's panic message/backtrace was written to, if it
    /// failed.
    pub traceback_path: Option<PathBuf>,
}

/// `WAITING_FOR_RELAY`: poll `relay_socket` once per
/// [`BootstrapConfig::relay_poll_interval`] up to
/// [`BootstrapConfig::max_relay_wait_attempts`] times. Fails with
/// [`BootstrapError::RelayNotStarted`] ("server not started") if the path
/// never appears.
#[instrument(skip(cfg), fields(path = %relay_socket.display()))]
pub async fn wait_for_relay(relay_socket: &Path, cfg: &BootstrapConfig) -> Result<(), BootstrapError> {
    for attempt in 1..=cfg.max_relay_wait_attempts {
        if relay_socket.exists() {
            info!(attempt, "relay socket is up");
            return Ok(());
        }
        warn!(attempt, "relay socket not yet present");
        tokio::time::sleep(cfg.relay_poll_interval).await;
    }
    Err(BootstrapError::RelayNotStarted {
        path: relay_socket.display().to_string(),
        attempts: cfg.max_relay_wait_attempts,
    })
}

/// `LOADING_TASK`: read the staged [`TaskBundle`] at `workspace`, retrying
/// with [`BootstrapConfig::task_load_backoff`] to ride out the window where
/// a concurrent stage is still writing it.
#[instrument(skip(cfg), fields(workspace = %workspace.display()))]
pub async fn load_task(workspace: &Path, cfg: &BootstrapConfig) -> Result<TaskBundle, BootstrapError> {
    let mut last_err = None;
    for (attempt, backoff) in std::iter::once(None).chain(cfg.task_load_backoff.iter().copied().map(Some)).enumerate() {
        if let Some(wait) = backoff {
            warn!(attempt, wait_secs = wait.as_secs(), "retrying task load");
            tokio::time::sleep(wait).await;
        }
        match TaskBundle::load(workspace) {
            Ok(bundle) => {
                info!(plan_key = %bundle.task.plan_key, steps = bundle.plan.steps.len(), "task loaded");
                return Ok(bundle);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(BootstrapError::TaskLoadFailed {
        reason: last_err.map(|e| e.to_string()).unwrap_or_else(|| "no attempts made".into()),
    })
}

/// `RESOLVING_STEP`: look up `steps[step_index - 1]`, find its transform
/// definition in `transforms`, and bind an [`ExecutionContext`] from the
/// step's `uses`/`produces` plus the already-connected `shell`, resolving
/// each instance's file under whichever library directory the bundle
/// carries it in.
#[instrument(skip(bundle, transforms, shell), fields(step_index))]
pub fn resolve_step<'a>(
    bundle: &TaskBundle,
    transforms: &'a TransformInstanceLibrary,
    step_index: usize,
    shell: RemoteShell,
) -> Result<(&'a lw_library::TransformInstance, ExecutionContext), BootstrapError> {
    let step = bundle.plan.step(step_index).map_err(|e| BootstrapError::StepUnresolved { index: step_index, source: e })?;

    let instance = transforms.get(&step.transform_source).map_err(|_| BootstrapError::TransformNotFound {
        path: step.transform_source.display().to_string(),
    })?;

    let mut inputs = std::collections::BTreeMap::new();
    for (name, data) in &step.uses {
        let resolved = resolve_instance_path(bundle, data)?;
        inputs.insert(name.clone(), DataInstance { source: resolved, dtype_name: data.dtype_name.clone() });
    }
    let mut outputs = std::collections::BTreeMap::new();
    for (name, data) in &step.produces {
        let resolved = resolve_instance_path(bundle, data).unwrap_or_else(|_| bundle.root.join("work").join(&data.source));
        outputs.insert(name.clone(), DataInstance { source: resolved, dtype_name: data.dtype_name.clone() });
    }

    let type_libraries = bundle
        .task
        .library_keys
        .iter()
        .map(|key| bundle.data_dir(key).join("types"))
        .filter(|p| p.exists())
        .collect();

    Ok((
        instance,
        ExecutionContext {
            inputs,
            outputs,
            transform_definition: step.transform_source.clone(),
            type_libraries,
            shell: Some(shell),
        },
    ))
}

/// Resolve a [`DataInstance`]'s declared relative source to an absolute
/// path by checking each library directory the bundle carries, in
/// declaration order. The struct carries no library reference of its own
/// (the same gap [`lw_plan::generate`]'s `resolve_properties` works around
/// for type properties), so this is a search rather than a direct lookup.
fn resolve_instance_path(bundle: &TaskBundle, data: &DataInstance) -> Result<PathBuf, BootstrapError> {
    for key in &bundle.task.library_keys {
        let candidate = bundle.data_dir(key).join(&data.source);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    let staged = bundle.root.join("work").join(&data.source);
    if staged.exists() {
        return Ok(staged);
    }
    Err(BootstrapError::InstanceUnresolved {
        name: data.dtype_name.clone(),
        source: data.source.display().to_string(),
    })
}

/// `EXECUTING` + `REPORT`: call the transform's protocol against `ctx`,
/// catching a panic the way the original catches an exception around
/// `transform.protocol(context)`. On failure the panic payload is written
/// to `traceback.txt` under `workspace` and logged; the core never exits
/// non-zero itself, it only reports the outcome.
#[instrument(skip(instance, ctx), fields(workspace = %workspace.display()))]
pub fn execute_step(
    instance: &lw_library::TransformInstance,
    ctx: &ExecutionContext,
    workspace: &Path,
) -> StepOutcome {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| (instance.protocol)(ctx)));
    match outcome {
        Ok(result) => {
            if result.success {
                info!("step succeeded");
            } else {
                warn!("step reported failure");
            }
            StepOutcome { result, traceback_path: None }
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "transform protocol panicked".to_string());
            error!(message = %message, "step panicked");
            let traceback_path = workspace.join("traceback.txt");
            if let Err(e) = std::fs::write(&traceback_path, &message) {
                warn!(error = %e, "failed to write traceback file");
            }
            StepOutcome { result: ExecutionResult { success: false }, traceback_path: Some(traceback_path) }
        }
    }
}
