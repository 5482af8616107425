//! Agent-side bootstrap: the state machine a freshly deployed runner walks
//! through to execute one workflow step. Grounded on `StageAndRunTransform`
//! / `DeployFromContainer` in the original implementation's
//! `agents/bootstrap.py`.
//!
//! `WAITING_FOR_RELAY` polls for the relay's connection FIFO;
//! `LOADING_TASK` reads the staged [`lw_plan::TaskBundle`] with backoff to
//! ride out a staging race; `RESOLVING_STEP` binds the requested step's
//! [`lw_library::ExecutionContext`]; `EXECUTING` runs its protocol; `REPORT`
//! returns the outcome without exiting the process non-zero itself — the
//! caller (the CLI entry point) decides what a failed step means for its
//! own exit code.

#![warn(missing_docs)]

mod config;
mod error;
mod phases;

pub use config::BootstrapConfig;
pub use error::BootstrapError;
pub use phases::{StepOutcome, execute_step, load_task, resolve_step, wait_for_relay};

use lw_library::TransformInstanceLibrary;
use lw_plan::TaskBundle;
use lw_relay::RemoteShell;
use std::path::Path;
use tracing::instrument;

/// Run the full bootstrap sequence for one step: wait for the relay, load
/// the task bundle, connect a shell and bind the step's context against
/// `transforms`, then execute it. The connection opened here is the one
/// `RESOLVING_STEP` binds as `ExecutionContext.shell`; it is disposed after
/// the step runs, whether it succeeded or not.
#[instrument(skip(transforms, cfg), fields(workspace = %workspace.display(), step_index))]
pub async fn run_step(
    workspace: &Path,
    relay_socket: &Path,
    step_index: usize,
    transforms: &TransformInstanceLibrary,
    cfg: &BootstrapConfig,
) -> Result<StepOutcome, BootstrapError> {
    wait_for_relay(relay_socket, cfg).await?;
    let bundle = load_task(workspace, cfg).await?;
    let shell = RemoteShell::connect(relay_socket, cfg.relay_connect_timeout).await?;
    let (instance, ctx) = resolve_step(&bundle, transforms, step_index, shell)?;
    let outcome = execute_step(instance, &ctx, workspace);
    if let Some(shell) = ctx.shell {
        shell.dispose().await;
    }
    Ok(outcome)
}

/// Load a staged task bundle without running the relay wait, for callers
/// (like `stage-workflow`) that only need the plan's metadata.
pub fn load_staged(workspace: &Path) -> Result<TaskBundle, lw_plan::PlanError> {
    TaskBundle::load(workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lw_library::{DataInstance, ExecutionContext, ExecutionResult, TransformInstanceLibrary, TransformRegistry};
    use lw_plan::{TaskDescriptor, WorkflowPlan, WorkflowStep};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn ok_transform(reg: &mut TransformRegistry) {
        reg.register(Arc::new(|_ctx: &ExecutionContext| ExecutionResult { success: true }), vec![], vec![]);
    }

    fn panicking_transform(reg: &mut TransformRegistry) {
        reg.register(Arc::new(|_ctx: &ExecutionContext| panic!("boom")), vec![], vec![]);
    }

    fn fast_cfg() -> BootstrapConfig {
        BootstrapConfig {
            relay_poll_interval: Duration::from_millis(5),
            max_relay_wait_attempts: 3,
            task_load_backoff: vec![Duration::from_millis(1)],
            relay_connect_timeout: Duration::from_secs(2),
        }
    }

    fn stage_bundle(root: &Path, def_path: &Path) -> TaskBundle {
        let given = DataInstance { source: "reads.fq".into(), dtype_name: "reads".into() };
        let mut given_map = BTreeMap::new();
        given_map.insert("sample".to_string(), given.clone());

        std::fs::create_dir_all(root.join("data/core")).unwrap();
        std::fs::write(root.join("data/core/reads.fq"), b"ACGT").unwrap();

        let plan = WorkflowPlan {
            given: given_map,
            steps: vec![WorkflowStep {
                index: 1,
                transform_source: def_path.to_path_buf(),
                transform_key: "abcde".into(),
                uses: vec![("sample".to_string(), given)],
                produces: vec![],
            }],
            targets: BTreeMap::new(),
        };
        let bundle = TaskBundle {
            root: root.to_path_buf(),
            task: TaskDescriptor { plan_key: "plan1".into(), library_keys: vec!["core".into()], config: serde_json::json!({}) },
            plan,
        };
        bundle.save_as(root).unwrap();
        bundle
    }

    #[tokio::test]
    async fn wait_for_relay_times_out_when_socket_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("relay/connections/main.in");
        let err = wait_for_relay(&missing, &fast_cfg()).await.unwrap_err();
        assert!(matches!(err, BootstrapError::RelayNotStarted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn wait_for_relay_succeeds_once_socket_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.in"), b"").unwrap();
        wait_for_relay(&dir.path().join("main.in"), &fast_cfg()).await.unwrap();
    }

    #[tokio::test]
    async fn load_task_retries_until_bundle_is_staged() {
        let dir = tempfile::tempdir().unwrap();
        stage_bundle(dir.path(), Path::new("ok.def"));
        let bundle = load_task(dir.path(), &fast_cfg()).await.unwrap();
        assert_eq!(bundle.task.plan_key, "plan1");
    }

    #[tokio::test]
    async fn resolve_step_binds_context_from_staged_data() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = stage_bundle(dir.path(), Path::new("ok.def"));
        std::fs::write(dir.path().join("ok.def.src"), b"source").unwrap();
        let transforms = TransformInstanceLibrary::load(
            vec![(PathBuf::from("ok.def"), ok_transform, dir.path().join("ok.def.src"))],
            true,
        );

        let io_dir = tempfile::tempdir().unwrap();
        let server = lw_relay::RelayServer::start(io_dir.path()).await.unwrap();
        let shell = RemoteShell::connect(&io_dir.path().join("main.in"), Duration::from_secs(2)).await.unwrap();

        let (_instance, ctx) = resolve_step(&bundle, &transforms, 1, shell).unwrap();
        assert!(ctx.inputs["sample"].source.ends_with("reads.fq"));
        assert!(ctx.shell.is_some());

        ctx.shell.unwrap().dispose().await;
        server.dispose().await;
    }

    #[test]
    fn execute_step_reports_failure_and_writes_traceback_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let def_path = dir.path().join("panics.def.src");
        std::fs::write(&def_path, b"source").unwrap();
        let transforms = TransformInstanceLibrary::load(vec![(PathBuf::from("panics.def"), panicking_transform, def_path)], true);
        let instance = transforms.get(Path::new("panics.def")).unwrap();
        let ctx = ExecutionContext {
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            transform_definition: PathBuf::from("panics.def"),
            type_libraries: vec![],
            shell: None,
        };
        let outcome = execute_step(instance, &ctx, dir.path());
        assert!(!outcome.result.success);
        let path = outcome.traceback_path.unwrap();
        assert!(path.exists());
        assert!(std::fs::read_to_string(path).unwrap().contains("boom"));
    }
}
