//! Implementations for each CLI subcommand. Kept library-level so they can
//! be exercised directly in tests without spawning the binary.

use crate::transforms::load_catalog;
use anyhow::{Context, Result, bail};
use lw_bootstrap::{BootstrapConfig, load_staged};
use lw_emit::emit_workflow;
use lw_library::{DataInstanceLibrary, DataType, DataTypeLibrary};
use lw_plan::{TargetRequest, TaskBundle, generate};
use lw_relay::{RelayServer, RemoteShell};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// `loomwork plan --given <lib>... --target <name>=<type> --type-lib <lib> [--catalog <name>] [--out <path>]`
pub async fn cmd_plan(
    given_paths: &[PathBuf],
    targets: &[String],
    type_lib_path: &Path,
    catalog_name: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let given_libs: Vec<DataInstanceLibrary> =
        given_paths.iter().map(|p| DataInstanceLibrary::load(p).with_context(|| format!("loading given library {}", p.display()))).collect::<Result<_, _>>()?;
    let given_refs: Vec<&DataInstanceLibrary> = given_libs.iter().collect();

    let type_lib = DataTypeLibrary::load(type_lib_path).with_context(|| format!("loading type library {}", type_lib_path.display()))?;

    let mut target_requests = Vec::new();
    for spec in targets {
        let (name, type_name) = spec.split_once('=').ok_or_else(|| anyhow::anyhow!("target '{spec}' must be name=type"))?;
        let dtype: DataType = type_lib.get(type_name).with_context(|| format!("unknown target type {type_name}"))?.clone();
        target_requests.push(TargetRequest { endpoint: name.to_string(), dtype, library: &type_lib });
    }

    let transforms = load_catalog(catalog_name);

    let plan = generate(&given_refs, &[&transforms], &target_requests, None)?;
    let rendered = serde_json::to_string_pretty(&plan)?;
    match out {
        Some(path) => {
            std::fs::write(path, &rendered)?;
            info!(path = %path.display(), steps = plan.steps.len(), "plan written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// `loomwork execute-transform --workspace <dir> --step <n> [--relay-socket <path>]`
pub async fn cmd_execute_transform(workspace: &Path, step: usize, relay_socket: &Path, catalog_name: Option<&str>) -> Result<()> {
    let transforms = load_catalog(catalog_name);
    let cfg = BootstrapConfig::default();
    let outcome = lw_bootstrap::run_step(workspace, relay_socket, step, &transforms, &cfg).await?;
    if outcome.result.success {
        info!(step, "step succeeded");
        Ok(())
    } else {
        bail!("step {step} failed{}", outcome.traceback_path.map(|p| format!(", traceback at {}", p.display())).unwrap_or_default());
    }
}

fn copy_dir_if_present(src: &Path, dest: &Path) -> Result<()> {
    if !src.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let to = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_if_present(&entry.path(), &to)?;
        } else {
            std::fs::copy(entry.path(), to)?;
        }
    }
    Ok(())
}

/// `loomwork stage-workflow --task-dir <dir> --work-root <dir> [--force]`
pub fn cmd_stage_workflow(task_dir: &Path, work_root: &Path, force: bool) -> Result<()> {
    let bundle = TaskBundle::load(task_dir).with_context(|| format!("loading task bundle from {}", task_dir.display()))?;
    let key = bundle.plan.key();
    let staged_dir = work_root.join("runs").join(&key);

    if staged_dir.exists() {
        info!(path = %staged_dir.display(), "already staged");
        if force {
            info!("removing previous stage");
            std::fs::remove_dir_all(&staged_dir)?;
        } else {
            return Ok(());
        }
    }

    bundle.save_as(&staged_dir)?;
    for lib_key in &bundle.task.library_keys {
        copy_dir_if_present(&bundle.data_dir(lib_key), &staged_dir.join("data").join(lib_key))?;
        copy_dir_if_present(&bundle.transforms_dir(lib_key), &staged_dir.join("transforms").join(lib_key))?;
    }
    let staged = TaskBundle::load(&staged_dir)?;

    let script = emit_workflow(&staged.plan, Path::new("msm_bootstrap"), &staged_dir);
    std::fs::write(staged_dir.join("workflow.nf"), script)?;

    info!(key = %key, path = %staged_dir.display(), "workflow staged");
    Ok(())
}

/// `loomwork execute-workflow --plan-key <key> --work-root <dir> --relay-socket <path>`
pub async fn cmd_execute_workflow(plan_key: &str, work_root: &Path, relay_socket: &Path) -> Result<()> {
    let workspace = work_root.join("runs").join(plan_key);
    if !workspace.exists() {
        bail!("plan folder not found: {}", workspace.display());
    }
    let bundle = load_staged(&workspace)?;
    info!(key = %plan_key, steps = bundle.plan.steps.len(), "executing workflow");

    let shell = RemoteShell::connect(relay_socket, Duration::from_secs(30)).await?;
    shell.register_on_out(std::sync::Arc::new(|line: &str| info!(relay_out = line)));
    shell.register_on_err(std::sync::Arc::new(|line: &str| tracing::error!(relay_err = line)));
    shell
        .exec(
            &format!("cd {} && export NXF_HOME=./.nextflow && nextflow -c ./workflow.config.nf -log ./nxf_logs/log run ./workflow.nf -resume -work-dir ./nxf_work", workspace.display()),
            None,
            true,
        )
        .await?;
    shell.dispose().await;
    Ok(())
}

/// `loomwork relay --io-dir <dir>`
pub async fn cmd_relay(io_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(io_dir)?;
    let server = RelayServer::start(io_dir).await?;
    info!(io_dir = %io_dir.display(), "relay listening");
    tokio::signal::ctrl_c().await?;
    info!("shutting down relay");
    server.dispose().await;
    Ok(())
}
