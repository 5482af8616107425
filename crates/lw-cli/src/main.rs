#![deny(unsafe_code)]
//! Thin argument parsing and dispatch; real logic lives in [`commands`].
//! Logging verbosity is controlled by `RUST_LOG` (see
//! [`lw_telemetry::install`]), not a CLI flag, so startup never needs to
//! mutate the process environment.

mod commands;
mod transforms;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "loomwork", version, about = "Plan and drive type-directed data workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the planner over given libraries and requested targets, printing
    /// or saving the resulting plan.
    Plan {
        /// Path to a Data Instance Library manifest to draw given instances
        /// from. Repeatable.
        #[arg(long = "given", required = true)]
        given: Vec<PathBuf>,

        /// A `name=type` target request. Repeatable.
        #[arg(long = "target", required = true)]
        target: Vec<String>,

        /// Data Type Library manifest the requested target types are
        /// resolved against.
        #[arg(long = "type-lib")]
        type_lib: PathBuf,

        /// Name of a compiled-in transform catalog to plan against.
        #[arg(long = "catalog")]
        catalog: Option<String>,

        /// Write the plan here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Bootstrap and run one step of a staged workflow.
    ExecuteTransform {
        /// The staged task bundle's directory.
        #[arg(long)]
        workspace: PathBuf,

        /// 1-based step index to run.
        #[arg(long)]
        step: usize,

        /// Path to the relay's main connection FIFO.
        #[arg(long = "relay-socket", default_value = "relay/connections/main.in")]
        relay_socket: PathBuf,

        /// Name of a compiled-in transform catalog to resolve the step
        /// against.
        #[arg(long = "catalog")]
        catalog: Option<String>,
    },

    /// Materialize a task bundle at its canonical work location.
    StageWorkflow {
        /// Directory containing the unstaged task bundle.
        #[arg(long = "task-dir")]
        task_dir: PathBuf,

        /// Root directory staged runs live under.
        #[arg(long = "work-root", default_value = "work")]
        work_root: PathBuf,

        /// Re-stage even if the destination already exists.
        #[arg(long)]
        force: bool,
    },

    /// Invoke the external runner for an already staged workflow.
    ExecuteWorkflow {
        /// The staged plan's stable key.
        #[arg(long = "plan-key")]
        plan_key: String,

        /// Root directory staged runs live under.
        #[arg(long = "work-root", default_value = "work")]
        work_root: PathBuf,

        /// Path to the relay's main connection FIFO.
        #[arg(long = "relay-socket", default_value = "relay/connections/main.in")]
        relay_socket: PathBuf,
    },

    /// Start a standalone relay server.
    Relay {
        /// Directory to host the relay's FIFOs under.
        #[arg(long = "io-dir")]
        io_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    lw_telemetry::install();

    match cli.command {
        Commands::Plan { given, target, type_lib, catalog, out } => {
            commands::cmd_plan(&given, &target, &type_lib, catalog.as_deref(), out.as_deref()).await
        }
        Commands::ExecuteTransform { workspace, step, relay_socket, catalog } => {
            commands::cmd_execute_transform(&workspace, step, &relay_socket, catalog.as_deref()).await
        }
        Commands::StageWorkflow { task_dir, work_root, force } => commands::cmd_stage_workflow(&task_dir, &work_root, force),
        Commands::ExecuteWorkflow { plan_key, work_root, relay_socket } => {
            commands::cmd_execute_workflow(&plan_key, &work_root, &relay_socket).await
        }
        Commands::Relay { io_dir } => commands::cmd_relay(&io_dir).await,
    }
}
