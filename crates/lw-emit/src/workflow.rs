//! Deterministic nextflow-style script emission. Grounded on
//! `WorkflowPlan.PrepareNextflow` in the original implementation's
//! `models/workflow.py`, adapted to the bootstrap-by-step-index CLI surface
//! (no per-step context file — the bootstrap reads the staged task bundle
//! directly).

use lw_library::DataInstance;
use lw_plan::{WorkflowPlan, WorkflowStep};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

const TAB: &str = "    ";

/// Render `plan` as a nextflow workflow script: one process block per
/// unique `(transform stem, transform key)`, a `publishDir` clause for
/// every produced instance that is also a plan target, and a trailing
/// `workflow {}` block wiring channels in plan order.
///
/// `bootstrap_path` and `external_work` locate the bootstrap helper as it
/// will be seen from the external runner's work directory; the generated
/// `Channel.fromPath` call joins them.
pub fn emit_workflow(plan: &WorkflowPlan, bootstrap_path: &Path, external_work: &Path) -> String {
    debug!(steps = plan.steps.len(), targets = plan.targets.len(), "emitting nextflow workflow");
    let targets: Vec<&DataInstance> = plan.targets.values().collect();

    let mut process_defs: Vec<(String, String)> = Vec::new();
    let mut workflow_calls: Vec<String> = Vec::new();

    for step in &plan.steps {
        let stem = step
            .transform_source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("transform");
        let name = format!("{stem}__{}", step.transform_key);

        if !process_defs.iter().any(|(n, _)| n == &name) {
            process_defs.push((name.clone(), process_block(&name, step, &targets)));
        }

        let output_vars: Vec<String> =
            step.produces.iter().map(|(n, _)| format!("_{}", sanitize_var(n))).collect();
        let output_expr = if output_vars.len() > 1 {
            format!("({})", output_vars.join(", "))
        } else {
            output_vars.join(", ")
        };
        let mut input_vars = vec!["bootstrap".to_string(), step.index.to_string()];
        input_vars.extend(step.uses.iter().map(|(n, _)| format!("_{}", sanitize_var(n))));
        workflow_calls.push(format!("{TAB}{output_expr} = {name}({})", input_vars.join(", ")));
    }

    let process_src = process_defs.iter().map(|(_, s)| s.as_str()).collect::<Vec<_>>().join("\n\n");
    let workflow_src = workflow_block(plan, bootstrap_path, external_work, &workflow_calls);

    format!("{process_src}\n\n\n{workflow_src}\n")
}

fn process_block(name: &str, step: &WorkflowStep, targets: &[&DataInstance]) -> String {
    let mut src = String::new();
    let _ = writeln!(src, "process {name} {{");

    let to_publish: Vec<&(String, DataInstance)> =
        step.produces.iter().filter(|(_, inst)| targets.contains(&inst)).collect();
    for (_, inst) in &to_publish {
        let _ = writeln!(
            src,
            "{TAB}publishDir \"$params.output\", mode: \"copy\", pattern: \"{}\"",
            inst.source.display()
        );
    }
    if !to_publish.is_empty() {
        src.push('\n');
    }

    let _ = writeln!(src, "{TAB}input:");
    let _ = writeln!(src, "{TAB}{TAB}path bootstrap");
    let _ = writeln!(src, "{TAB}{TAB}val step_index");
    for (var_name, inst) in &step.uses {
        let _ = writeln!(src, "{TAB}{TAB}path {} // {}", sanitize_var(var_name), inst.dtype_name);
    }
    src.push('\n');

    let _ = writeln!(src, "{TAB}output:");
    for (_, inst) in &step.produces {
        let _ = writeln!(src, "{TAB}{TAB}path \"{}\"", inst.source.display());
    }
    src.push('\n');

    let _ = writeln!(src, "{TAB}script:");
    let _ = writeln!(src, "{TAB}\"\"\"");
    let _ = writeln!(src, "{TAB}bash $bootstrap $step_index");
    let _ = writeln!(src, "{TAB}\"\"\"");
    src.push('}');
    src
}

fn workflow_block(plan: &WorkflowPlan, bootstrap_path: &Path, external_work: &Path, calls: &[String]) -> String {
    let mut wf = String::new();
    wf.push_str("workflow {\n");
    let _ = writeln!(
        wf,
        "{TAB}bootstrap = Channel.fromPath(\"{}\")",
        external_work.join(bootstrap_path).display()
    );
    wf.push('\n');
    for (name, inst) in &plan.given {
        let _ = writeln!(
            wf,
            "{TAB}_{} = Channel.fromPath(\"{}\") // {}",
            sanitize_var(name),
            inst.source.display(),
            inst.dtype_name
        );
    }
    wf.push('\n');
    for call in calls {
        wf.push_str(call);
        wf.push('\n');
    }
    wf.push('}');
    wf
}

fn sanitize_var(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn sample_plan() -> WorkflowPlan {
        let mut given = BTreeMap::new();
        given.insert("sample_reads".to_string(), DataInstance { source: "sample.fastq".into(), dtype_name: "reads".into() });

        let mut targets = BTreeMap::new();
        targets.insert(
            "final_assembly".to_string(),
            DataInstance { source: "a1b2c_xyz9.out".into(), dtype_name: "assembly".into() },
        );

        WorkflowPlan {
            given,
            steps: vec![WorkflowStep {
                index: 1,
                transform_source: PathBuf::from("/defs/assemble.def"),
                transform_key: "a1b2c".into(),
                uses: vec![("sample_reads".to_string(), DataInstance { source: "sample.fastq".into(), dtype_name: "reads".into() })],
                produces: vec![(
                    "a1b2c_xyz9".to_string(),
                    DataInstance { source: "a1b2c_xyz9.out".into(), dtype_name: "assembly".into() },
                )],
            }],
            targets,
        }
    }

    #[test]
    fn emits_one_process_block_per_unique_transform() {
        let plan = sample_plan();
        let out = emit_workflow(&plan, Path::new("msm_bootstrap"), Path::new("/external"));
        assert_eq!(out.matches("process assemble__a1b2c {").count(), 1);
    }

    #[test]
    fn publishes_only_target_outputs() {
        let plan = sample_plan();
        let out = emit_workflow(&plan, Path::new("msm_bootstrap"), Path::new("/external"));
        assert!(out.contains("publishDir \"$params.output\""));
        assert!(out.contains("a1b2c_xyz9.out"));
    }

    #[test]
    fn skips_publish_dir_when_step_produces_no_targets() {
        let mut plan = sample_plan();
        plan.targets.clear();
        let out = emit_workflow(&plan, Path::new("msm_bootstrap"), Path::new("/external"));
        assert!(!out.contains("publishDir"));
    }

    #[test]
    fn workflow_block_wires_given_and_calls_in_order() {
        let plan = sample_plan();
        let out = emit_workflow(&plan, Path::new("msm_bootstrap"), Path::new("/external"));
        assert!(out.contains("_sample_reads = Channel.fromPath(\"sample.fastq\")"));
        assert!(out.contains("_a1b2c_xyz9 = assemble__a1b2c(bootstrap, 1, _sample_reads)"));
    }

    #[test]
    fn emission_is_deterministic() {
        let plan = sample_plan();
        let a = emit_workflow(&plan, Path::new("msm_bootstrap"), Path::new("/external"));
        let b = emit_workflow(&plan, Path::new("msm_bootstrap"), Path::new("/external"));
        assert_eq!(a, b);
    }

    #[test]
    fn sanitize_var_replaces_path_separators() {
        assert_eq!(sanitize_var("blobs/input.bin"), "blobs_input_bin");
    }
}
