//! A small compiled-in transform catalog used by the `plan` subcommand.
//!
//! [`lw_library::TransformInstanceLibrary::load`] takes plain `fn` pointers
//! rather than closures, since real transform definitions are Rust
//! functions baked into a deployment's binary rather than files discovered
//! at runtime (see `lw_library::transform`'s module docs). A generic CLI
//! therefore cannot load an arbitrary operator-supplied `--catalog`
//! directory the way the original Python tooling evaluates arbitrary `.py`
//! files; `--catalog` here only selects a name within this compiled-in set,
//! and is otherwise informational. Deployments that need their own
//! transforms compile their own `lw-cli`-alike binary against a catalog
//! like this one.

use lw_library::{DataType, ExecutionContext, ExecutionResult, PropertyValue, TransformDefinitionFn, TransformInstanceLibrary, TransformRegistry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

fn file_type(name: &str) -> DataType {
    DataType {
        name: name.to_string(),
        properties: BTreeMap::from([("format".to_string(), PropertyValue::Single(name.to_string()))]),
        ancestors: vec![],
    }
}

fn copy_protocol(ctx: &ExecutionContext) -> ExecutionResult {
    for (name, output) in &ctx.outputs {
        let Some(input) = ctx.inputs.values().next() else {
            return ExecutionResult { success: false };
        };
        if let Some(parent) = output.source.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return ExecutionResult { success: false };
            }
        }
        if std::fs::copy(&input.source, &output.source).is_err() {
            return ExecutionResult { success: false };
        }
        info!(output = %name, "copied input to output");
    }
    ExecutionResult { success: true }
}

fn register_identity(reg: &mut TransformRegistry) {
    reg.register(Arc::new(copy_protocol), vec![file_type("raw")], vec![file_type("raw")]);
}

fn register_fasta_to_orfs(reg: &mut TransformRegistry) {
    reg.register(Arc::new(copy_protocol), vec![file_type("fasta")], vec![file_type("orfs_faa")]);
}

/// Content each demo definition's stable key is derived from. Written to
/// fixed files under a scratch directory at load time, since
/// [`lw_library::transform::load_definition`] hashes a real file's bytes
/// rather than an in-memory constant.
const DEMO_SOURCES: &[(&str, &[u8])] = &[("identity.def", b"identity: raw -> raw"), ("fasta_to_orfs.def", b"fasta_to_orfs: fasta -> orfs_faa")];

/// Relative path, definition fn, and a source path the definition's stable
/// content key is derived from, for every transform in the compiled-in
/// demo catalog.
pub fn builtin_catalog(scratch_dir: &Path) -> std::io::Result<Vec<(PathBuf, TransformDefinitionFn, PathBuf)>> {
    std::fs::create_dir_all(scratch_dir)?;
    let fns: [TransformDefinitionFn; 2] = [register_identity, register_fasta_to_orfs];
    let mut entries = Vec::new();
    for ((rel, content), def_fn) in DEMO_SOURCES.iter().zip(fns) {
        let source_path = scratch_dir.join(rel);
        std::fs::write(&source_path, content)?;
        entries.push((PathBuf::from(rel), def_fn, source_path));
    }
    Ok(entries)
}

/// Build the compiled-in catalog, warning if `requested_name` doesn't
/// match anything (it's informational only — this CLI cannot load
/// transforms dynamically).
pub fn load_catalog(requested_name: Option<&str>) -> TransformInstanceLibrary {
    if let Some(name) = requested_name {
        info!(catalog = name, "using compiled-in transform catalog (dynamic catalog loading is not supported)");
    }
    let scratch = std::env::temp_dir().join("loomwork-builtin-transforms");
    match builtin_catalog(&scratch) {
        Ok(entries) => TransformInstanceLibrary::load(entries, false),
        Err(e) => {
            tracing::warn!(error = %e, "failed to stage compiled-in transform catalog");
            TransformInstanceLibrary::load(Vec::new(), true)
        }
    }
}
