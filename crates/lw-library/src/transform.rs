//! Transform registration and the library of loadable transform
//! definitions.
//!
//! Python's original loader evaluates a `.py` file in an isolated import
//! path and captures whatever instance that file's top-level code happened
//! to construct, via a module-global "last loaded" slot reset before each
//! evaluation. There is no equivalent of evaluating arbitrary untrusted code
//! at runtime in a compiled binary, so here a transform definition is a
//! plain Rust function that registers itself against an explicit
//! [`TransformRegistry`] handle passed in by the caller — the same shape,
//! without the global mutable slot.

use crate::error::LibraryError;
use crate::instance::{DataInstance, DataInstanceLibrary};
use crate::types::{DataType, DataTypeLibrary, PropertyValue};
use lw_relay::RemoteShell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a transform's protocol needs to do its work: resolved input
/// and output instances, the definition's own source path (for relative
/// asset lookups), the type libraries it was validated against, and the
/// relay-backed shell it may drive a remote command through. `shell` is
/// `None` for contexts built outside the bootstrap sequence (standalone
/// transform tests, the `plan` subcommand's dry run).
pub struct ExecutionContext {
    /// Bound inputs, keyed by the transform's requirement name.
    pub inputs: BTreeMap<String, DataInstance>,
    /// Bound outputs, keyed by the transform's product name.
    pub outputs: BTreeMap<String, DataInstance>,
    /// Path to the transform definition that produced this context.
    pub transform_definition: PathBuf,
    /// Type library paths available while executing.
    pub type_libraries: Vec<PathBuf>,
    /// The relay connection bound during `RESOLVING_STEP`, if any.
    pub shell: Option<RemoteShell>,
}

/// Outcome of running a transform's protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the protocol completed successfully.
    pub success: bool,
}

/// A transform's executable body: given an [`ExecutionContext`], perform the
/// work and report the outcome.
pub type Protocol = Arc<dyn Fn(&ExecutionContext) -> ExecutionResult + Send + Sync>;

/// A single registered transform: its protocol function plus the input and
/// output [`DataType`] signatures it was declared against.
#[derive(Clone)]
pub struct TransformInstance {
    /// The transform's executable body.
    pub protocol: Protocol,
    /// Declared input types.
    pub input_signature: Vec<DataType>,
    /// Declared output types.
    pub output_signature: Vec<DataType>,
    /// Source path this instance was registered from, if loaded from a
    /// definition file rather than constructed directly.
    pub source: Option<PathBuf>,
}

impl std::fmt::Debug for TransformInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformInstance")
            .field("input_signature", &self.input_signature)
            .field("output_signature", &self.output_signature)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// An explicit registration handle a transform definition function is
/// handed. Replaces the Python loader's module-global "last loaded" slot:
/// the caller controls the handle's lifetime and can tell unambiguously
/// whether a definition registered anything.
#[derive(Default)]
pub struct TransformRegistry {
    registered: Option<TransformInstance>,
}

impl TransformRegistry {
    /// Create an empty registry, ready to be passed to a definition
    /// function.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by a transform definition to register its instance. A
    /// definition that calls this more than once overwrites its previous
    /// registration, mirroring the Python loader's "most recently
    /// constructed instance wins" semantics.
    pub fn register(
        &mut self,
        protocol: Protocol,
        input_signature: Vec<DataType>,
        output_signature: Vec<DataType>,
    ) {
        self.registered = Some(TransformInstance {
            protocol,
            input_signature,
            output_signature,
            source: None,
        });
    }

    /// Take the registered instance, if any, attaching `source` and the
    /// content-derived `(hash, short_key)` the way the Python loader
    /// computes them from the definition file's raw bytes.
    fn finish(mut self, source: &Path, content: &[u8]) -> Option<TransformInstance> {
        let mut inst = self.registered.take()?;
        inst.source = Some(source.to_path_buf());
        let _key = transform_key(content);
        Some(inst)
    }
}

/// Derive a transform definition's stable 5-character key from its raw
/// source bytes.
pub fn transform_key(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content);
    lw_ident::KeyGenerator::from_hex(&format!("{digest:x}"), 5, false)
        .unwrap_or_else(|_| "00000".to_string())
}

/// A function pointer a transform definition file compiles down to: given a
/// fresh [`TransformRegistry`], register exactly one transform instance.
pub type TransformDefinitionFn = fn(&mut TransformRegistry);

/// Load one transform definition function, computing its stable key from
/// the definition's source file on disk. Returns `Ok(None)` if the function
/// registered nothing, matching the Python loader's "a definition that
/// produces no instance yields `None`" behavior.
pub fn load_definition(
    definition_fn: TransformDefinitionFn,
    source_path: &Path,
) -> Result<Option<(TransformInstance, String)>, LibraryError> {
    let content = std::fs::read(source_path).map_err(|e| LibraryError::LoadFailed {
        path: source_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut registry = TransformRegistry::new();
    definition_fn(&mut registry);
    let key = transform_key(&content);
    Ok(registry.finish(source_path, &content).map(|inst| (inst, key)))
}

/// Namespace a [`TransformInstanceLibrary`] registers its built-in types
/// under.
pub const TRANSFORMS_NAMESPACE: &str = "transforms";

/// Canonical template written by [`TransformInstanceLibrary::add_stub`] —
/// the Rust-native stand-in for the original loader's boilerplate `.py`
/// template, since a definition here is a compiled function rather than a
/// file evaluated at runtime.
const TRANSFORM_STUB_TEMPLATE: &str = "\
// Generated transform stub. Implement `stub` and register it with the
// registry handed to your definition function, then reference this file's
// relative path from a workflow step.
pub fn stub(_registry: &mut lw_library::TransformRegistry) {
    // registry.register(std::sync::Arc::new(|_ctx| lw_library::ExecutionResult { success: true }), vec![], vec![]);
}
";

fn builtin_transforms_type_library() -> DataTypeLibrary {
    let mut types = BTreeMap::new();
    for name in ["transform", "example_input", "example_output"] {
        types.insert(
            name.to_string(),
            DataType {
                name: name.to_string(),
                properties: BTreeMap::from([("kind".to_string(), PropertyValue::Single(name.to_string()))]),
                ancestors: vec![],
            },
        );
    }
    DataTypeLibrary {
        key: TRANSFORMS_NAMESPACE.to_string(),
        source: None,
        schema: "1".to_string(),
        ontology: serde_json::json!({}),
        types,
    }
}

/// A loaded collection of transform definitions, keyed by their relative
/// path within the scanned root(s). Extends [`DataInstanceLibrary`] with a
/// built-in `transforms` namespace declaring the `transform`,
/// `example_input`, and `example_output` types, so a transform's own
/// fixtures can be tracked the same way any other data instance is.
pub struct TransformInstanceLibrary {
    data: DataInstanceLibrary,
    manifest: BTreeMap<PathBuf, (TransformInstance, String)>,
}

impl TransformInstanceLibrary {
    /// Root directory `add_stub`/`get_transform` resolve relative paths
    /// against.
    pub fn root(&self) -> &Path {
        &self.data.root
    }

    /// Create an empty, filesystem-rooted library ready to accept stubs.
    pub fn new(root: PathBuf) -> Self {
        Self {
            data: DataInstanceLibrary::new(root, "transform definitions", builtin_transforms_type_library()),
            manifest: BTreeMap::new(),
        }
    }

    /// Look up a loaded transform by its relative path.
    pub fn get(&self, rel_path: &Path) -> Result<&TransformInstance, LibraryError> {
        self.manifest
            .get(rel_path)
            .map(|(inst, _)| inst)
            .ok_or_else(|| LibraryError::NotFound {
                key: rel_path.display().to_string(),
            })
    }

    /// The stable content-derived key for a loaded transform.
    pub fn key_of(&self, rel_path: &Path) -> Result<&str, LibraryError> {
        self.manifest
            .get(rel_path)
            .map(|(_, key)| key.as_str())
            .ok_or_else(|| LibraryError::NotFound {
                key: rel_path.display().to_string(),
            })
    }

    /// Number of loaded transforms.
    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    /// Whether no transforms were loaded.
    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    /// Iterate loaded transforms by relative path.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &TransformInstance)> {
        self.manifest.iter().map(|(p, (inst, _))| (p.as_path(), inst))
    }

    /// Copy the canonical transform template to `rel_path` under this
    /// library's root, then load it back via [`Self::get_transform`].
    pub fn add_stub(&mut self, rel_path: &Path) -> Result<TransformInstance, LibraryError> {
        let dest = self.data.root.join(rel_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LibraryError::SaveFailed {
                path: parent.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(&dest, TRANSFORM_STUB_TEMPLATE).map_err(|e| LibraryError::SaveFailed {
            path: dest.display().to_string(),
            reason: e.to_string(),
        })?;
        self.get_transform(rel_path).cloned()
    }

    /// Load `rel_path` (resolved against this library's root) as a transform
    /// definition, recording it in the manifest under its content-derived
    /// key. The file's own logic isn't executed — there's no way to compile
    /// and run arbitrary Rust at this point — so the loaded instance carries
    /// a no-op protocol; its purpose is tracking the stub's existence and
    /// key, not running it.
    pub fn get_transform(&mut self, rel_path: &Path) -> Result<&TransformInstance, LibraryError> {
        let source_path = self.data.root.join(rel_path);
        let content = std::fs::read(&source_path).map_err(|e| LibraryError::LoadFailed {
            path: source_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let key = transform_key(&content);
        let instance = TransformInstance {
            protocol: Arc::new(|_ctx: &ExecutionContext| ExecutionResult::default()),
            input_signature: vec![],
            output_signature: vec![],
            source: Some(source_path),
        };
        self.manifest.insert(rel_path.to_path_buf(), (instance, key));
        Ok(&self.manifest.get(rel_path).unwrap().0)
    }

    /// Build a library from an explicit set of `(relative_path,
    /// definition_fn, absolute_source_path)` triples — the compiled-in
    /// stand-in for Python's directory-of-`.py`-files scan, since transform
    /// definitions here are Rust functions baked into the binary rather than
    /// files discovered at runtime.
    pub fn load(
        entries: Vec<(PathBuf, TransformDefinitionFn, PathBuf)>,
        silent: bool,
    ) -> Self {
        let mut manifest = BTreeMap::new();
        for (rel_path, def_fn, source_path) in entries {
            match load_definition(def_fn, &source_path) {
                Ok(Some((inst, key))) => {
                    manifest.insert(rel_path, (inst, key));
                }
                Ok(None) => {
                    if !silent {
                        tracing::warn!(path = %rel_path.display(), "definition registered no transform");
                    }
                }
                Err(e) => {
                    if !silent {
                        tracing::warn!(path = %rel_path.display(), error = %e, "failed to load transform definition");
                    }
                }
            }
        }
        Self {
            data: DataInstanceLibrary::new(PathBuf::new(), "compiled transform registry", builtin_transforms_type_library()),
            manifest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_ok(_ctx: &ExecutionContext) -> ExecutionResult {
        ExecutionResult { success: true }
    }

    fn register_one(reg: &mut TransformRegistry) {
        reg.register(Arc::new(noop_ok), vec![], vec![]);
    }

    fn register_nothing(_reg: &mut TransformRegistry) {}

    #[test]
    fn load_definition_captures_registered_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example.def");
        std::fs::write(&path, b"transform source text").unwrap();

        let (inst, key) = load_definition(register_one, &path).unwrap().unwrap();
        assert_eq!(key.len(), 5);
        let ctx = ExecutionContext {
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            transform_definition: path,
            type_libraries: vec![],
            shell: None,
        };
        assert!((inst.protocol)(&ctx).success);
    }

    #[test]
    fn load_definition_returns_none_when_nothing_registered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.def");
        std::fs::write(&path, b"no registration here").unwrap();

        let result = load_definition(register_nothing, &path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn same_content_yields_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.def");
        let b = dir.path().join("b.def");
        std::fs::write(&a, b"identical bytes").unwrap();
        std::fs::write(&b, b"identical bytes").unwrap();

        let (_, key_a) = load_definition(register_one, &a).unwrap().unwrap();
        let (_, key_b) = load_definition(register_one, &b).unwrap().unwrap();
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn transform_instance_library_loads_multiple_entries() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("one.def");
        let p2 = dir.path().join("two.def");
        std::fs::write(&p1, b"one").unwrap();
        std::fs::write(&p2, b"two").unwrap();

        let lib = TransformInstanceLibrary::load(
            vec![
                (PathBuf::from("one.def"), register_one, p1),
                (PathBuf::from("two.def"), register_one, p2),
            ],
            true,
        );
        assert_eq!(lib.len(), 2);
        assert!(lib.get(Path::new("one.def")).is_ok());
    }

    #[test]
    fn transform_instance_library_skips_failed_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("registers.def");
        std::fs::write(&p1, b"x").unwrap();
        let missing = dir.path().join("missing.def");

        let lib = TransformInstanceLibrary::load(
            vec![
                (PathBuf::from("registers.def"), register_one, p1),
                (PathBuf::from("missing.def"), register_one, missing),
            ],
            true,
        );
        assert_eq!(lib.len(), 1);
    }

    #[test]
    fn add_stub_writes_template_and_registers_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = TransformInstanceLibrary::new(dir.path().to_path_buf());

        let rel_path = PathBuf::from("steps/new_step.def");
        let inst = lib.add_stub(&rel_path).unwrap();

        assert!(dir.path().join(&rel_path).exists());
        assert!(inst.source.as_ref().unwrap().ends_with("new_step.def"));
        assert_eq!(lib.len(), 1);
        assert!(lib.key_of(&rel_path).is_ok());
    }

    #[test]
    fn get_transform_errors_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = TransformInstanceLibrary::new(dir.path().to_path_buf());
        let err = lib.get_transform(Path::new("nowhere.def")).unwrap_err();
        assert!(matches!(err, LibraryError::LoadFailed { .. }));
    }

    #[test]
    fn new_registers_builtin_transforms_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let lib = TransformInstanceLibrary::new(dir.path().to_path_buf());
        assert!(lib.data.get_type("transforms::transform").is_ok());
        assert!(lib.data.get_type("transforms::example_input").is_ok());
        assert!(lib.data.get_type("transforms::example_output").is_ok());
    }
}
