//! Content-addressed data instances and the library that manifests them.

use crate::error::LibraryError;
use crate::types::{DataType, DataTypeLibrary};
use chrono::{DateTime, Utc};
use lw_dispatch::{Logistics, Source, SourceType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// What to do when [`DataInstanceLibrary::add`] encounters a destination
/// that already has a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExist {
    /// Overwrite the existing manifest entry and re-transfer the file.
    Overwrite,
    /// Leave the existing entry and skip the incoming item.
    Skip,
    /// Fail the whole `add` call.
    Error,
}

/// A single file tracked by a [`DataInstanceLibrary`]: a path relative to
/// the library plus the type it was recorded as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInstance {
    /// Path to the backing file, relative to the owning library's root.
    pub source: PathBuf,
    /// Name of the [`DataType`] this instance was recorded as, within its
    /// library's `types_library`.
    pub dtype_name: String,
}

impl DataInstance {
    /// Stable content-derived hash: the file's relative path plus its
    /// resolved type's full (ancestor-inclusive) property set, so that
    /// identical files recorded under distinct types are distinguishable.
    pub fn hash_key(&self, dtype: &DataType, types_library: &DataTypeLibrary) -> String {
        let props: Vec<String> = dtype.as_properties(types_library).into_iter().collect();
        lw_ident::KeyGenerator::from_str(
            &format!("{}{}", self.source.display(), props.join("")),
            12,
        )
    }
}

/// An item queued for [`DataInstanceLibrary::add`].
pub struct AddItem {
    /// Absolute path to the file being added.
    pub src: PathBuf,
    /// Destination path, relative to the library root.
    pub rel_dest: PathBuf,
    /// `"namespace::name"`-style type reference; here just the name within
    /// the library's single `types_library`.
    pub dtype_name: String,
}

/// A manifest of [`DataInstance`]s backed by one root directory and typed
/// against one or more namespaced [`DataTypeLibrary`] catalogs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataInstanceLibrary {
    /// Root directory this library's file payloads live under.
    pub root: PathBuf,
    /// Free-form description.
    pub description: String,
    /// Type catalogs instances are validated against, keyed by namespace.
    pub type_libraries: BTreeMap<String, DataTypeLibrary>,
    /// Manifest of tracked instances, keyed by a caller-chosen name.
    pub manifest: BTreeMap<String, DataInstance>,
    /// Creation timestamp.
    pub time_created: DateTime<Utc>,
    /// Timestamp of the most recent save.
    pub time_modified: DateTime<Utc>,
}

/// A type reference has either the namespaced `"namespace::name"` shape or a
/// bare name, which resolves against the implicit `"default"` namespace.
const DEFAULT_NAMESPACE: &str = "default";

fn split_dtype_ref(dtype_ref: &str) -> (&str, &str) {
    match dtype_ref.split_once("::") {
        Some((ns, name)) => (ns, name),
        None => (DEFAULT_NAMESPACE, dtype_ref),
    }
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    description: String,
    type_libraries: BTreeMap<String, PathBuf>,
    manifest: BTreeMap<String, DataInstance>,
    time_created: DateTime<Utc>,
    time_modified: DateTime<Utc>,
}

impl DataInstanceLibrary {
    /// Create an empty library rooted at `root`, with `types_library`
    /// registered under the implicit `"default"` namespace.
    pub fn new(root: PathBuf, description: impl Into<String>, types_library: DataTypeLibrary) -> Self {
        let now = Utc::now();
        let mut type_libraries = BTreeMap::new();
        type_libraries.insert(DEFAULT_NAMESPACE.to_string(), types_library);
        Self {
            root,
            description: description.into(),
            type_libraries,
            manifest: BTreeMap::new(),
            time_created: now,
            time_modified: now,
        }
    }

    /// Look up a manifest entry by key.
    pub fn get(&self, key: &str) -> Result<&DataInstance, LibraryError> {
        self.manifest
            .get(key)
            .ok_or_else(|| LibraryError::NotFound { key: key.to_string() })
    }

    /// Resolve a `"namespace::name"` (or bare, implicitly-`"default"`) type
    /// reference to its owning catalog and [`DataType`].
    pub fn get_type(&self, dtype_ref: &str) -> Result<(&DataTypeLibrary, &DataType), LibraryError> {
        let (namespace, name) = split_dtype_ref(dtype_ref);
        let lib = self.type_libraries.get(namespace).ok_or_else(|| LibraryError::NotFound {
            key: namespace.to_string(),
        })?;
        let dtype = lib.get(name)?;
        Ok((lib, dtype))
    }

    /// Register `lib` under `namespace` and persist it to this library's
    /// metadata path (`root/_metadata/types/<namespace>.json`).
    pub fn add_type_library(&mut self, namespace: impl Into<String>, lib: DataTypeLibrary) -> Result<(), LibraryError> {
        let namespace = namespace.into();
        let types_dir = self.root.join("_metadata").join("types");
        std::fs::create_dir_all(&types_dir).map_err(|e| LibraryError::SaveFailed {
            path: types_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let path = types_dir.join(format!("{namespace}.json"));
        lib.save(&path)?;
        self.type_libraries.insert(namespace, lib);
        self.time_modified = Utc::now();
        Ok(())
    }

    /// Load a library's `_metadata/index.json` manifest file, resolving each
    /// namespace's catalog path relative to the manifest's parent directory.
    /// Manifest entries whose backing file no longer exists are skipped and
    /// logged, rather than failing the whole load.
    pub fn load(manifest_path: &Path) -> Result<Self, LibraryError> {
        let root = manifest_path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let content = std::fs::read_to_string(manifest_path).map_err(|e| LibraryError::LoadFailed {
            path: manifest_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file: ManifestFile = serde_json::from_str(&content).map_err(|e| LibraryError::LoadFailed {
            path: manifest_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut type_libraries = BTreeMap::new();
        for (namespace, types_path) in file.type_libraries {
            let resolved = if types_path.is_absolute() {
                types_path
            } else {
                manifest_path.parent().map(|p| p.join(&types_path)).unwrap_or(types_path)
            };
            type_libraries.insert(namespace, DataTypeLibrary::load(&resolved)?);
        }

        let mut manifest = BTreeMap::new();
        for (k, inst) in file.manifest {
            if !root.join(&inst.source).exists() {
                warn!(key = %k, path = %inst.source.display(), "skipping manifest entry whose file no longer exists");
                continue;
            }
            manifest.insert(k, inst);
        }

        Ok(Self {
            root,
            description: file.description,
            type_libraries,
            manifest,
            time_created: file.time_created,
            time_modified: file.time_modified,
        })
    }

    /// Write `_metadata/index.json`, updating `time_modified`. Each
    /// namespace's catalog is saved separately under
    /// `_metadata/types/<namespace>.json`.
    pub fn save(&mut self, manifest_path: &Path) -> Result<(), LibraryError> {
        self.time_modified = Utc::now();
        let types_dir = manifest_path
            .parent()
            .map(|p| p.join("types"))
            .ok_or_else(|| LibraryError::SaveFailed {
                path: manifest_path.display().to_string(),
                reason: "manifest path has no parent directory".into(),
            })?;
        std::fs::create_dir_all(&types_dir).map_err(|e| LibraryError::SaveFailed {
            path: types_dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut type_library_paths = BTreeMap::new();
        for (namespace, lib) in &self.type_libraries {
            let path = types_dir.join(format!("{namespace}.json"));
            lib.save(&path)?;
            type_library_paths.insert(namespace.clone(), path);
        }

        let file = ManifestFile {
            description: self.description.clone(),
            type_libraries: type_library_paths,
            manifest: self.manifest.clone(),
            time_created: self.time_created,
            time_modified: self.time_modified,
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| LibraryError::SaveFailed {
            path: manifest_path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(manifest_path, content).map_err(|e| LibraryError::SaveFailed {
            path: manifest_path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Persist metadata, then move the whole library — payload files plus
    /// `_metadata` — to `dest`, file by file through [`Logistics`], the same
    /// dispatcher [`DataInstanceLibrary::add`] transfers new files through.
    pub async fn save_as(&mut self, dest: &Path) -> Result<(), LibraryError> {
        let manifest_path = self.root.join("_metadata").join("index.json");
        self.save(&manifest_path)?;

        let mut logistics = Logistics::new();
        for entry in walkdir::WalkDir::new(&self.root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let dest_path = dest.join(rel);
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LibraryError::SaveFailed {
                    path: parent.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
            logistics
                .queue_transfer(
                    Source::direct(entry.path().display().to_string()),
                    Source::direct(dest_path.display().to_string()),
                )
                .map_err(|e| LibraryError::SaveFailed {
                    path: dest.display().to_string(),
                    reason: e.to_string(),
                })?;
        }

        let result = logistics.execute_transfers(None).await;
        if !result.errors.is_empty() {
            return Err(LibraryError::SaveFailed {
                path: dest.display().to_string(),
                reason: result.errors.join("; "),
            });
        }
        self.root = dest.to_path_buf();
        Ok(())
    }

    /// Validate and transfer each item into the library, recording a
    /// manifest entry for every one that transfers successfully.
    pub async fn add(&mut self, items: Vec<AddItem>, mode: SourceType, on_exist: OnExist) -> Result<(), LibraryError> {
        let mut logistics = Logistics::new();
        let mut accepted = Vec::new();
        for item in items {
            if !item.src.exists() {
                return Err(LibraryError::RegistrationFailed {
                    reason: format!("source does not exist: {}", item.src.display()),
                });
            }
            if item.rel_dest.is_absolute() {
                return Err(LibraryError::RegistrationFailed {
                    reason: format!("rel_dest must be relative: {}", item.rel_dest.display()),
                });
            }
            self.get_type(&item.dtype_name).map_err(|_| {
                LibraryError::RegistrationFailed {
                    reason: format!("unknown datatype: {}", item.dtype_name),
                }
            })?;

            let key = item.rel_dest.display().to_string();
            if self.manifest.contains_key(&key) {
                match on_exist {
                    OnExist::Skip => continue,
                    OnExist::Error => {
                        return Err(LibraryError::RegistrationFailed {
                            reason: format!("destination already exists: {key}"),
                        });
                    }
                    OnExist::Overwrite => {}
                }
            }

            let dest_path = self.root.join(&item.rel_dest);
            logistics
                .queue_transfer(
                    Source::direct(item.src.display().to_string()),
                    Source::new(dest_path.display().to_string(), mode),
                )
                .map_err(|e| LibraryError::RegistrationFailed { reason: e.to_string() })?;
            accepted.push(item);
        }

        let result = logistics.execute_transfers(None).await;
        if !result.errors.is_empty() {
            return Err(LibraryError::RegistrationFailed {
                reason: result.errors.join("; "),
            });
        }

        for item in accepted {
            let key = item.rel_dest.display().to_string();
            self.manifest.insert(
                key,
                DataInstance {
                    source: item.rel_dest,
                    dtype_name: item.dtype_name,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyValue;
    use std::collections::BTreeMap as Map;

    fn sample_types() -> DataTypeLibrary {
        let mut types = Map::new();
        types.insert(
            "blob".to_string(),
            DataType {
                name: "blob".into(),
                properties: Map::from([("kind".to_string(), PropertyValue::Single("blob".into()))]),
                ancestors: vec![],
            },
        );
        DataTypeLibrary {
            key: "core".into(),
            source: None,
            schema: "1".into(),
            ontology: serde_json::json!({}),
            types,
        }
    }

    #[tokio::test]
    async fn add_records_manifest_entry_after_successful_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let src_file = dir.path().join("input.bin");
        std::fs::write(&src_file, b"payload").unwrap();

        let root = dir.path().join("lib");
        std::fs::create_dir_all(&root).unwrap();
        let mut lib = DataInstanceLibrary::new(root.clone(), "test lib", sample_types());

        lib.add(
            vec![AddItem {
                src: src_file,
                rel_dest: PathBuf::from("blobs/input.bin"),
                dtype_name: "blob".into(),
            }],
            SourceType::Direct,
            OnExist::Error,
        )
        .await
        .unwrap();

        assert!(lib.manifest.contains_key("blobs/input.bin"));
        assert!(root.join("blobs/input.bin").exists());
    }

    #[tokio::test]
    async fn add_rejects_unknown_datatype() {
        let dir = tempfile::tempdir().unwrap();
        let src_file = dir.path().join("input.bin");
        std::fs::write(&src_file, b"payload").unwrap();
        let mut lib = DataInstanceLibrary::new(dir.path().join("lib"), "test", sample_types());

        let err = lib
            .add(
                vec![AddItem {
                    src: src_file,
                    rel_dest: PathBuf::from("x.bin"),
                    dtype_name: "protein".into(),
                }],
                SourceType::Direct,
                OnExist::Error,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::RegistrationFailed { .. }));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("lib");
        std::fs::create_dir_all(&root).unwrap();
        let mut lib = DataInstanceLibrary::new(root.clone(), "round trip", sample_types());
        lib.manifest.insert(
            "x.bin".into(),
            DataInstance {
                source: PathBuf::from("x.bin"),
                dtype_name: "blob".into(),
            },
        );
        std::fs::write(root.join("x.bin"), b"data").unwrap();

        let manifest_path = root.join("_metadata").join("index.json");
        lib.save(&manifest_path).unwrap();

        let loaded = DataInstanceLibrary::load(&manifest_path).unwrap();
        assert_eq!(loaded.manifest.len(), 1);
        assert_eq!(loaded.description, "round trip");
    }

    #[test]
    fn load_skips_manifest_entries_with_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("lib");
        std::fs::create_dir_all(&root).unwrap();
        let mut lib = DataInstanceLibrary::new(root.clone(), "desc", sample_types());
        lib.manifest.insert(
            "missing.bin".into(),
            DataInstance {
                source: PathBuf::from("missing.bin"),
                dtype_name: "blob".into(),
            },
        );
        let manifest_path = root.join("_metadata").join("index.json");
        lib.save(&manifest_path).unwrap();

        let loaded = DataInstanceLibrary::load(&manifest_path).unwrap();
        assert!(loaded.manifest.is_empty());
    }
}
