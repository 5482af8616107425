//! Data types and the type library that defines them.

use crate::error::LibraryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A property value: either a single string or a list of strings (e.g.
/// `format = "fasta"` vs. `tags = ["nucleotide", "assembly"]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A single scalar value.
    Single(String),
    /// A list of values.
    List(Vec<String>),
}

impl PropertyValue {
    fn as_property_string(&self) -> String {
        match self {
            PropertyValue::Single(s) => s.clone(),
            PropertyValue::List(items) => items.join(","),
        }
    }
}

/// A named type in the ontology: a property set plus zero or more ancestor
/// types whose properties it implicitly carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    /// Type name, unique within its library.
    pub name: String,
    /// Declared properties (`key = value` or `key = [v1, v2, ...]`).
    pub properties: BTreeMap<String, PropertyValue>,
    /// Ancestor type names (resolved within the same library).
    #[serde(default)]
    pub ancestors: Vec<String>,
}

impl DataType {
    /// Render this type's own properties (not including ancestors) as the
    /// `"key=value"` set used for [`lw_types`] property-subset comparisons.
    pub fn own_properties(&self) -> std::collections::BTreeSet<String> {
        self.properties
            .iter()
            .map(|(k, v)| format!("{k}={}", v.as_property_string()))
            .collect()
    }

    /// Render the full property set: this type's own properties plus every
    /// ancestor's, transitively, via `resolve_ancestors`.
    pub fn as_properties(&self, library: &DataTypeLibrary) -> std::collections::BTreeSet<String> {
        let mut props = self.own_properties();
        for ancestor_name in &self.ancestors {
            if let Some(ancestor) = library.types.get(ancestor_name) {
                props.extend(ancestor.as_properties(library));
            }
        }
        props
    }
}

/// A loaded collection of related [`DataType`]s sharing a schema/ontology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTypeLibrary {
    /// Stable key, derived from the source file's stem.
    pub key: String,
    /// Source path this library was loaded from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Schema version string.
    pub schema: String,
    /// Free-form ontology metadata (e.g. description, citation).
    #[serde(default)]
    pub ontology: serde_json::Value,
    /// Types keyed by name.
    pub types: BTreeMap<String, DataType>,
}

impl DataTypeLibrary {
    /// Look up a type by name.
    pub fn get(&self, key: &str) -> Result<&DataType, LibraryError> {
        self.types.get(key).ok_or_else(|| LibraryError::NotFound {
            key: key.to_string(),
        })
    }

    /// Load a [`DataTypeLibrary`] from a JSON file on disk. The library's
    /// `key` is taken from the file's stem.
    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        let content = std::fs::read_to_string(path).map_err(|e| LibraryError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut lib: DataTypeLibrary =
            serde_json::from_str(&content).map_err(|e| LibraryError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        lib.key = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| lib.key.clone());
        lib.source = Some(path.to_path_buf());
        Ok(lib)
    }

    /// Save this library as JSON to `path`.
    pub fn save(&self, path: &Path) -> Result<(), LibraryError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| LibraryError::SaveFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| LibraryError::SaveFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_library() -> DataTypeLibrary {
        let mut types = BTreeMap::new();
        types.insert(
            "file".to_string(),
            DataType {
                name: "file".into(),
                properties: BTreeMap::from([(
                    "kind".to_string(),
                    PropertyValue::Single("blob".into()),
                )]),
                ancestors: vec![],
            },
        );
        types.insert(
            "fasta".to_string(),
            DataType {
                name: "fasta".into(),
                properties: BTreeMap::from([(
                    "format".to_string(),
                    PropertyValue::Single("fasta".into()),
                )]),
                ancestors: vec!["file".into()],
            },
        );
        DataTypeLibrary {
            key: "bio".into(),
            source: None,
            schema: "1".into(),
            ontology: serde_json::json!({}),
            types,
        }
    }

    #[test]
    fn as_properties_includes_ancestors() {
        let lib = sample_library();
        let fasta = lib.get("fasta").unwrap();
        let props = fasta.as_properties(&lib);
        assert!(props.contains("format=fasta"));
        assert!(props.contains("kind=blob"));
    }

    #[test]
    fn own_properties_excludes_ancestors() {
        let lib = sample_library();
        let fasta = lib.get("fasta").unwrap();
        let props = fasta.own_properties();
        assert!(props.contains("format=fasta"));
        assert!(!props.contains("kind=blob"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let lib = sample_library();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bio.json");
        lib.save(&path).unwrap();
        let loaded = DataTypeLibrary::load(&path).unwrap();
        assert_eq!(loaded.key, "bio");
        assert_eq!(loaded.types.len(), 2);
    }

    #[test]
    fn get_missing_type_errors() {
        let lib = sample_library();
        let err = lib.get("protein").unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
    }

    #[test]
    fn property_value_list_joins_with_commas() {
        let dt = DataType {
            name: "tagged".into(),
            properties: BTreeMap::from([(
                "tags".to_string(),
                PropertyValue::List(vec!["a".into(), "b".into()]),
            )]),
            ancestors: vec![],
        };
        assert!(dt.own_properties().contains("tags=a,b"));
    }
}
