//! End-to-end exercises of the `loomwork` binary's subcommands.

use assert_cmd::Command;
use lw_library::{DataInstance, DataInstanceLibrary, DataType, DataTypeLibrary, PropertyValue};
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;

fn loomwork() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("loomwork").expect("binary `loomwork` should be built")
}

#[test]
fn help_exits_zero_and_lists_subcommands() {
    loomwork()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("execute-transform"))
        .stdout(predicate::str::contains("stage-workflow"))
        .stdout(predicate::str::contains("execute-workflow"))
        .stdout(predicate::str::contains("relay"));
}

fn raw_type() -> DataType {
    DataType {
        name: "raw".into(),
        properties: BTreeMap::from([("format".to_string(), PropertyValue::Single("raw".into()))]),
        ancestors: vec![],
    }
}

fn stage_given_library(dir: &std::path::Path) -> PathBuf {
    let root = dir.join("given");
    std::fs::create_dir_all(&root).unwrap();

    let mut types = BTreeMap::new();
    types.insert("raw".to_string(), raw_type());
    let type_lib = DataTypeLibrary { key: "core".into(), source: None, schema: "1".into(), ontology: serde_json::json!({}), types };

    let mut lib = DataInstanceLibrary::new(root.clone(), "fixture given", type_lib);
    std::fs::write(root.join("sample.raw"), b"hello").unwrap();
    lib.manifest.insert("sample".to_string(), DataInstance { source: PathBuf::from("sample.raw"), dtype_name: "raw".into() });

    let manifest_path = root.join("_metadata").join("index.json");
    lib.save(&manifest_path).unwrap();
    manifest_path
}

fn stage_target_type_library(dir: &std::path::Path) -> PathBuf {
    let mut types = BTreeMap::new();
    types.insert("raw".to_string(), raw_type());
    let lib = DataTypeLibrary { key: "core".into(), source: None, schema: "1".into(), ontology: serde_json::json!({}), types };
    let path = dir.join("types.json");
    lib.save(&path).unwrap();
    path
}

#[test]
fn plan_against_identity_transform_is_trivial_when_target_equals_given() {
    let dir = tempfile::tempdir().unwrap();
    let given_manifest = stage_given_library(dir.path());
    let type_lib_path = stage_target_type_library(dir.path());
    let out_path = dir.path().join("plan.json");

    loomwork()
        .arg("plan")
        .arg("--given")
        .arg(&given_manifest)
        .arg("--target")
        .arg("sample=raw")
        .arg("--type-lib")
        .arg(&type_lib_path)
        .arg("--out")
        .arg(&out_path)
        .assert()
        .success();

    let plan_json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert!(plan_json["steps"].as_array().unwrap().is_empty());
    assert_eq!(plan_json["targets"]["sample"]["dtype_name"], "raw");
}

#[test]
fn stage_workflow_fails_gracefully_on_missing_task_dir() {
    let dir = tempfile::tempdir().unwrap();
    loomwork()
        .arg("stage-workflow")
        .arg("--task-dir")
        .arg(dir.path().join("does-not-exist"))
        .assert()
        .failure();
}
