//! Construct a [`WorkflowPlan`] by bridging [`lw_library`]'s concrete
//! data/transform catalogs into [`lw_types`]'s abstract property algebra,
//! running [`lw_planner`] over it, and reifying the winning solution back
//! into a named, serializable step sequence. Grounded on
//! `WorkflowPlan.Generate`/`WorkflowStep` in the original implementation's
//! `models/workflow.py`.

use crate::error::PlanError;
use lw_library::{DataInstance, DataInstanceLibrary, DataType, DataTypeLibrary, TransformInstanceLibrary};
use lw_planner::{Planner, DEFAULT_HORIZON};
use lw_types::{Namespace, NodeId, TransformId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A single unit of work in an executable plan: one transform applied to a
/// named set of inputs, producing a named set of outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// 1-based position in the plan's execution order.
    pub index: usize,
    /// Path to the transform definition this step invokes.
    pub transform_source: PathBuf,
    /// The transform definition's stable content-derived key.
    pub transform_key: String,
    /// Named inputs, in the transform's declared requirement order.
    pub uses: Vec<(String, DataInstance)>,
    /// Named outputs, in the transform's declared product order.
    pub produces: Vec<(String, DataInstance)>,
}

/// A fully resolved, serializable workflow: the given inputs, the ordered
/// steps needed to reach the requested targets, and the target instances
/// themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    /// Every given instance the plan was built against, keyed by endpoint
    /// name.
    pub given: BTreeMap<String, DataInstance>,
    /// Steps in execution order.
    pub steps: Vec<WorkflowStep>,
    /// The requested target instances, keyed by the endpoint name they were
    /// requested under.
    pub targets: BTreeMap<String, DataInstance>,
}

impl WorkflowPlan {
    /// Write this plan as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), PlanError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })?;
        std::fs::write(path, content).map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })
    }

    /// Load a plan previously written by [`Self::save`].
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })?;
        serde_json::from_str(&content).map_err(|e| PlanError::SerializationFailed { reason: e.to_string() })
    }

    /// Look up a step by its 1-based index.
    pub fn step(&self, index: usize) -> Result<&WorkflowStep, PlanError> {
        if index == 0 || index > self.steps.len() {
            return Err(PlanError::StepOutOfRange { index, len: self.steps.len() });
        }
        Ok(&self.steps[index - 1])
    }

    /// Stable key derived from the concatenated given/target/step keys, so
    /// identical inputs always yield the same plan key across re-runs.
    pub fn key(&self) -> String {
        let mut buf = String::new();
        for (name, inst) in &self.given {
            buf.push_str(name);
            buf.push_str(&inst.source.display().to_string());
        }
        for (name, inst) in &self.targets {
            buf.push_str(name);
            buf.push_str(&inst.source.display().to_string());
        }
        for step in &self.steps {
            buf.push_str(&step.transform_key);
        }
        lw_ident::KeyGenerator::from_str(&buf, 12)
    }
}

/// A requested plan target: bind `endpoint` to an instance of `dtype`,
/// resolved against `library`.
pub struct TargetRequest<'a> {
    /// The name this target is addressed by in the resulting plan.
    pub endpoint: String,
    /// The requested type.
    pub dtype: DataType,
    /// The type library `dtype` (and its ancestors) are declared in.
    pub library: &'a DataTypeLibrary,
}

struct TransformMeta {
    source: PathBuf,
    key: String,
    output_types: Vec<String>,
}

/// Resolve `dtype`'s ancestor-inclusive property set by searching `catalogs`
/// for a library that actually declares it. A [`lw_library::TransformInstance`]
/// carries no reference to the [`DataTypeLibrary`] its signature types were
/// declared against, so this falls back to the type's own properties (no
/// ancestor expansion) when no catalog recognizes it by name.
fn resolve_properties(dtype: &DataType, catalogs: &[&DataTypeLibrary]) -> BTreeSet<String> {
    for lib in catalogs {
        if lib.get(&dtype.name).is_ok() {
            return dtype.as_properties(lib);
        }
    }
    dtype.own_properties()
}

/// Build a [`WorkflowPlan`] satisfying every request in `targets`, given the
/// instances already available in `given` and the transforms available in
/// `transform_libraries`.
///
/// Mirrors the construction algorithm: collect given endpoints (later
/// duplicates by name are ignored with a warning), build a synthetic target
/// transform, run the planner, accept the first (cheapest) solution, then
/// walk its dependency plan to mint a named, typed instance per produced
/// endpoint.
pub fn generate(
    given: &[&DataInstanceLibrary],
    transform_libraries: &[&TransformInstanceLibrary],
    targets: &[TargetRequest<'_>],
    seed: Option<u64>,
) -> Result<WorkflowPlan, PlanError> {
    let mut ns = match seed {
        Some(s) => Namespace::seeded(s),
        None => Namespace::new(),
    };

    let mut catalogs: Vec<&DataTypeLibrary> = given.iter().flat_map(|lib| lib.type_libraries.values()).collect();
    catalogs.extend(targets.iter().map(|t| t.library));

    let mut endpoint_names: HashMap<NodeId, String> = HashMap::new();
    let mut endpoint_instances: HashMap<NodeId, DataInstance> = HashMap::new();
    let mut given_out: BTreeMap<String, DataInstance> = BTreeMap::new();
    let mut given_nodes: Vec<NodeId> = Vec::new();

    for lib in given {
        for (name, inst) in &lib.manifest {
            if given_out.contains_key(name) {
                warn!(endpoint = %name, "duplicate given endpoint name, ignoring later occurrence");
                continue;
            }
            let (dtype_lib, dtype) = lib
                .get_type(&inst.dtype_name)
                .map_err(|e| PlanError::UnknownType { name: format!("{}: {e}", inst.dtype_name) })?;
            let props = dtype.as_properties(dtype_lib);
            let node = ns.new_endpoint(props, vec![]);
            endpoint_names.insert(node, name.clone());
            endpoint_instances.insert(node, inst.clone());
            given_out.insert(name.clone(), inst.clone());
            given_nodes.push(node);
        }
    }

    let mut pool: Vec<TransformId> = Vec::new();
    let mut transform_meta: HashMap<TransformId, TransformMeta> = HashMap::new();
    for lib in transform_libraries {
        for (rel_path, inst) in lib.iter() {
            let tr = ns.new_transform();
            for dtype in &inst.input_signature {
                let props = resolve_properties(dtype, &catalogs);
                ns.add_requirement(tr, props, vec![]);
            }
            let mut output_types = Vec::with_capacity(inst.output_signature.len());
            for dtype in &inst.output_signature {
                let props = resolve_properties(dtype, &catalogs);
                ns.add_product(tr, props, vec![]);
                output_types.push(dtype.name.clone());
            }
            let key = lib.key_of(rel_path).unwrap_or("00000").to_string();
            let source = inst.source.clone().unwrap_or_else(|| rel_path.to_path_buf());
            transform_meta.insert(tr, TransformMeta { source, key, output_types });
            pool.push(tr);
        }
    }

    let target_model = ns.new_transform();
    for t in targets {
        let props = resolve_properties(&t.dtype, &catalogs);
        ns.add_requirement(target_model, props, vec![]);
    }

    let solution = {
        let mut planner = Planner::new(&mut ns, DEFAULT_HORIZON);
        let mut results = planner
            .solve(&given_nodes, target_model, &pool)
            .map_err(|e| PlanError::NoSolution { reason: e.to_string() })?;
        results.remove(0)
    };

    let mut steps = Vec::with_capacity(solution.dependency_plan.len());
    for (i, appl) in solution.dependency_plan.iter().enumerate() {
        let meta = transform_meta
            .get(&appl.transform)
            .expect("every application in the dependency plan came from our own transform pool");

        let mut uses = Vec::with_capacity(appl.used.len());
        for (endpoint, _proto) in &appl.used {
            let name = endpoint_names
                .get(endpoint)
                .cloned()
                .ok_or_else(|| PlanError::SerializationFailed { reason: "step input has no recorded name".into() })?;
            let inst = endpoint_instances
                .get(endpoint)
                .cloned()
                .ok_or_else(|| PlanError::SerializationFailed { reason: "step input has no recorded instance".into() })?;
            uses.push((name, inst));
        }

        let mut produces = Vec::with_capacity(appl.produced.len());
        for (j, (endpoint, _proto)) in appl.produced.iter().enumerate() {
            let dtype_name = meta.output_types.get(j).cloned().unwrap_or_default();
            let key = ns.key(*endpoint).to_string();
            let name = format!("{}_{}", meta.key, key);
            let inst = DataInstance {
                source: PathBuf::from(format!("{key}.out")),
                dtype_name,
            };
            endpoint_names.insert(*endpoint, name.clone());
            endpoint_instances.insert(*endpoint, inst.clone());
            produces.push((name, inst));
        }

        steps.push(WorkflowStep {
            index: i + 1,
            transform_source: meta.source.clone(),
            transform_key: meta.key.clone(),
            uses,
            produces,
        });
    }

    let mut target_out = BTreeMap::new();
    for (i, (endpoint, _proto)) in solution.application.used.iter().enumerate() {
        let inst = endpoint_instances
            .get(endpoint)
            .cloned()
            .ok_or_else(|| PlanError::SerializationFailed { reason: "target has no recorded instance".into() })?;
        target_out.insert(targets[i].endpoint.clone(), inst);
    }

    Ok(WorkflowPlan {
        given: given_out,
        steps,
        targets: target_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lw_library::{PropertyValue, TransformRegistry};
    use std::collections::BTreeMap as Map;
    use std::sync::Arc;

    fn dtype(name: &str, prop: &str) -> DataType {
        DataType {
            name: name.into(),
            properties: Map::from([(prop.to_string(), PropertyValue::Single(prop.into()))]),
            ancestors: vec![],
        }
    }

    fn types_lib(types: Vec<DataType>) -> DataTypeLibrary {
        let mut map = Map::new();
        for t in types {
            map.insert(t.name.clone(), t);
        }
        DataTypeLibrary {
            key: "core".into(),
            source: None,
            schema: "1".into(),
            ontology: serde_json::json!({}),
            types: map,
        }
    }

    fn noop(_ctx: &lw_library::ExecutionContext) -> lw_library::ExecutionResult {
        lw_library::ExecutionResult { success: true }
    }

    fn register_assemble(reg: &mut TransformRegistry) {
        reg.register(Arc::new(noop), vec![dtype("reads", "reads")], vec![dtype("assembly", "assembly")]);
    }

    #[test]
    fn generates_a_one_step_plan() {
        let types = types_lib(vec![dtype("reads", "reads"), dtype("assembly", "assembly")]);
        let mut given_lib = DataInstanceLibrary::new(PathBuf::from("/data"), "given", types.clone());
        given_lib.manifest.insert(
            "sample_reads".into(),
            DataInstance { source: PathBuf::from("sample.fastq"), dtype_name: "reads".into() },
        );

        let dir = tempfile::tempdir().unwrap();
        let def_path = dir.path().join("assemble.def");
        std::fs::write(&def_path, b"assemble transform").unwrap();
        let transforms = TransformInstanceLibrary::load(
            vec![(PathBuf::from("assemble.def"), register_assemble, def_path)],
            true,
        );

        let target_lib = types.clone();
        let plan = generate(
            &[&given_lib],
            &[&transforms],
            &[TargetRequest { endpoint: "final_assembly".into(), dtype: dtype("assembly", "assembly"), library: &target_lib }],
            Some(1),
        )
        .unwrap();

        assert_eq!(plan.given.len(), 1);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].uses.len(), 1);
        assert_eq!(plan.steps[0].uses[0].0, "sample_reads");
        assert!(plan.targets.contains_key("final_assembly"));
    }

    #[test]
    fn fails_when_no_transform_produces_the_target() {
        let types = types_lib(vec![dtype("reads", "reads"), dtype("assembly", "assembly")]);
        let given_lib = DataInstanceLibrary::new(PathBuf::from("/data"), "given", types.clone());
        let transforms = TransformInstanceLibrary::load(vec![], true);

        let err = generate(
            &[&given_lib],
            &[&transforms],
            &[TargetRequest { endpoint: "final_assembly".into(), dtype: dtype("assembly", "assembly"), library: &types }],
            Some(2),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::NoSolution { .. }));
    }

    #[test]
    fn duplicate_given_endpoint_name_keeps_first() {
        let types = types_lib(vec![dtype("reads", "reads")]);
        let mut lib_a = DataInstanceLibrary::new(PathBuf::from("/a"), "a", types.clone());
        lib_a.manifest.insert("x".into(), DataInstance { source: "a.fastq".into(), dtype_name: "reads".into() });
        let mut lib_b = DataInstanceLibrary::new(PathBuf::from("/b"), "b", types.clone());
        lib_b.manifest.insert("x".into(), DataInstance { source: "b.fastq".into(), dtype_name: "reads".into() });

        let transforms = TransformInstanceLibrary::load(vec![], true);
        let plan = generate(&[&lib_a, &lib_b], &[&transforms], &[], Some(3)).unwrap();
        assert_eq!(plan.given.get("x").unwrap().source, PathBuf::from("a.fastq"));
    }
}
