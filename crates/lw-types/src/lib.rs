//! Type algebra: nodes, dependencies, endpoints, and transforms.
//!
//! A [`Namespace`] is an arena that owns every [`Node`] minted during one
//! planner invocation, replacing the reference-graph-of-objects-with-a-
//! process-global-counter approach with simple index-based ownership:
//! every node is a [`NodeId`] into `Namespace`'s backing `Vec`.
//!
//! - A [`Dependency`] is a property-set prototype attached to a
//!   [`Transform`]'s requirements or products.
//! - An [`Endpoint`] is a free-floating, concrete instance of a property
//!   set, carrying a `parent_map` of (ancestor endpoint, dependency
//!   prototype it satisfied) pairs — this is how lineage is tracked as data
//!   flows through a chain of transforms.
//! - `a.is_a(b)` holds when `b`'s properties are a subset of `a`'s: `a` can
//!   stand in anywhere `b` is required.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Index into a [`Namespace`]'s node arena. Stable for the lifetime of the
/// namespace; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Index into a [`Namespace`]'s transform arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransformId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Dependency,
    Endpoint,
}

#[derive(Debug, Clone)]
struct NodeRepr {
    key: String,
    kind: NodeKind,
    properties: BTreeSet<String>,
    /// Ancestor node ids. For a `Dependency` these are the lineage
    /// prototypes passed at construction; for an `Endpoint` these are the
    /// real-ancestor keys of `parent_map` (deduplicated, insertion order).
    parents: Vec<NodeId>,
    /// Endpoint-only: ordered (real ancestor endpoint, prototype dependency
    /// it satisfied) pairs.
    parent_map: Vec<(NodeId, NodeId)>,
    signature: RefCell<Option<String>>,
}

/// An arena owning every node and transform minted while solving one
/// planning problem.
pub struct Namespace {
    nodes: Vec<NodeRepr>,
    transforms: Vec<TransformRepr>,
    key_gen: lw_ident::KeyGenerator,
}

impl Namespace {
    /// Create an empty namespace with a randomly seeded key generator.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            transforms: Vec::new(),
            key_gen: lw_ident::KeyGenerator::new(),
        }
    }

    /// Create an empty namespace with a fixed seed, for reproducible plans.
    pub fn seeded(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            transforms: Vec::new(),
            key_gen: lw_ident::KeyGenerator::seeded(seed),
        }
    }

    fn new_key(&mut self) -> String {
        self.key_gen.generate_uid(4, &HashSet::new())
    }

    /// Mint a new [`Dependency`] node (a property-set prototype attached to
    /// a transform's requirements or products).
    pub fn new_dependency(&mut self, properties: BTreeSet<String>, parents: Vec<NodeId>) -> NodeId {
        let key = self.new_key();
        self.nodes.push(NodeRepr {
            key,
            kind: NodeKind::Dependency,
            properties,
            parents,
            parent_map: Vec::new(),
            signature: RefCell::new(None),
        });
        NodeId((self.nodes.len() - 1) as u32)
    }

    /// Mint a new [`Endpoint`] node (a concrete, free-floating instance of a
    /// property set) with the given lineage `parent_map`.
    pub fn new_endpoint(
        &mut self,
        properties: BTreeSet<String>,
        parent_map: Vec<(NodeId, NodeId)>,
    ) -> NodeId {
        let key = self.new_key();
        let mut parents = Vec::new();
        for (real, _proto) in &parent_map {
            if !parents.contains(real) {
                parents.push(*real);
            }
        }
        self.nodes.push(NodeRepr {
            key,
            kind: NodeKind::Endpoint,
            properties,
            parents,
            parent_map,
            signature: RefCell::new(None),
        });
        NodeId((self.nodes.len() - 1) as u32)
    }

    /// Register a new, empty [`Transform`] and return its id.
    pub fn new_transform(&mut self) -> TransformId {
        let key = self.new_key();
        self.transforms.push(TransformRepr {
            key,
            requires: Vec::new(),
            produces: Vec::new(),
            deletes: HashSet::new(),
            input_group_map: HashMap::new(),
        });
        TransformId((self.transforms.len() - 1) as u32)
    }

    fn node(&self, id: NodeId) -> &NodeRepr {
        &self.nodes[id.0 as usize]
    }

    fn transform(&self, id: TransformId) -> &TransformRepr {
        &self.transforms[id.0 as usize]
    }

    fn transform_mut(&mut self, id: TransformId) -> &mut TransformRepr {
        &mut self.transforms[id.0 as usize]
    }

    /// Stable short identifier for `id`.
    pub fn key(&self, id: NodeId) -> &str {
        &self.node(id).key
    }

    /// Stable short identifier for a transform.
    pub fn transform_key(&self, id: TransformId) -> &str {
        &self.transform(id).key
    }

    /// The property set of `id`.
    pub fn properties(&self, id: NodeId) -> &BTreeSet<String> {
        &self.node(id).properties
    }

    /// The direct ancestor node ids of `id`.
    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).parents
    }

    /// Iterate an endpoint's `(real ancestor, satisfied prototype)` pairs.
    pub fn iter_parent_map(&self, endpoint: NodeId) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.node(endpoint).parent_map.iter().copied()
    }

    /// `a.is_a(b)`: does `a` satisfy everything required of `b`? True iff
    /// `b`'s properties are a subset of `a`'s.
    pub fn is_a(&self, a: NodeId, b: NodeId) -> bool {
        self.node(b).properties.is_subset(&self.node(a).properties)
    }

    /// Structural signature: properties plus the recursively-sorted
    /// signatures of ancestors. Two nodes with equal signatures are
    /// interchangeable for caching/memoization purposes. Memoized per node.
    pub fn signature(&self, id: NodeId) -> String {
        if let Some(cached) = self.node(id).signature.borrow().as_ref() {
            return cached.clone();
        }
        let node = self.node(id);
        let props: Vec<&str> = node.properties.iter().map(String::as_str).collect();
        let props_sig = props.join(",");
        let sig = if node.parents.is_empty() {
            props_sig
        } else {
            let mut parent_sigs: Vec<String> =
                node.parents.iter().map(|&p| self.signature(p)).collect();
            parent_sigs.sort();
            format!("{}:[{}]", props_sig, parent_sigs.join(","))
        };
        *self.node(id).signature.borrow_mut() = Some(sig.clone());
        sig
    }

    /// Append `properties` as a new requirement of `transform`, with
    /// `parents` as its lineage constraints. `parents` must already have
    /// been added as requirements of this same transform (requirements are
    /// added in dependency order).
    pub fn add_requirement(
        &mut self,
        transform: TransformId,
        properties: BTreeSet<String>,
        parents: Vec<NodeId>,
    ) -> NodeId {
        let dep = self.new_dependency(properties, parents.clone());
        let tr = self.transform_mut(transform);
        tr.requires.push(dep);
        let i = tr.requires.len() - 1;
        debug_assert!(
            parents.iter().all(|p| tr.requires.contains(p)),
            "lineage parent was not already added as a requirement"
        );
        tr.input_group_map.entry(i).or_default().extend(parents);
        dep
    }

    /// Append `properties` as a new product of `transform`. Panics if the
    /// product would also match one of the transform's declared deletions.
    pub fn add_product(
        &mut self,
        transform: TransformId,
        properties: BTreeSet<String>,
        parents: Vec<NodeId>,
    ) -> NodeId {
        let dep = self.new_dependency(properties, parents);
        let deletes: Vec<NodeId> = self.transform(transform).deletes.iter().copied().collect();
        for d in deletes {
            assert!(
                !self.is_a(dep, d),
                "transform cannot both produce and delete the same product type"
            );
        }
        self.transform_mut(transform).produces.push(dep);
        dep
    }

    /// All requirement node ids of a transform, in addition order.
    pub fn requires(&self, transform: TransformId) -> &[NodeId] {
        &self.transform(transform).requires
    }

    /// All product node ids of a transform, in addition order.
    pub fn produces(&self, transform: TransformId) -> &[NodeId] {
        &self.transform(transform).produces
    }

    /// Lineage-constraint parents registered for requirement index `i`.
    pub fn requirement_lineage(&self, transform: TransformId, i: usize) -> &[NodeId] {
        self.transform(transform)
            .input_group_map
            .get(&i)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Apply `transform` to a set of `(matched endpoint, satisfied
    /// requirement prototype)` pairs, producing one fresh [`Endpoint`] per
    /// product. Every produced endpoint's `parent_map` is the union of all
    /// inputs' own ancestries plus the inputs themselves (later entries for
    /// the same ancestor key win, mirroring dict-overwrite semantics).
    pub fn apply(&mut self, transform: TransformId, inputs: Vec<(NodeId, NodeId)>) -> Application {
        let mut parent_dict: Vec<(NodeId, NodeId)> = Vec::new();
        let set_parent = |parent_dict: &mut Vec<(NodeId, NodeId)>, k: NodeId, v: NodeId| {
            if let Some(entry) = parent_dict.iter_mut().find(|(pk, _)| *pk == k) {
                entry.1 = v;
            } else {
                parent_dict.push((k, v));
            }
        };
        for &(endpoint, _) in &inputs {
            for (p, pproto) in self.iter_parent_map(endpoint) {
                if !parent_dict.iter().any(|(pk, _)| *pk == p) {
                    set_parent(&mut parent_dict, p, pproto);
                }
            }
        }
        for &(endpoint, proto) in &inputs {
            set_parent(&mut parent_dict, endpoint, proto);
        }

        let products = self.produces(transform).to_vec();
        let mut produced = Vec::with_capacity(products.len());
        for out in products {
            let props = self.properties(out).clone();
            let new_endpoint = self.new_endpoint(props, parent_dict.clone());
            produced.push((new_endpoint, out));
        }

        Application {
            transform,
            used: inputs,
            produced,
        }
    }

    /// All combinations of endpoints from `have` that could satisfy each of
    /// `transform`'s requirements in turn, ignoring lineage (see
    /// [`Self::valid_combinations`] for the lineage-filtered variant).
    /// `constraints` pins a specific endpoint to a specific requirement.
    pub fn possibilities(
        &self,
        transform: TransformId,
        have: &[NodeId],
        constraints: &HashMap<NodeId, NodeId>,
    ) -> Vec<Vec<NodeId>> {
        let requires = self.requires(transform).to_vec();
        let mut matches: Vec<Vec<NodeId>> = Vec::with_capacity(requires.len());
        for req in &requires {
            let m: Vec<NodeId> = if let Some(&pinned) = constraints.get(req) {
                vec![pinned]
            } else {
                have.iter().copied().filter(|&e| self.is_a(e, *req)).collect()
            };
            if m.is_empty() {
                return Vec::new();
            }
            matches.push(m);
        }
        if matches.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut indexes = vec![0usize; matches.len()];
        loop {
            out.push(indexes.iter().enumerate().map(|(i, &j)| matches[i][j]).collect());
            let mut i = 0;
            loop {
                indexes[i] += 1;
                if indexes[i] < matches[i].len() {
                    break;
                }
                indexes[i] = 0;
                i += 1;
                if i >= matches.len() {
                    return out;
                }
            }
        }
    }

    /// Filter `possibilities`-style combinations down to those that respect
    /// each requirement's declared lineage (the `parents` passed to
    /// [`Self::add_requirement`]): an already-chosen endpoint must appear
    /// among the candidate's own ancestors wherever lineage is required.
    pub fn valid_combinations(
        &self,
        transform: TransformId,
        combinations: Vec<Vec<NodeId>>,
    ) -> Vec<Vec<NodeId>> {
        let requires = self.requires(transform).to_vec();
        let mut out = Vec::new();
        'combo: for config in combinations {
            let mut chosen: Vec<NodeId> = Vec::new();
            for (i, &e) in config.iter().enumerate() {
                let parents = self.requirement_lineage(transform, i);
                if !parents.is_empty() {
                    for &prototype in parents {
                        let found = chosen.iter().any(|&p| {
                            self.is_a(p, prototype)
                                && self.iter_parent_map(e).any(|(real, _)| real == p)
                        });
                        if !found {
                            continue 'combo;
                        }
                    }
                }
                chosen.push(e);
            }
            let _ = requires.len();
            out.push(config);
        }
        out
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct TransformRepr {
    key: String,
    requires: Vec<NodeId>,
    produces: Vec<NodeId>,
    deletes: HashSet<NodeId>,
    input_group_map: HashMap<usize, Vec<NodeId>>,
}

/// One application of a transform to a concrete set of inputs, producing a
/// concrete set of output endpoints.
#[derive(Debug, Clone)]
pub struct Application {
    /// The transform that was applied.
    pub transform: TransformId,
    /// `(matched endpoint, satisfied requirement prototype)` pairs, in
    /// requirement order.
    pub used: Vec<(NodeId, NodeId)>,
    /// `(new endpoint, satisfied product prototype)` pairs, in product
    /// order.
    pub produced: Vec<(NodeId, NodeId)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn is_a_is_subset_of_properties() {
        let mut ns = Namespace::seeded(1);
        let general = ns.new_dependency(props(&["file"]), vec![]);
        let specific = ns.new_endpoint(props(&["file", "fasta"]), vec![]);
        assert!(ns.is_a(specific, general));
        assert!(!ns.is_a(general, specific));
    }

    #[test]
    fn signature_groups_sorted_properties_and_parents() {
        let mut ns = Namespace::seeded(2);
        let a = ns.new_dependency(props(&["b", "a"]), vec![]);
        assert_eq!(ns.signature(a), "a,b");

        let parent = ns.new_dependency(props(&["root"]), vec![]);
        let child = ns.new_dependency(props(&["leaf"]), vec![parent]);
        assert_eq!(ns.signature(child), "leaf:[root]");
    }

    #[test]
    fn add_requirement_then_product_builds_transform() {
        let mut ns = Namespace::seeded(3);
        let tr = ns.new_transform();
        let req = ns.add_requirement(tr, props(&["reads"]), vec![]);
        let prod = ns.add_product(tr, props(&["assembly"]), vec![]);
        assert_eq!(ns.requires(tr), &[req]);
        assert_eq!(ns.produces(tr), &[prod]);
    }

    #[test]
    #[should_panic(expected = "cannot both produce and delete")]
    fn add_product_rejects_overlap_with_deletes() {
        let mut ns = Namespace::seeded(4);
        let tr = ns.new_transform();
        let deleted = ns.add_requirement(tr, props(&["scratch"]), vec![]);
        ns.transform_mut(tr).deletes.insert(deleted);
        ns.add_product(tr, props(&["scratch"]), vec![]);
    }

    #[test]
    fn apply_produces_one_endpoint_per_product_with_merged_lineage() {
        let mut ns = Namespace::seeded(5);
        let tr = ns.new_transform();
        let req = ns.add_requirement(tr, props(&["reads"]), vec![]);
        ns.add_product(tr, props(&["assembly"]), vec![]);

        let given = ns.new_endpoint(props(&["reads"]), vec![]);
        let appl = ns.apply(tr, vec![(given, req)]);

        assert_eq!(appl.used, vec![(given, req)]);
        assert_eq!(appl.produced.len(), 1);
        let (produced_ep, _proto) = appl.produced[0];
        let ancestors: Vec<NodeId> = ns.iter_parent_map(produced_ep).map(|(r, _)| r).collect();
        assert_eq!(ancestors, vec![given]);
    }

    #[test]
    fn possibilities_respects_pinned_constraints() {
        let mut ns = Namespace::seeded(6);
        let tr = ns.new_transform();
        let req = ns.add_requirement(tr, props(&["reads"]), vec![]);
        let a = ns.new_endpoint(props(&["reads"]), vec![]);
        let b = ns.new_endpoint(props(&["reads"]), vec![]);
        let have = vec![a, b];

        let mut constraints = HashMap::new();
        constraints.insert(req, b);
        let combos = ns.possibilities(tr, &have, &constraints);
        assert_eq!(combos, vec![vec![b]]);
    }

    #[test]
    fn possibilities_empty_when_no_candidate() {
        let mut ns = Namespace::seeded(7);
        let tr = ns.new_transform();
        ns.add_requirement(tr, props(&["reads"]), vec![]);
        let have: Vec<NodeId> = vec![];
        let combos = ns.possibilities(tr, &have, &HashMap::new());
        assert!(combos.is_empty());
    }
}
