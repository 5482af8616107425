//! Bounded depth-first planner.
//!
//! Finds a chain of [`Transform`](lw_types::Transform) applications that
//! turns a set of `given` endpoints into the requirements of a synthetic
//! `target` transform, respecting per-requirement lineage constraints. This
//! is a generalized dependency resolver: every requirement is solved either
//! directly (an already-`have`n endpoint satisfies it) or by recursively
//! finding a producing transform, memoized per `(have, target, lineage)`
//! signature and capped at a configurable search horizon to guarantee
//! termination on cyclic transform graphs.

#![deny(unsafe_code)]

use lw_error::{ErrorCode, LoomworkError};
use lw_types::{Application, Namespace, NodeId, TransformId};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::trace;

/// Planner-specific failures.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// No chain of transforms satisfies every target requirement from the
    /// given endpoints.
    #[error("no plan satisfies the requested targets")]
    NoSolution,
    /// The search exceeded `horizon` levels of recursion before converging.
    #[error("search exceeded horizon ({horizon}) without converging")]
    DepthExceeded {
        /// The configured horizon that was exceeded.
        horizon: usize,
    },
}

impl From<PlannerError> for LoomworkError {
    fn from(e: PlannerError) -> Self {
        let code = match e {
            PlannerError::NoSolution => ErrorCode::PlannerNoSolution,
            PlannerError::DepthExceeded { .. } => ErrorCode::PlannerDepthExceeded,
        };
        LoomworkError::new(code, e.to_string())
    }
}

/// One step of a solved dependency chain: a producing transform plus the
/// sub-plan needed to satisfy *its* requirements.
#[derive(Debug, Clone)]
pub struct DependencyResult {
    /// Applications needed to produce `endpoint`, in dependency order.
    pub plan: Vec<Application>,
    /// The endpoint that satisfies the requirement being solved.
    pub endpoint: NodeId,
}

/// The result of solving one transform's full requirement set: the
/// top-level application plus every upstream application it depends on,
/// deduplicated by produced signature.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// The application of the target transform itself.
    pub application: Application,
    /// Every upstream application needed to satisfy its inputs, in
    /// dependency order, deduplicated against already-produced signatures.
    pub dependency_plan: Vec<Application>,
}

impl SolveResult {
    /// Number of upstream applications in this solution's dependency chain.
    pub fn len(&self) -> usize {
        self.dependency_plan.len()
    }

    /// True if this solution required no upstream applications at all.
    pub fn is_empty(&self) -> bool {
        self.dependency_plan.is_empty()
    }
}

/// Default search horizon, matching the reference implementation's default.
pub const DEFAULT_HORIZON: usize = 64;

/// Bounded depth-first search over a pool of transforms.
///
/// Holds a mutable borrow of the [`Namespace`] because solving mints fresh
/// endpoint nodes (one per product of every applied transform) as it goes.
pub struct Planner<'a> {
    ns: &'a mut Namespace,
    horizon: usize,
    apply_cache: HashMap<String, Application>,
    transform_cache: HashMap<String, Vec<SolveResult>>,
}

impl<'a> Planner<'a> {
    /// Create a planner bounded to `horizon` levels of recursion.
    pub fn new(ns: &'a mut Namespace, horizon: usize) -> Self {
        Self {
            ns,
            horizon,
            apply_cache: HashMap::new(),
            transform_cache: HashMap::new(),
        }
    }

    /// Solve for `target_transform`'s requirements starting from `given`
    /// endpoints, searching over `pool` for producing transforms. Returns
    /// every discovered solution, cheapest (fewest upstream applications)
    /// first.
    pub fn solve(
        &mut self,
        given: &[NodeId],
        target_transform: TransformId,
        pool: &[TransformId],
    ) -> Result<Vec<SolveResult>, PlannerError> {
        let input_tr = self.ns.new_transform();
        let mut have = HashMap::new();
        for &g in given {
            let props = self.ns.properties(g).clone();
            let proto = self.ns.add_product(input_tr, props, vec![]);
            have.insert(g, proto);
        }

        let results = self.solve_tr(&have, target_transform, &HashMap::new(), &HashSet::new(), 0, pool)?;
        if results.is_empty() {
            return Err(PlannerError::NoSolution);
        }
        Ok(results)
    }

    fn producers_of(&self, target: NodeId, pool: &[TransformId]) -> Vec<TransformId> {
        pool.iter()
            .copied()
            .filter(|&tr| {
                self.ns
                    .produces(tr)
                    .iter()
                    .any(|&p| self.ns.is_a(p, target))
            })
            .collect()
    }

    fn apply_cached(&mut self, transform: TransformId, inputs: Vec<(NodeId, NodeId)>) -> Application {
        let mut sig = self.ns.transform_key(transform).to_string();
        for (e, d) in &inputs {
            sig.push_str(self.ns.key(*e));
            sig.push_str(self.ns.key(*d));
        }
        if let Some(a) = self.apply_cache.get(&sig) {
            return a.clone();
        }
        let appl = self.ns.apply(transform, inputs);
        self.apply_cache.insert(sig, appl.clone());
        appl
    }

    /// Every declared lineage-ancestor of `tproto` must be satisfiable by
    /// some ancestor in `candidate`'s own parent map.
    fn satisfies_lineage(&self, tproto: NodeId, candidate: NodeId) -> bool {
        for &tp_proto in self.ns.parents(tproto) {
            let ok = self
                .ns
                .iter_parent_map(candidate)
                .any(|(p, _)| self.ns.is_a(p, tp_proto));
            if !ok {
                return false;
            }
        }
        true
    }

    fn solve_dep(
        &mut self,
        have: &HashMap<NodeId, NodeId>,
        target: NodeId,
        lineage_requirements: &HashMap<NodeId, NodeId>,
        seen: &HashSet<String>,
        depth: usize,
        pool: &[TransformId],
    ) -> Result<Vec<DependencyResult>, PlannerError> {
        if depth >= self.horizon {
            trace!(depth, "solve_dep: horizon reached");
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for (&e, &eproto) in have.iter() {
            if !self.ns.is_a(e, target) {
                continue;
            }
            let mut acceptable = true;
            for (&rproto, &r) in lineage_requirements.iter() {
                if e == r {
                    continue;
                }
                if self.ns.is_a(eproto, rproto) {
                    acceptable = false;
                    break;
                }
                for (p, pproto) in self.ns.iter_parent_map(e) {
                    if self.ns.is_a(rproto, pproto) && p != r {
                        acceptable = false;
                        break;
                    }
                }
                if !acceptable {
                    break;
                }
            }
            if acceptable {
                candidates.push(DependencyResult {
                    plan: Vec::new(),
                    endpoint: e,
                });
            }
        }

        for tr in self.producers_of(target, pool) {
            let results = self.solve_tr(have, tr, lineage_requirements, seen, depth, pool)?;
            for res in results {
                let produced_match = res
                    .application
                    .produced
                    .iter()
                    .find(|(e, _)| self.ns.is_a(*e, target))
                    .map(|(e, _)| *e);
                if let Some(ep) = produced_match
                    && self.satisfies_lineage(target, ep)
                {
                    let mut plan = res.dependency_plan.clone();
                    plan.push(res.application.clone());
                    candidates.push(DependencyResult { plan, endpoint: ep });
                }
            }
        }

        Ok(candidates)
    }

    fn solve_tr(
        &mut self,
        have: &HashMap<NodeId, NodeId>,
        target: TransformId,
        lineage_requirements: &HashMap<NodeId, NodeId>,
        seen: &HashSet<String>,
        depth: usize,
        pool: &[TransformId],
    ) -> Result<Vec<SolveResult>, PlannerError> {
        let mut have_keys: Vec<&str> = have.keys().map(|k| self.ns.key(*k)).collect();
        have_keys.sort_unstable();
        let mut sig = have_keys.concat();
        sig.push(':');
        sig.push_str(self.ns.transform_key(target));
        sig.push(':');
        let mut lineage_keys: Vec<&str> = lineage_requirements
            .values()
            .map(|v| self.ns.key(*v))
            .collect();
        lineage_keys.sort_unstable();
        sig.push_str(&lineage_keys.concat());

        if let Some(cached) = self.transform_cache.get(&sig) {
            trace!(%sig, "solve_tr: cache hit");
            return Ok(cached.clone());
        }
        if seen.contains(&sig) {
            trace!(%sig, "solve_tr: loop detected");
            return Ok(Vec::new());
        }

        let requires = self.ns.requires(target).to_vec();
        let mut seen_next = seen.clone();
        seen_next.insert(sig.clone());

        let mut plans: Vec<Vec<DependencyResult>> = Vec::with_capacity(requires.len());
        for &req in &requires {
            let mut req_p = HashMap::new();
            for (&proto, &e) in lineage_requirements.iter() {
                if self.ns.is_a(req, proto) {
                    continue;
                }
                req_p.insert(proto, e);
            }
            let results = self.solve_dep(have, req, &req_p, &seen_next, depth + 1, pool)?;
            if results.is_empty() {
                return Ok(Vec::new());
            }
            plans.push(results);
        }

        let valid_input_sets = self.gather_valid_inputs(&requires, &plans);

        let mut solutions = Vec::new();
        for inputs in valid_input_sets {
            let apply_inputs: Vec<(NodeId, NodeId)> = requires
                .iter()
                .zip(inputs.iter())
                .map(|(&req, res)| (res.endpoint, req))
                .collect();
            let appl = self.apply_cached(target, apply_inputs);

            let mut produced_sigs: HashSet<String> = appl
                .produced
                .iter()
                .map(|(e, _)| self.ns.signature(*e))
                .collect();
            let mut consolidated: Vec<Application> = Vec::new();
            for res in &inputs {
                for sub_appl in &res.plan {
                    if sub_appl
                        .produced
                        .iter()
                        .all(|(e, _)| produced_sigs.contains(&self.ns.signature(*e)))
                    {
                        continue;
                    }
                    consolidated.push(sub_appl.clone());
                    for (e, _) in &sub_appl.produced {
                        produced_sigs.insert(self.ns.signature(*e));
                    }
                }
            }
            solutions.push(SolveResult {
                application: appl,
                dependency_plan: consolidated,
            });
        }
        solutions.sort_by_key(SolveResult::len);
        self.transform_cache.insert(sig, solutions.clone());
        Ok(solutions)
    }

    /// Requirement-by-requirement combinations need at least one candidate
    /// per requirement; a transform with no requirements is trivially
    /// satisfied by the empty combination.
    fn gather_valid_inputs(
        &self,
        requires: &[NodeId],
        plans: &[Vec<DependencyResult>],
    ) -> Vec<Vec<DependencyResult>> {
        if requires.is_empty() {
            return vec![Vec::new()];
        }
        let mut valids = Vec::new();
        self.gather_rec(
            requires,
            plans,
            0,
            HashMap::new(),
            HashSet::new(),
            Vec::new(),
            &mut valids,
        );
        valids
    }

    #[allow(clippy::too_many_arguments)]
    fn gather_rec(
        &self,
        requires: &[NodeId],
        plans: &[Vec<DependencyResult>],
        req_i: usize,
        deps: HashMap<NodeId, NodeId>,
        used: HashSet<NodeId>,
        inputs: Vec<DependencyResult>,
        valids: &mut Vec<Vec<DependencyResult>>,
    ) {
        let req = requires[req_i];
        for res in &plans[req_i] {
            if used.contains(&res.endpoint) {
                continue;
            }
            if !self.satisfies_lineage(req, res.endpoint) {
                continue;
            }

            let mut ok = true;
            for &rproto in self.ns.parents(req) {
                if let Some(&r) = deps.get(&rproto) {
                    let mut res_parents: Vec<(NodeId, NodeId)> =
                        self.ns.iter_parent_map(res.endpoint).collect();
                    res_parents.reverse();
                    for (p, _pproto) in res_parents {
                        if !self.ns.is_a(p, rproto) {
                            continue;
                        }
                        if p != r {
                            ok = false;
                        }
                        break;
                    }
                    if !ok {
                        break;
                    }
                }
            }
            if !ok {
                continue;
            }

            let mut next_deps = deps.clone();
            next_deps.insert(req, res.endpoint);
            let mut next_used = used.clone();
            next_used.insert(res.endpoint);
            let mut next_inputs = inputs.clone();
            next_inputs.push(res.clone());

            if req_i + 1 >= requires.len() {
                valids.push(next_inputs);
            } else {
                self.gather_rec(
                    requires,
                    plans,
                    req_i + 1,
                    next_deps,
                    next_used,
                    next_inputs,
                    valids,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn props(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn direct_match_needs_no_transforms() {
        let mut ns = Namespace::seeded(10);
        let given = ns.new_endpoint(props(&["reads"]), vec![]);

        let target_tr = ns.new_transform();
        ns.add_requirement(target_tr, props(&["reads"]), vec![]);

        let mut planner = Planner::new(&mut ns, DEFAULT_HORIZON);
        let results = planner.solve(&[given], target_tr, &[]).unwrap();
        assert!(!results.is_empty());
        assert!(results[0].dependency_plan.is_empty());
    }

    #[test]
    fn one_hop_chain_is_found() {
        let mut ns = Namespace::seeded(11);
        let assemble = ns.new_transform();
        let reads_req = ns.add_requirement(assemble, props(&["reads"]), vec![]);
        ns.add_product(assemble, props(&["assembly"]), vec![]);
        let _ = reads_req;

        let given = ns.new_endpoint(props(&["reads"]), vec![]);

        let target_tr = ns.new_transform();
        ns.add_requirement(target_tr, props(&["assembly"]), vec![]);

        let mut planner = Planner::new(&mut ns, DEFAULT_HORIZON);
        let results = planner.solve(&[given], target_tr, &[assemble]).unwrap();
        assert_eq!(results[0].dependency_plan.len(), 1);
    }

    #[test]
    fn no_solution_when_nothing_produces_target() {
        let mut ns = Namespace::seeded(12);
        let given = ns.new_endpoint(props(&["reads"]), vec![]);
        let target_tr = ns.new_transform();
        ns.add_requirement(target_tr, props(&["assembly"]), vec![]);

        let mut planner = Planner::new(&mut ns, DEFAULT_HORIZON);
        let err = planner.solve(&[given], target_tr, &[]).unwrap_err();
        assert!(matches!(err, PlannerError::NoSolution));
    }

    #[test]
    fn cyclic_transform_pool_terminates_via_loop_detection() {
        let mut ns = Namespace::seeded(13);
        // A transform that both requires and produces the same type can
        // never bottom out in an existing `have`; the search must still
        // terminate (via loop detection / horizon) rather than looping.
        let cyclic = ns.new_transform();
        ns.add_requirement(cyclic, props(&["assembly"]), vec![]);
        ns.add_product(cyclic, props(&["assembly"]), vec![]);

        let target_tr = ns.new_transform();
        ns.add_requirement(target_tr, props(&["assembly"]), vec![]);

        let mut planner = Planner::new(&mut ns, 8);
        let result = planner.solve(&[], target_tr, &[cyclic]);
        assert!(result.is_err());
    }

    #[test]
    fn multi_requirement_transform_gathers_distinct_inputs() {
        let mut ns = Namespace::seeded(14);
        let merge = ns.new_transform();
        ns.add_requirement(merge, props(&["left"]), vec![]);
        ns.add_requirement(merge, props(&["right"]), vec![]);
        ns.add_product(merge, props(&["merged"]), vec![]);

        let left = ns.new_endpoint(props(&["left"]), vec![]);
        let right = ns.new_endpoint(props(&["right"]), vec![]);

        let target_tr = ns.new_transform();
        ns.add_requirement(target_tr, props(&["merged"]), vec![]);

        let mut planner = Planner::new(&mut ns, DEFAULT_HORIZON);
        let results = planner.solve(&[left, right], target_tr, &[merge]).unwrap();
        assert_eq!(results[0].dependency_plan.len(), 1);
        let merge_appl = &results[0].dependency_plan[0];
        assert_eq!(merge_appl.used.len(), 2);
    }
}
