// forward_allocation.rs — Forward allocation: pick, for each undecided input
// tensor, the downstream consumer whose layout requirement should drive the
// allocation, and pin the choice with ordering edges.
//
// Preconditions:
//   - The module is acyclic, counting both data and ordering edges.
// Postconditions:
//   - Every committed decision is recorded in `Annotations` together with the
//     ordering edges that enforce it; every failed attempt leaves the module
//     and the reachability oracle exactly as they were.
// Failure modes:
//   - None surfaced to the caller. Structurally unsuitable candidates are
//     skipped and conflicting commits are rolled back; the return value only
//     reports whether any decision landed.

use std::collections::HashSet;

use crate::alloc::{layouts_along_paths, Annotations, TensorTarget};
use crate::classify;
use crate::deferred::{find_deferred_origins, DeferredPath};
use crate::graph_view::{IncludeStart, InstGraph};
use crate::id::{CompId, InstId};
use crate::ir::{Module, OpKind};
use crate::reachability::ReachabilityOracle;

// ── Ordering transactions ────────────────────────────────────────────────────

/// Speculative ordering-edge insertion with an undo log.
///
/// Every edge added through the transaction refreshes the oracle at its
/// downstream endpoint immediately, so reachability queries stay valid while
/// the transaction is open. `rollback` removes the added edges in reverse
/// order, restoring module and oracle to their pre-transaction state.
pub struct OrderingTransaction<'a> {
    module: &'a mut Module,
    oracle: &'a mut ReachabilityOracle,
    undo: Vec<(InstId, InstId)>,
}

impl<'a> OrderingTransaction<'a> {
    pub fn begin(module: &'a mut Module, oracle: &'a mut ReachabilityOracle) -> Self {
        OrderingTransaction {
            module,
            oracle,
            undo: Vec::new(),
        }
    }

    /// Add `before → after` and refresh the oracle at `after`.
    pub fn add_ordering_edge(&mut self, before: InstId, after: InstId) {
        self.module.add_control_dependency(before, after);
        self.oracle.update_through(self.module, after);
        self.undo.push((before, after));
    }

    /// Is `to` reachable from `from`, counting edges added so far?
    pub fn is_reachable(&self, from: InstId, to: InstId) -> bool {
        self.oracle.is_reachable(self.module, from, to)
    }

    /// Keep every edge added so far.
    pub fn commit(self) {}

    /// Remove the added edges in reverse order.
    pub fn rollback(mut self) {
        while let Some((before, after)) = self.undo.pop() {
            self.module.remove_control_dependency(before, after);
            self.oracle.update_through(self.module, after);
        }
    }
}

// ── Path validation ──────────────────────────────────────────────────────────

/// Interior nodes of `path`, excluding its two endpoints.
fn interior(path: &[InstId]) -> Vec<InstId> {
    if path.len() <= 2 {
        Vec::new()
    } else {
        path[1..path.len() - 1].to_vec()
    }
}

fn type_transparent(module: &Module, id: InstId) -> bool {
    let inst = module.inst(id);
    if classify::is_elementwise(inst) {
        matches!(inst.op, OpKind::Convert) || classify::types_preserved(module, inst)
    } else if classify::is_shape_passthrough(inst) {
        classify::types_preserved(module, inst)
    } else {
        false
    }
}

/// A backward (source to target) path is traversable when every interior
/// node forwards the tensor without changing its element type: elementwise
/// ops on matching types, conversions, and shape pass-throughs.
fn prefix_path_ok(module: &Module, interior: &[InstId]) -> bool {
    interior.iter().all(|&id| type_transparent(module, id))
}

/// A forward (producer to target) path additionally admits one index select,
/// but only as the last interior node; its index names the element of the
/// producer's output that carries the layout. Returns that index, or 0 when
/// the path has no select. `None` means the path is not traversable.
fn suffix_path_ok(module: &Module, interior: &[InstId]) -> Option<usize> {
    let mut layout_output_index = 0;
    for (pos, &id) in interior.iter().enumerate() {
        if let Some(index) = module.inst(id).select_index() {
            if pos + 1 != interior.len() {
                return None;
            }
            layout_output_index = index;
        } else if !type_transparent(module, id) {
            return None;
        }
    }
    Some(layout_output_index)
}

// ── Candidate selection ──────────────────────────────────────────────────────

fn exactly_one<T>(mut items: impl Iterator<Item = T>) -> Option<T> {
    let first = items.next()?;
    if items.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Filter a source's consumer cone down to admissible targets, drop every
/// candidate some other candidate can already reach, and order the survivors
/// by priority: bias adds first, then normalizations, then the rest, keeping
/// encounter order within each group. `None` when nothing survives.
fn find_all_targets(
    module: &Module,
    oracle: &ReachabilityOracle,
    consumers: &[InstId],
    admissible: impl Fn(InstId) -> bool,
) -> Option<Vec<InstId>> {
    let admitted: Vec<InstId> = consumers.iter().copied().filter(|&id| admissible(id)).collect();
    let independent: Vec<InstId> = admitted
        .iter()
        .copied()
        .filter(|&t| admitted.iter().all(|&o| o == t || !oracle.is_reachable(module, o, t)))
        .collect();
    if independent.is_empty() {
        return None;
    }

    let is_bias = |id: InstId| classify::is_bias_add(module.inst(id));
    let is_norm = |id: InstId| classify::is_normalization(module.inst(id));
    let mut ordered: Vec<InstId> = independent.iter().copied().filter(|&id| is_bias(id)).collect();
    ordered.extend(independent.iter().copied().filter(|&id| !is_bias(id) && is_norm(id)));
    ordered.extend(
        independent
            .iter()
            .copied()
            .filter(|&id| !is_bias(id) && !is_norm(id)),
    );
    Some(ordered)
}

// ── The pass ─────────────────────────────────────────────────────────────────

/// One undecided source together with its downstream cone.
struct SourceWork {
    source: InstId,
    deferred: DeferredPath,
    consumers: Vec<InstId>,
    members: HashSet<InstId>,
}

struct Pass<'a> {
    annotations: &'a mut Annotations,
    /// Nodes currently known to dictate a layout. Seeded from prior runs,
    /// grows with every commit.
    layout_bearing: HashSet<InstId>,
    progress: bool,
}

impl<'a> Pass<'a> {
    /// Mode A: the target combines the source tensor with a tensor whose
    /// layout some upstream producer dictates, so allocating the source with
    /// the producer's layout avoids a rearrangement at the target.
    fn run_layout_sensitive(&mut self, module: &mut Module, comp: CompId) {
        let origins = find_deferred_origins(module, comp);
        let root = module.computation(comp).root;
        let g = InstGraph::operand_graph(module, root);
        let mut oracle = ReachabilityOracle::build(module, comp);

        let producers = g.vertices_matching(|id| self.layout_bearing.contains(&id));
        if producers.is_empty() {
            return;
        }
        // Everything a producer feeds, up to but not across the next
        // layout-bearing node. Transposed, this answers "which producers does
        // this node depend on for its layout".
        let downstream = InstGraph::from_closures(&producers, |p| {
            g.consumers_of(
                module,
                p,
                |n| !self.layout_bearing.contains(&n),
                IncludeStart::No,
            )
        });
        let alloc_deps = downstream.transpose();

        let works: Vec<SourceWork> = g
            .vertices_matching(|id| {
                origins.contains_key(&id) && !self.annotations.tensor_targets.contains_key(&(id, 0))
            })
            .into_iter()
            .filter_map(|source| {
                let deferred = origins.get(&source)?.clone();
                let consumers = g.consumers_of(
                    module,
                    source,
                    |n| {
                        !self.layout_bearing.contains(&n)
                            && alloc_deps.successors(n).is_empty()
                    },
                    IncludeStart::Yes,
                );
                let members = consumers.iter().copied().collect();
                Some(SourceWork {
                    source,
                    deferred,
                    consumers,
                    members,
                })
            })
            .collect();

        for work in &works {
            let candidates = find_all_targets(module, &oracle, &work.consumers, |id| {
                !alloc_deps.successors(id).is_empty()
                    && classify::is_elementwise_binary(module.inst(id))
            });
            let Some(candidates) = candidates else {
                continue;
            };
            for &target in &candidates {
                // The layout producer is the single dependency of the target
                // that does not itself wait on someone else's layout.
                let producer = exactly_one(
                    alloc_deps
                        .successors(target)
                        .iter()
                        .copied()
                        .filter(|&p| alloc_deps.successors(p).is_empty()),
                );
                let Some(producer) = producer else {
                    continue;
                };
                let Some(prefix) = g.shortest_path(work.source, target) else {
                    continue;
                };
                let Some(suffix) = g.shortest_path(producer, target) else {
                    continue;
                };
                if prefix.len() < 2 {
                    continue;
                }
                let entry = prefix[prefix.len() - 2];
                let Some(operand_index) = module.inst(target).operand_index(entry) else {
                    continue;
                };
                // Some fused binaries take extra scalar operands; only the
                // two combined positions are eligible.
                if operand_index >= 2 {
                    continue;
                }
                let backward = interior(&prefix);
                let forward = interior(&suffix);
                if !prefix_path_ok(module, &backward) {
                    continue;
                }
                let Some(layout_output_index) = suffix_path_ok(module, &forward) else {
                    continue;
                };
                // A producer inside the source's own cone would wait on the
                // source, never the other way around.
                if work.members.contains(&producer) {
                    continue;
                }
                let record = TensorTarget {
                    target,
                    operand_index,
                    layout_producer: producer,
                    layout_output_index,
                    forward_path: forward,
                    backward_path: backward,
                    deferred_path: work.deferred.clone(),
                };
                if self.commit(module, &mut oracle, comp, work.source, record, &candidates) {
                    self.progress = true;
                    break;
                }
            }
        }
    }

    /// Mode B: the target declares, per operand, which other operand's layout
    /// the allocation should follow. No structural path to the producer is
    /// required, only a traversable path from the source.
    fn run_layout_dependent(&mut self, module: &mut Module, comp: CompId) {
        let origins = find_deferred_origins(module, comp);
        let root = module.computation(comp).root;
        let g = InstGraph::operand_graph(module, root);
        let mut oracle = ReachabilityOracle::build(module, comp);

        let works: Vec<(InstId, DeferredPath, Vec<InstId>)> = g
            .vertices_matching(|id| {
                origins.contains_key(&id) && !self.annotations.tensor_targets.contains_key(&(id, 0))
            })
            .into_iter()
            .filter_map(|source| {
                let deferred = origins.get(&source)?.clone();
                let consumers = g.consumers_of(module, source, |_| true, IncludeStart::Yes);
                Some((source, deferred, consumers))
            })
            .collect();

        for (source, deferred, consumers) in &works {
            let candidates = find_all_targets(module, &oracle, consumers, |id| {
                classify::declares_layout_dependencies(module.inst(id))
            });
            let Some(candidates) = candidates else {
                continue;
            };
            for &target in &candidates {
                let Some(prefix) = g.shortest_path(*source, target) else {
                    continue;
                };
                if prefix.len() < 2 {
                    continue;
                }
                let entry = prefix[prefix.len() - 2];
                let inst = module.inst(target);
                let Some(operand_index) = inst.operand_index(entry) else {
                    continue;
                };
                let pair = inst
                    .layout_dependencies()
                    .iter()
                    .find(|&&(op, _)| op == operand_index);
                let Some(&(_, layout_operand)) = pair else {
                    continue;
                };
                let Some(&producer) = inst.operands.get(layout_operand) else {
                    continue;
                };
                let backward = interior(&prefix);
                if !prefix_path_ok(module, &backward) {
                    continue;
                }
                let record = TensorTarget {
                    target,
                    operand_index,
                    layout_producer: producer,
                    layout_output_index: 0,
                    forward_path: Vec::new(),
                    backward_path: backward,
                    deferred_path: deferred.clone(),
                };
                if self.commit(module, &mut oracle, comp, *source, record, &candidates) {
                    self.progress = true;
                    break;
                }
            }
        }
    }

    /// Transactionally pin `record` for `source`. The producer is ordered
    /// before the source; the chosen target is ordered before every sibling
    /// candidate so that no sibling constrains the allocation first. Any
    /// conflict rolls the module back and reports failure.
    fn commit(
        &mut self,
        module: &mut Module,
        oracle: &mut ReachabilityOracle,
        comp: CompId,
        source: InstId,
        record: TensorTarget,
        siblings: &[InstId],
    ) -> bool {
        // The producer must be orderable before the source.
        if oracle.is_reachable(module, source, record.layout_producer) {
            return false;
        }
        let mut txn = OrderingTransaction::begin(module, oracle);
        txn.add_ordering_edge(record.layout_producer, source);
        for &other in siblings {
            if other == record.target {
                continue;
            }
            if txn.is_reachable(record.target, other) {
                continue;
            }
            if txn.is_reachable(other, record.target) {
                txn.rollback();
                return false;
            }
            txn.add_ordering_edge(record.target, other);
        }
        txn.commit();

        let key = (source, 0);
        for (inst, index) in layouts_along_paths(module, source, &record) {
            self.annotations.tensors_with_layout.insert((inst, index));
            if !module.inst(inst).shape.is_tuple() {
                self.layout_bearing.insert(inst);
            }
        }
        self.layout_bearing.insert(record.target);
        if let Some(step) = record.deferred_path.last() {
            self.annotations
                .deferred_allocations
                .insert((comp, step.container, step.flat_index), key);
        }
        debug_assert!(
            !self.annotations.tensor_targets.contains_key(&key),
            "allocation key decided twice"
        );
        self.annotations.tensor_targets.insert(key, record);
        true
    }
}

/// Run the pass once over every non-fusion computation: first the layout
/// sensitive mode, then the layout dependent mode. Returns true when at least
/// one new decision was committed. Callers wanting a fixpoint invoke this
/// repeatedly until it reports no progress.
pub fn forward_allocate(module: &mut Module, annotations: &mut Annotations) -> bool {
    let mut layout_bearing: HashSet<InstId> = HashSet::new();
    for &(inst, _) in &annotations.tensors_with_layout {
        if !module.inst(inst).shape.is_tuple() {
            layout_bearing.insert(inst);
        }
    }
    for record in annotations.tensor_targets.values() {
        layout_bearing.insert(record.target);
    }

    let comps: Vec<CompId> = module
        .computations
        .iter()
        .filter(|c| !c.is_fusion)
        .map(|c| c.id)
        .collect();

    let mut pass = Pass {
        annotations,
        layout_bearing,
        progress: false,
    };
    for comp in comps {
        pass.run_layout_sensitive(module, comp);
        pass.run_layout_dependent(module, comp);
    }
    pass.progress
}
