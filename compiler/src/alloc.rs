// alloc.rs — Allocation targets and the annotation tables shared across pass runs.
//
// Postconditions:
//   - `Annotations` owns every decision the forward-allocation pass makes;
//     nothing else mutates its tables.
//   - Keys in `tensor_targets` are unique per (instruction, flat index) and
//     are never overwritten by later runs.

use std::collections::{HashMap, HashSet};

use crate::classify;
use crate::deferred::DeferredPath;
use crate::id::{CompId, InstId};
use crate::ir::Module;

/// Key of an allocation decision: the source instruction together with the
/// flat index of the decided tensor within its output (0 for non-tuples).
pub type SourceKey = (InstId, u64);

// ── Tensor targets ──────────────────────────────────────────────────────────

/// A committed allocation decision: allocate `source`'s tensor with the
/// layout that `target` requires on `operand_index`, taking the concrete
/// layout from `layout_producer`'s output `layout_output_index`.
#[derive(Debug, Clone)]
pub struct TensorTarget {
    pub target: InstId,
    /// Operand position of `target` through which the source arrives.
    pub operand_index: usize,
    pub layout_producer: InstId,
    /// Element of the producer's output that carries the layout.
    pub layout_output_index: usize,
    /// Interior nodes of the producer-to-target path.
    pub forward_path: Vec<InstId>,
    /// Interior nodes of the source-to-target path.
    pub backward_path: Vec<InstId>,
    /// Tuple containers the source was unwrapped out of, innermost first.
    pub deferred_path: DeferredPath,
}

// ── Annotations ─────────────────────────────────────────────────────────────

/// Pass outputs, accumulated across invocations on the same module.
#[derive(Debug, Default)]
pub struct Annotations {
    /// The allocation map: one decision per source tensor.
    pub tensor_targets: HashMap<SourceKey, TensorTarget>,
    /// Tensors known to have a layout dictated for them, either seeded from
    /// fixed-layout ops or pinned by a committed decision.
    pub tensors_with_layout: HashSet<(InstId, u64)>,
    /// Deferred allocations: (computation, outermost container, flat index
    /// within it) mapped to the allocation key that will materialize it.
    pub deferred_allocations: HashMap<(CompId, InstId, u64), SourceKey>,
}

impl Annotations {
    pub fn new() -> Self {
        Annotations::default()
    }

    pub fn decision(&self, key: SourceKey) -> Option<&TensorTarget> {
        self.tensor_targets.get(&key)
    }
}

/// Every (instruction, flat index) pair whose layout is pinned once `record`
/// is committed for `source`: the source, the interiors of both paths and the
/// target. Index selects on the forward path report the element they extract;
/// all other nodes report index 0.
pub fn layouts_along_paths(
    module: &Module,
    source: InstId,
    record: &TensorTarget,
) -> Vec<(InstId, u64)> {
    let mut pairs = vec![(source, 0)];
    for &inst in &record.backward_path {
        pairs.push((inst, 0));
    }
    for &inst in &record.forward_path {
        let index = module.inst(inst).select_index().unwrap_or(0);
        pairs.push((inst, index as u64));
    }
    pairs.push((record.target, 0));
    pairs
}

/// Seed the layout table with the outputs of ops whose layout is fixed by
/// their own allocation rules rather than negotiated by this pass.
pub fn seed_fixed_layouts(module: &Module, annotations: &mut Annotations) {
    for comp in &module.computations {
        for &id in &comp.instructions {
            let inst = module.inst(id);
            if classify::fixes_layout(inst) && !inst.shape.is_tuple() {
                annotations.tensors_with_layout.insert((id, 0));
            }
        }
    }
}
