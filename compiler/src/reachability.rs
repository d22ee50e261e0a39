// reachability.rs — Transitive reachability over one computation
//
// Answers "can a reach b" over data and ordering edges combined. Built once
// per computation as one bit row per instruction (the set of instructions
// that reach it, itself included), then kept current incrementally:
// `update_through` must be called after every ordering-edge mutation before
// the oracle is queried again. Queries carry a staleness check against the
// module's ordering epoch, fatal in debug builds.
//
// Preconditions: the computation's instruction list is topological over
//                data edges.
// Postconditions: answers reflect every edge present at the last sync.
// Failure modes: stale queries → debug panic (programmer error).
// Side effects: none.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::id::{CompId, InstId};
use crate::ir::Module;

#[derive(Clone, PartialEq, Eq)]
struct BitRow {
    words: Vec<u64>,
}

impl BitRow {
    fn new(bits: usize) -> BitRow {
        BitRow {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    fn set(&mut self, i: usize) {
        self.words[i / 64] |= 1 << (i % 64);
    }

    fn get(&self, i: usize) -> bool {
        self.words[i / 64] & (1 << (i % 64)) != 0
    }

    fn or_assign(&mut self, other: &BitRow) {
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }
}

pub struct ReachabilityOracle {
    comp: CompId,
    order: Vec<InstId>,
    index: HashMap<InstId, usize>,
    rows: Vec<BitRow>,
    synced_epoch: u64,
}

impl ReachabilityOracle {
    /// Build the oracle for one computation. Cost is proportional to graph
    /// size; queries afterwards are constant-time bit tests.
    pub fn build(module: &Module, comp: CompId) -> ReachabilityOracle {
        let order = module.computation(comp).instructions.clone();
        let index: HashMap<InstId, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let n = order.len();
        let mut rows = Vec::with_capacity(n);
        for i in 0..n {
            let mut row = BitRow::new(n);
            row.set(i);
            rows.push(row);
        }
        let mut oracle = ReachabilityOracle {
            comp,
            order,
            index,
            rows,
            synced_epoch: module.ordering_epoch(),
        };
        // Data edges are topological in `order`, ordering edges need not
        // be, so settle with a worklist instead of a single sweep.
        let seed: Vec<InstId> = oracle.order.clone();
        oracle.propagate(module, seed);
        oracle
    }

    /// Whether `to` is reachable from `from` along data and ordering edges.
    /// Reflexive: every instruction reaches itself.
    pub fn is_reachable(&self, module: &Module, from: InstId, to: InstId) -> bool {
        debug_assert_eq!(
            self.synced_epoch,
            module.ordering_epoch(),
            "stale reachability query"
        );
        self.rows[self.index[&to]].get(self.index[&from])
    }

    /// Re-derive reachability after an ordering edge incident to `node`
    /// was added or removed, repropagating to everything downstream. Must
    /// run once per mutation, before any further query.
    pub fn update_through(&mut self, module: &Module, node: InstId) {
        debug_assert!(
            module.ordering_epoch() <= self.synced_epoch + 1,
            "oracle missed an ordering-edge mutation"
        );
        self.propagate(module, vec![node]);
        self.synced_epoch = module.ordering_epoch();
    }

    pub fn computation(&self) -> CompId {
        self.comp
    }

    fn propagate(&mut self, module: &Module, seed: Vec<InstId>) {
        let mut queue: VecDeque<InstId> = VecDeque::new();
        let mut queued: HashSet<InstId> = HashSet::new();
        for id in seed {
            if queued.insert(id) {
                queue.push_back(id);
            }
        }
        while let Some(id) = queue.pop_front() {
            queued.remove(&id);
            let i = self.index[&id];
            let inst = module.inst(id);

            let mut row = BitRow::new(self.order.len());
            row.set(i);
            for &input in inst.operands.iter().chain(&inst.control_predecessors) {
                row.or_assign(&self.rows[self.index[&input]]);
            }

            if row != self.rows[i] {
                self.rows[i] = row;
                for &down in inst.users.iter().chain(&inst.control_successors) {
                    if queued.insert(down) {
                        queue.push_back(down);
                    }
                }
            }
        }
    }
}

// ── Tests ──
