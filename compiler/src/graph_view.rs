// graph_view.rs — Induced subgraph view over a computation
//
// A read-only view of the instruction graph induced from a root by an edge
// function (operands by default). The view snapshots adjacency at
// construction time; ordering-edge mutations made afterwards do not affect
// it. All traversal orders are deterministic: vertices appear in discovery
// order and edges in the order the edge function returned them, so analyses
// built on the view never depend on hash iteration.
//
// Preconditions: edge functions return only instructions of the same
//                computation.
// Postconditions: `order` holds every vertex exactly once.
// Failure modes: none.
// Side effects: none.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::id::InstId;
use crate::ir::Module;

/// Whether `consumers_of` includes the start node in its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeStart {
    Yes,
    No,
}

pub struct InstGraph {
    order: Vec<InstId>,
    members: HashSet<InstId>,
    succ: HashMap<InstId, Vec<InstId>>,
    pred: HashMap<InstId, Vec<InstId>>,
}

impl InstGraph {
    /// Induce the subgraph reachable from `root` by repeatedly applying
    /// `edges`. Discovery is breadth-first; `edges` is applied once per
    /// discovered vertex.
    pub fn from_root(
        module: &Module,
        root: InstId,
        mut edges: impl FnMut(&Module, InstId) -> Vec<InstId>,
    ) -> InstGraph {
        let mut g = InstGraph::empty();
        let mut queue = VecDeque::new();
        g.insert_vertex(root);
        queue.push_back(root);
        while let Some(n) = queue.pop_front() {
            let targets = edges(module, n);
            for &t in &targets {
                if g.insert_vertex(t) {
                    queue.push_back(t);
                }
                g.pred.entry(t).or_default().push(n);
            }
            g.succ.insert(n, targets);
        }
        g
    }

    /// The operand-edge view: the live slice of a computation upstream of
    /// `root`, with edges pointing from each instruction to its operands.
    pub fn operand_graph(module: &Module, root: InstId) -> InstGraph {
        InstGraph::from_root(module, root, |m, id| m.inst(id).operands.clone())
    }

    /// Build a multi-root map graph: each root's edge set is its full
    /// closure, computed by the caller. Closure members are vertices but
    /// are not expanded further.
    pub fn from_closures(
        roots: &[InstId],
        mut closure: impl FnMut(InstId) -> Vec<InstId>,
    ) -> InstGraph {
        let mut g = InstGraph::empty();
        for &root in roots {
            g.insert_vertex(root);
        }
        for &root in roots {
            let targets = closure(root);
            for &t in &targets {
                g.insert_vertex(t);
                g.pred.entry(t).or_default().push(root);
            }
            g.succ.insert(root, targets);
        }
        g
    }

    fn empty() -> InstGraph {
        InstGraph {
            order: Vec::new(),
            members: HashSet::new(),
            succ: HashMap::new(),
            pred: HashMap::new(),
        }
    }

    fn insert_vertex(&mut self, id: InstId) -> bool {
        if self.members.insert(id) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: InstId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Out-edges of `id`, in edge-function order. Empty for vertices the
    /// edge function was never applied to.
    pub fn successors(&self, id: InstId) -> &[InstId] {
        self.succ.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Vertices satisfying `pred`, in discovery order.
    pub fn vertices_matching(&self, pred: impl Fn(InstId) -> bool) -> Vec<InstId> {
        self.order.iter().copied().filter(|&id| pred(id)).collect()
    }

    /// All nodes downstream of `start` along user edges, restricted to this
    /// view. Descent stops at nodes failing `continue_pred`, but such
    /// boundary nodes are still part of the result; `start` itself is
    /// descended from unconditionally and reported according to `include`.
    pub fn consumers_of(
        &self,
        module: &Module,
        start: InstId,
        mut continue_pred: impl FnMut(InstId) -> bool,
        include: IncludeStart,
    ) -> Vec<InstId> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(start);
        if include == IncludeStart::Yes {
            result.push(start);
        }
        let mut queue = VecDeque::new();
        queue.push_back(start);
        while let Some(n) = queue.pop_front() {
            if n != start && !continue_pred(n) {
                continue;
            }
            for &user in &module.inst(n).users {
                if !self.members.contains(&user) {
                    continue;
                }
                if visited.insert(user) {
                    result.push(user);
                    queue.push_back(user);
                }
            }
        }
        result
    }

    /// Shortest node sequence from `a` to `b` inclusive, following this
    /// view's edges against their direction (so on an operand graph the
    /// path runs dataflow-forward, from the upstream node to the
    /// downstream one). BFS; ties resolved by edge-list position. `None`
    /// if `b` does not depend on `a`.
    pub fn shortest_path(&self, a: InstId, b: InstId) -> Option<Vec<InstId>> {
        if !self.members.contains(&a) || !self.members.contains(&b) {
            return None;
        }
        if a == b {
            return Some(vec![a]);
        }
        // Walk from b toward a along out-edges; the parent chain then reads
        // out in a→b order directly.
        let mut parent: HashMap<InstId, InstId> = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(b);
        while let Some(n) = queue.pop_front() {
            for &t in self.successors(n) {
                if t == b || parent.contains_key(&t) {
                    continue;
                }
                parent.insert(t, n);
                if t == a {
                    let mut path = vec![a];
                    let mut cur = a;
                    while cur != b {
                        cur = parent[&cur];
                        path.push(cur);
                    }
                    return Some(path);
                }
                queue.push_back(t);
            }
        }
        None
    }

    /// Same vertex set, every edge reversed.
    pub fn transpose(&self) -> InstGraph {
        let mut succ: HashMap<InstId, Vec<InstId>> = HashMap::new();
        let mut pred: HashMap<InstId, Vec<InstId>> = HashMap::new();
        for &v in &self.order {
            for &t in self.successors(v) {
                succ.entry(t).or_default().push(v);
                pred.entry(v).or_default().push(t);
            }
        }
        InstGraph {
            order: self.order.clone(),
            members: self.members.clone(),
            succ,
            pred,
        }
    }
}

// ── Tests ──
