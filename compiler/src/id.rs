// id.rs — Stable identifiers for instruction-graph entities
//
// IDs are allocated in construction order by the module builder, giving
// deterministic, name-independent identity for instructions and computations.
// All maps keyed by these IDs iterate in an order derived from construction
// order, never from hashing.

/// Stable identifier for an instruction. Unique across the whole module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

/// Stable identifier for a computation subgraph within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompId(pub u32);

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_inst: u32,
    next_comp: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_inst(&mut self) -> InstId {
        let id = InstId(self.next_inst);
        self.next_inst += 1;
        id
    }

    pub fn alloc_comp(&mut self) -> CompId {
        let id = CompId(self.next_comp);
        self.next_comp += 1;
        id
    }
}
