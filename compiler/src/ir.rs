// ir.rs — Instruction graph model
//
// The module/computation/instruction arena the allocation passes operate on.
// Instructions are owned by the module and referenced by `InstId` everywhere;
// computations hold their members in construction order, which is topological
// (operands are always defined before their users). Ordering (control) edges
// are the only graph mutation performed after construction, and every such
// mutation bumps the module's ordering epoch so reachability caches can detect
// staleness.
//
// Preconditions: instructions are created through `ModuleBuilder`.
// Postconditions: user lists mirror operand lists; computation member lists
//                 are topological over data edges.
// Failure modes: malformed construction (duplicate names, cross-computation
//                operands, bad tuple selects) → `BuildError`.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use crate::id::{CompId, IdAllocator, InstId};
use crate::shape::{ElementType, Shape, Sharding};

// ── Operation kinds ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Parameter,
    Constant,
    Feed,
    Tuple,
    IndexSelect {
        index: usize,
    },
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
    /// Fused add of a rank-1 bias onto the trailing dimension.
    BiasAdd,
    /// Fused `a + b * scale`; the trailing scalar operand is the scale.
    ScaledAdd,
    Negate,
    Exponential,
    Log,
    Tanh,
    Abs,
    Convert,
    Reshape,
    Transpose,
    Reduce,
    Convolution,
    Dot,
    /// Normalization in training form: emits (output, mean, variance).
    NormTrain,
    /// Normalization in inference form: emits the normalized output only.
    NormInference,
    Custom {
        target: String,
        /// Declared (operand index, layout operand index) pairs: operand i's
        /// allocation should match operand j's layout.
        layout_pairs: Vec<(usize, usize)>,
    },
}

impl OpKind {
    /// Text-format mnemonic. The parser accepts exactly these spellings.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpKind::Parameter => "parameter",
            OpKind::Constant => "constant",
            OpKind::Feed => "feed",
            OpKind::Tuple => "tuple",
            OpKind::IndexSelect { .. } => "select",
            OpKind::Add => "add",
            OpKind::Subtract => "subtract",
            OpKind::Multiply => "multiply",
            OpKind::Divide => "divide",
            OpKind::Maximum => "maximum",
            OpKind::Minimum => "minimum",
            OpKind::BiasAdd => "bias_add",
            OpKind::ScaledAdd => "scaled_add",
            OpKind::Negate => "negate",
            OpKind::Exponential => "exp",
            OpKind::Log => "log",
            OpKind::Tanh => "tanh",
            OpKind::Abs => "abs",
            OpKind::Convert => "convert",
            OpKind::Reshape => "reshape",
            OpKind::Transpose => "transpose",
            OpKind::Reduce => "reduce",
            OpKind::Convolution => "convolution",
            OpKind::Dot => "dot",
            OpKind::NormTrain => "norm_train",
            OpKind::NormInference => "norm_inference",
            OpKind::Custom { .. } => "custom",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

// ── Instructions ─────────────────────────────────────────────────────────

/// One node of the instruction graph.
///
/// `users` mirrors `operands` (first-use order, deduplicated). The
/// control predecessor/successor lists hold the explicit ordering edges;
/// they are empty at construction and mutated only through
/// `Module::add_control_dependency` / `remove_control_dependency`.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub id: InstId,
    pub name: String,
    pub op: OpKind,
    pub shape: Shape,
    pub operands: Vec<InstId>,
    pub users: Vec<InstId>,
    pub control_predecessors: Vec<InstId>,
    pub control_successors: Vec<InstId>,
    pub sharding: Option<Sharding>,
    /// Whether this instruction may alias its operand's storage. Consulted
    /// when unwrapping tuple selects during deferred-path construction.
    pub in_place: bool,
    pub computation: CompId,
}

impl Instruction {
    /// First operand position holding `operand`, if any.
    pub fn operand_index(&self, operand: InstId) -> Option<usize> {
        self.operands.iter().position(|&o| o == operand)
    }

    /// Declared layout dependencies: (operand index, layout operand index)
    /// pairs stating that operand i's allocation should match operand j's
    /// layout by value. Empty for every op kind that declares none.
    pub fn layout_dependencies(&self) -> &[(usize, usize)] {
        const NORM_PAIRS: &[(usize, usize)] = &[(1, 0), (2, 0)];
        match &self.op {
            OpKind::NormTrain | OpKind::NormInference => NORM_PAIRS,
            OpKind::Custom { layout_pairs, .. } => layout_pairs,
            _ => &[],
        }
    }

    pub fn select_index(&self) -> Option<usize> {
        match self.op {
            OpKind::IndexSelect { index } => Some(index),
            _ => None,
        }
    }
}

// ── Computations ─────────────────────────────────────────────────────────

/// A rooted DAG of instructions. `instructions` is in construction order,
/// which the builder guarantees to be topological over data edges.
#[derive(Debug, Clone)]
pub struct Computation {
    pub id: CompId,
    pub name: String,
    pub instructions: Vec<InstId>,
    pub root: InstId,
    /// Fusion computations are implementation details of single fused ops
    /// and are excluded from whole-graph analyses.
    pub is_fusion: bool,
}

// ── Module ───────────────────────────────────────────────────────────────

/// A whole program: an instruction arena plus its computations.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    insts: Vec<Instruction>,
    pub computations: Vec<Computation>,
    ordering_epoch: u64,
}

impl Module {
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.0 as usize]
    }

    fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.0 as usize]
    }

    pub fn computation(&self, id: CompId) -> &Computation {
        &self.computations[id.0 as usize]
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    /// Monotone counter bumped by every ordering-edge mutation. Reachability
    /// caches compare against it to detect stale queries.
    pub fn ordering_epoch(&self) -> u64 {
        self.ordering_epoch
    }

    /// Look up an instruction by name anywhere in the module.
    pub fn find_instruction(&self, name: &str) -> Option<InstId> {
        self.insts.iter().find(|i| i.name == name).map(|i| i.id)
    }

    /// Add the ordering edge `before → after`. The edge must not already
    /// exist; callers gate insertion on a reachability query.
    pub fn add_control_dependency(&mut self, before: InstId, after: InstId) {
        debug_assert!(
            !self.inst(before).control_successors.contains(&after),
            "ordering edge {:?} -> {:?} added twice",
            before,
            after
        );
        self.inst_mut(before).control_successors.push(after);
        self.inst_mut(after).control_predecessors.push(before);
        self.ordering_epoch += 1;
    }

    /// Remove the ordering edge `before → after`. The edge must exist.
    pub fn remove_control_dependency(&mut self, before: InstId, after: InstId) {
        let succ = &mut self.inst_mut(before).control_successors;
        let pos = succ.iter().position(|&s| s == after);
        debug_assert!(pos.is_some(), "removing absent ordering edge");
        if let Some(pos) = pos {
            succ.remove(pos);
        }
        let pred = &mut self.inst_mut(after).control_predecessors;
        if let Some(pos) = pred.iter().position(|&p| p == before) {
            pred.remove(pos);
        }
        self.ordering_epoch += 1;
    }

    /// All ordering edges in the module, in (before, after) form. Order is
    /// deterministic: by source instruction id, then successor list order.
    pub fn ordering_edges(&self) -> Vec<(InstId, InstId)> {
        let mut edges = Vec::new();
        for inst in &self.insts {
            for &succ in &inst.control_successors {
                edges.push((inst.id, succ));
            }
        }
        edges
    }
}

// ── Cycle detection ──────────────────────────────────────────────────────

/// Detect cycles in one computation over data and ordering edges combined,
/// using three-state DFS. Returns all cycles found. Independent of any
/// reachability cache.
pub fn detect_cycles(module: &Module, comp: CompId) -> Vec<Vec<InstId>> {
    let comp = module.computation(comp);
    if comp.instructions.is_empty() {
        return Vec::new();
    }

    let mut cycles = Vec::new();
    let mut visited: HashMap<InstId, u8> = HashMap::new(); // 0 unvisited, 1 in progress, 2 done
    let mut path = Vec::new();

    for &id in &comp.instructions {
        if *visited.get(&id).unwrap_or(&0) == 0 {
            dfs_cycle(module, id, &mut visited, &mut path, &mut cycles);
        }
    }

    cycles
}

fn dfs_cycle(
    module: &Module,
    node: InstId,
    visited: &mut HashMap<InstId, u8>,
    path: &mut Vec<InstId>,
    cycles: &mut Vec<Vec<InstId>>,
) {
    visited.insert(node, 1);
    path.push(node);

    let inst = module.inst(node);
    let downstream = inst.users.iter().chain(inst.control_successors.iter());
    for &next in downstream {
        match visited.get(&next).unwrap_or(&0) {
            0 => dfs_cycle(module, next, visited, path, cycles),
            1 => {
                if let Some(pos) = path.iter().position(|&n| n == next) {
                    cycles.push(path[pos..].to_vec());
                }
            }
            _ => {}
        }
    }

    path.pop();
    visited.insert(node, 2);
}

// ── Display ──────────────────────────────────────────────────────────────

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {} {{", self.name)?;
        for (ci, comp) in self.computations.iter().enumerate() {
            if ci > 0 {
                writeln!(f)?;
            }
            let fusion = if comp.is_fusion { "fusion " } else { "" };
            writeln!(f, "  {}computation {} {{", fusion, comp.name)?;
            for (i, &id) in comp.instructions.iter().enumerate() {
                let inst = self.inst(id);
                let is_last = i + 1 == comp.instructions.len();
                let root = if inst.id == comp.root && !is_last {
                    "root "
                } else {
                    ""
                };
                write!(f, "    {}%{} = {} {}", root, inst.name, inst.shape, inst.op)?;
                if !inst.operands.is_empty() {
                    write!(f, "(")?;
                    for (j, &op) in inst.operands.iter().enumerate() {
                        if j > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "%{}", self.inst(op).name)?;
                    }
                    write!(f, ")")?;
                }
                match &inst.op {
                    OpKind::IndexSelect { index } => write!(f, ", index={index}")?,
                    OpKind::Custom {
                        target,
                        layout_pairs,
                    } => {
                        write!(f, ", target=\"{target}\"")?;
                        if !layout_pairs.is_empty() {
                            write!(f, ", pairs={{")?;
                            for (j, (a, b)) in layout_pairs.iter().enumerate() {
                                if j > 0 {
                                    write!(f, ", ")?;
                                }
                                write!(f, "{a}:{b}")?;
                            }
                            write!(f, "}}")?;
                        }
                    }
                    _ => {}
                }
                if !inst.in_place && matches!(inst.op, OpKind::IndexSelect { .. }) {
                    write!(f, ", noinplace")?;
                }
                writeln!(f)?;
            }
            writeln!(f, "  }}")?;
        }
        writeln!(f, "}}")
    }
}

// ── Build errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    DuplicateName(String),
    NoOpenComputation,
    EmptyComputation(String),
    OperandOutsideComputation(InstId),
    NotATuple(InstId),
    SelectIndexOutOfRange { tuple: InstId, index: usize },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::DuplicateName(name) => write!(f, "duplicate name '{name}'"),
            BuildError::NoOpenComputation => write!(f, "no computation is open"),
            BuildError::EmptyComputation(name) => {
                write!(f, "computation '{name}' has no instructions")
            }
            BuildError::OperandOutsideComputation(id) => {
                write!(f, "operand {:?} is not defined in the open computation", id)
            }
            BuildError::NotATuple(id) => write!(f, "select of non-tuple instruction {:?}", id),
            BuildError::SelectIndexOutOfRange { tuple, index } => {
                write!(f, "select index {} out of range for {:?}", index, tuple)
            }
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Constructs a module one computation at a time. Instructions must be
/// added operands-first; the builder rejects references to instructions
/// outside the open computation, which keeps every computation topological
/// and acyclic over data edges by construction.
pub struct ModuleBuilder {
    name: String,
    insts: Vec<Instruction>,
    computations: Vec<Computation>,
    ids: IdAllocator,
    names: HashMap<String, InstId>,
    open: Option<OpenComputation>,
}

struct OpenComputation {
    id: CompId,
    name: String,
    is_fusion: bool,
    instructions: Vec<InstId>,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleBuilder {
            name: name.into(),
            insts: Vec::new(),
            computations: Vec::new(),
            ids: IdAllocator::new(),
            names: HashMap::new(),
            open: None,
        }
    }

    /// Open a new computation. Any previously open computation must have
    /// been finished first.
    pub fn begin_computation(
        &mut self,
        name: impl Into<String>,
        is_fusion: bool,
    ) -> Result<CompId, BuildError> {
        debug_assert!(self.open.is_none(), "computation already open");
        let name = name.into();
        if self.computations.iter().any(|c| c.name == name) {
            return Err(BuildError::DuplicateName(name));
        }
        let id = self.ids.alloc_comp();
        self.open = Some(OpenComputation {
            id,
            name,
            is_fusion,
            instructions: Vec::new(),
        });
        Ok(id)
    }

    /// Add an instruction to the open computation.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        op: OpKind,
        shape: Shape,
        operands: &[InstId],
    ) -> Result<InstId, BuildError> {
        let open = self.open.as_ref().ok_or(BuildError::NoOpenComputation)?;
        let comp_id = open.id;
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(BuildError::DuplicateName(name));
        }
        for &operand in operands {
            let in_comp = self
                .insts
                .get(operand.0 as usize)
                .map(|i| i.computation == comp_id)
                .unwrap_or(false);
            if !in_comp {
                return Err(BuildError::OperandOutsideComputation(operand));
            }
        }

        let id = self.ids.alloc_inst();
        let in_place = matches!(op, OpKind::IndexSelect { .. });
        self.insts.push(Instruction {
            id,
            name: name.clone(),
            op,
            shape,
            operands: operands.to_vec(),
            users: Vec::new(),
            control_predecessors: Vec::new(),
            control_successors: Vec::new(),
            sharding: None,
            in_place,
            computation: comp_id,
        });
        self.names.insert(name, id);

        // Mirror operand edges into user lists (first-use order, deduped).
        for &operand in operands {
            let users = &mut self.insts[operand.0 as usize].users;
            if !users.contains(&id) {
                users.push(id);
            }
        }

        let open = self.open.as_mut().ok_or(BuildError::NoOpenComputation)?;
        open.instructions.push(id);
        Ok(id)
    }

    // ── Op-specific conveniences ──

    pub fn parameter(&mut self, name: &str, shape: Shape) -> Result<InstId, BuildError> {
        self.add(name, OpKind::Parameter, shape, &[])
    }

    pub fn constant(&mut self, name: &str, shape: Shape) -> Result<InstId, BuildError> {
        self.add(name, OpKind::Constant, shape, &[])
    }

    pub fn feed(&mut self, name: &str, shape: Shape) -> Result<InstId, BuildError> {
        self.add(name, OpKind::Feed, shape, &[])
    }

    pub fn tuple(&mut self, name: &str, elements: &[InstId]) -> Result<InstId, BuildError> {
        let shape = Shape::Tuple(
            elements
                .iter()
                .map(|&e| {
                    self.insts
                        .get(e.0 as usize)
                        .map(|i| i.shape.clone())
                        .ok_or(BuildError::OperandOutsideComputation(e))
                })
                .collect::<Result<Vec<_>, _>>()?,
        );
        self.add(name, OpKind::Tuple, shape, elements)
    }

    pub fn select(&mut self, name: &str, tuple: InstId, index: usize) -> Result<InstId, BuildError> {
        let tuple_shape = self
            .insts
            .get(tuple.0 as usize)
            .map(|i| i.shape.clone())
            .ok_or(BuildError::OperandOutsideComputation(tuple))?;
        if !tuple_shape.is_tuple() {
            return Err(BuildError::NotATuple(tuple));
        }
        let shape = tuple_shape
            .tuple_element(index)
            .cloned()
            .ok_or(BuildError::SelectIndexOutOfRange { tuple, index })?;
        self.add(name, OpKind::IndexSelect { index }, shape, &[tuple])
    }

    /// Elementwise op whose output shape matches its first operand.
    pub fn elementwise(
        &mut self,
        name: &str,
        op: OpKind,
        operands: &[InstId],
    ) -> Result<InstId, BuildError> {
        let shape = self.operand_shape(operands[0])?;
        self.add(name, op, shape, operands)
    }

    pub fn convert(&mut self, name: &str, x: InstId, ty: ElementType) -> Result<InstId, BuildError> {
        let shape = match self.operand_shape(x)? {
            Shape::Array { dims, .. } => Shape::Array { ty, dims },
            tuple => tuple,
        };
        self.add(name, OpKind::Convert, shape, &[x])
    }

    pub fn reshape(&mut self, name: &str, x: InstId, dims: &[u64]) -> Result<InstId, BuildError> {
        let ty = self
            .operand_shape(x)?
            .element_type()
            .ok_or(BuildError::NotATuple(x))?;
        self.add(name, OpKind::Reshape, Shape::array(ty, dims), &[x])
    }

    pub fn transpose(&mut self, name: &str, x: InstId) -> Result<InstId, BuildError> {
        let shape = match self.operand_shape(x)? {
            Shape::Array { ty, mut dims } => {
                dims.reverse();
                Shape::Array { ty, dims }
            }
            tuple => tuple,
        };
        self.add(name, OpKind::Transpose, shape, &[x])
    }

    pub fn reduce(&mut self, name: &str, x: InstId) -> Result<InstId, BuildError> {
        let ty = self
            .operand_shape(x)?
            .element_type()
            .ok_or(BuildError::NotATuple(x))?;
        self.add(name, OpKind::Reduce, Shape::scalar(ty), &[x])
    }

    pub fn convolution(&mut self, name: &str, x: InstId, w: InstId) -> Result<InstId, BuildError> {
        let shape = self.operand_shape(x)?;
        self.add(name, OpKind::Convolution, shape, &[x, w])
    }

    pub fn dot(&mut self, name: &str, a: InstId, b: InstId) -> Result<InstId, BuildError> {
        let shape = self.operand_shape(a)?;
        self.add(name, OpKind::Dot, shape, &[a, b])
    }

    pub fn norm_train(
        &mut self,
        name: &str,
        input: InstId,
        scale: InstId,
        offset: InstId,
    ) -> Result<InstId, BuildError> {
        let input_shape = self.operand_shape(input)?;
        let stat_shape = self.operand_shape(scale)?;
        let shape = Shape::Tuple(vec![input_shape, stat_shape.clone(), stat_shape]);
        self.add(name, OpKind::NormTrain, shape, &[input, scale, offset])
    }

    pub fn norm_inference(
        &mut self,
        name: &str,
        input: InstId,
        scale: InstId,
        offset: InstId,
        mean: InstId,
        variance: InstId,
    ) -> Result<InstId, BuildError> {
        let shape = self.operand_shape(input)?;
        self.add(
            name,
            OpKind::NormInference,
            shape,
            &[input, scale, offset, mean, variance],
        )
    }

    pub fn custom(
        &mut self,
        name: &str,
        target: &str,
        shape: Shape,
        operands: &[InstId],
        layout_pairs: Vec<(usize, usize)>,
    ) -> Result<InstId, BuildError> {
        self.add(
            name,
            OpKind::Custom {
                target: target.to_string(),
                layout_pairs,
            },
            shape,
            operands,
        )
    }

    // ── Attribute overrides ──

    pub fn set_sharding(&mut self, id: InstId, sharding: Sharding) {
        if let Some(inst) = self.insts.get_mut(id.0 as usize) {
            inst.sharding = Some(sharding);
        }
    }

    pub fn set_in_place(&mut self, id: InstId, in_place: bool) {
        if let Some(inst) = self.insts.get_mut(id.0 as usize) {
            inst.in_place = in_place;
        }
    }

    /// Close the open computation. `root` defaults to the last instruction.
    pub fn finish_computation(&mut self, root: Option<InstId>) -> Result<CompId, BuildError> {
        let open = self.open.take().ok_or(BuildError::NoOpenComputation)?;
        let last = open
            .instructions
            .last()
            .copied()
            .ok_or_else(|| BuildError::EmptyComputation(open.name.clone()))?;
        let id = open.id;
        self.computations.push(Computation {
            id,
            name: open.name,
            instructions: open.instructions,
            root: root.unwrap_or(last),
            is_fusion: open.is_fusion,
        });
        Ok(id)
    }

    pub fn finish(self) -> Module {
        debug_assert!(self.open.is_none(), "unfinished computation");
        Module {
            name: self.name,
            insts: self.insts,
            computations: self.computations,
            ordering_epoch: 0,
        }
    }

    fn operand_shape(&self, id: InstId) -> Result<Shape, BuildError> {
        self.insts
            .get(id.0 as usize)
            .map(|i| i.shape.clone())
            .ok_or(BuildError::OperandOutsideComputation(id))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ElementType as Ty;

    fn vec4() -> Shape {
        Shape::array(Ty::F32, &[4])
    }

    #[test]
    fn users_mirror_operands() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        let q = b.parameter("q", vec4()).unwrap();
        let add = b.elementwise("a", OpKind::Add, &[p, q]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        assert_eq!(m.inst(p).users, vec![add]);
        assert_eq!(m.inst(q).users, vec![add]);
        assert_eq!(m.inst(add).operands, vec![p, q]);
    }

    #[test]
    fn duplicate_operand_listed_once_in_users() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        let add = b.elementwise("a", OpKind::Add, &[p, p]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        assert_eq!(m.inst(p).users, vec![add]);
        assert_eq!(m.inst(add).operands.len(), 2);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        b.parameter("p", vec4()).unwrap();
        let err = b.parameter("p", vec4()).unwrap_err();
        assert_eq!(err, BuildError::DuplicateName("p".into()));
    }

    #[test]
    fn select_requires_tuple_and_valid_index() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        assert_eq!(b.select("s", p, 0).unwrap_err(), BuildError::NotATuple(p));

        let t = b
            .parameter("t", Shape::tuple(vec![vec4(), vec4()]))
            .unwrap();
        assert!(b.select("s0", t, 0).is_ok());
        assert_eq!(
            b.select("s9", t, 9).unwrap_err(),
            BuildError::SelectIndexOutOfRange { tuple: t, index: 9 }
        );
    }

    #[test]
    fn select_shape_is_element_shape() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let t = b
            .parameter(
                "t",
                Shape::tuple(vec![vec4(), Shape::scalar(Ty::S32)]),
            )
            .unwrap();
        let s1 = b.select("s1", t, 1).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();
        assert_eq!(m.inst(s1).shape, Shape::scalar(Ty::S32));
        assert!(m.inst(s1).in_place);
    }

    #[test]
    fn norm_pairs_declared() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let x = b.parameter("x", vec4()).unwrap();
        let s = b.parameter("s", Shape::scalar(Ty::F32)).unwrap();
        let o = b.parameter("o", Shape::scalar(Ty::F32)).unwrap();
        let n = b.norm_train("n", x, s, o).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        assert_eq!(m.inst(n).layout_dependencies(), &[(1, 0), (2, 0)]);
        assert!(m.inst(x).layout_dependencies().is_empty());
        assert!(m.inst(n).shape.is_tuple());
    }

    #[test]
    fn custom_pairs_declared() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let x = b.parameter("x", vec4()).unwrap();
        let y = b.parameter("y", vec4()).unwrap();
        let c = b
            .custom("c", "pool_grad", vec4(), &[x, y], vec![(1, 0)])
            .unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();
        assert_eq!(m.inst(c).layout_dependencies(), &[(1, 0)]);
    }

    #[test]
    fn control_dependency_roundtrip() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        let q = b.parameter("q", vec4()).unwrap();
        b.elementwise("a", OpKind::Add, &[p, q]).unwrap();
        b.finish_computation(None).unwrap();
        let mut m = b.finish();

        let epoch0 = m.ordering_epoch();
        m.add_control_dependency(p, q);
        assert_eq!(m.inst(p).control_successors, vec![q]);
        assert_eq!(m.inst(q).control_predecessors, vec![p]);
        assert!(m.ordering_epoch() > epoch0);

        m.remove_control_dependency(p, q);
        assert!(m.inst(p).control_successors.is_empty());
        assert!(m.inst(q).control_predecessors.is_empty());
        assert_eq!(m.ordering_edges(), vec![]);
    }

    #[test]
    fn cycle_detection_over_ordering_edges() {
        let mut b = ModuleBuilder::new("m");
        let comp = b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        let a = b.elementwise("a", OpKind::Abs, &[p]).unwrap();
        let c = b.elementwise("c", OpKind::Negate, &[a]).unwrap();
        b.finish_computation(None).unwrap();
        let mut m = b.finish();

        assert!(detect_cycles(&m, comp).is_empty());

        // Data path p -> a -> c plus ordering edge c -> a closes a cycle.
        m.add_control_dependency(c, a);
        let cycles = detect_cycles(&m, comp);
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].contains(&a));
        assert!(cycles[0].contains(&c));
    }

    #[test]
    fn display_roundtrip_texture() {
        let mut b = ModuleBuilder::new("demo");
        b.begin_computation("main", false).unwrap();
        let t = b
            .parameter("arg", Shape::tuple(vec![vec4(), vec4()]))
            .unwrap();
        let x = b.select("x", t, 0).unwrap();
        let y = b.select("y", t, 1).unwrap();
        b.elementwise("sum", OpKind::Add, &[x, y]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        let text = m.to_string();
        assert!(text.contains("module demo {"));
        assert!(text.contains("%arg = (f32[4], f32[4]) parameter"));
        assert!(text.contains("%x = f32[4] select(%arg), index=0"));
        assert!(text.contains("%sum = f32[4] add(%x, %y)"));
    }

    #[test]
    fn find_instruction_by_name() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();
        assert_eq!(m.find_instruction("p"), Some(p));
        assert_eq!(m.find_instruction("zzz"), None);
    }
}
