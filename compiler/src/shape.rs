// shape.rs — Shapes, element types, tuple index flattening, sharding
//
// The value model for instruction outputs: dense arrays of a primitive
// element type, or arbitrarily nested tuples of them. Also hosts the
// flat-index arithmetic used when a nested tuple element must be located
// inside its flattened container, and the placement (sharding) annotations
// compared during tuple unwrapping.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Element types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F16,
    F32,
    S32,
    U32,
    Pred,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::F16 => "f16",
            ElementType::F32 => "f32",
            ElementType::S32 => "s32",
            ElementType::U32 => "u32",
            ElementType::Pred => "pred",
        };
        write!(f, "{name}")
    }
}

// ── Shapes ───────────────────────────────────────────────────────────────

/// The shape of an instruction's output value: a dense array or a nested
/// tuple. A scalar is an array with no dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Array { ty: ElementType, dims: Vec<u64> },
    Tuple(Vec<Shape>),
}

impl Shape {
    pub fn array(ty: ElementType, dims: &[u64]) -> Shape {
        Shape::Array {
            ty,
            dims: dims.to_vec(),
        }
    }

    pub fn scalar(ty: ElementType) -> Shape {
        Shape::Array { ty, dims: vec![] }
    }

    pub fn tuple(elements: Vec<Shape>) -> Shape {
        Shape::Tuple(elements)
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Shape::Tuple(_))
    }

    /// Element type of an array shape. `None` for tuples.
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            Shape::Array { ty, .. } => Some(*ty),
            Shape::Tuple(_) => None,
        }
    }

    /// Tuple element at `index`. `None` for arrays or out-of-range indices.
    pub fn tuple_element(&self, index: usize) -> Option<&Shape> {
        match self {
            Shape::Tuple(elements) => elements.get(index),
            Shape::Array { .. } => None,
        }
    }

    pub fn tuple_len(&self) -> usize {
        match self {
            Shape::Tuple(elements) => elements.len(),
            Shape::Array { .. } => 0,
        }
    }

    /// Number of non-tuple leaves in this shape. An array counts as one
    /// leaf regardless of rank.
    pub fn leaf_count(&self) -> u64 {
        match self {
            Shape::Array { .. } => 1,
            Shape::Tuple(elements) => elements.iter().map(Shape::leaf_count).sum(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array { ty, dims } => {
                write!(f, "{ty}[")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{d}")?;
                }
                write!(f, "]")
            }
            Shape::Tuple(elements) => {
                write!(f, "(")?;
                for (i, s) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{s}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ── Flat index arithmetic ────────────────────────────────────────────────

/// Position of a leaf inside a flattened container.
///
/// Given a tuple-shaped `container`, the leaf at running offset `inner`
/// within the element at `tuple_index` sits at the returned offset once the
/// container itself is flattened. Non-tuple containers pass `inner` through
/// unchanged (the selection is degenerate).
pub fn flatten_tuple_index(container: &Shape, tuple_index: usize, inner: u64) -> u64 {
    match container {
        Shape::Tuple(elements) => {
            let before: u64 = elements
                .iter()
                .take(tuple_index)
                .map(Shape::leaf_count)
                .sum();
            before + inner
        }
        Shape::Array { .. } => inner,
    }
}

// ── Sharding ─────────────────────────────────────────────────────────────

/// Placement annotation for an instruction's output. Tuple-shaped outputs
/// carry one element per tuple member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sharding {
    Single(u32),
    Tuple(Vec<Sharding>),
}

impl Sharding {
    /// Sharding of the tuple element at `index`. Non-tuple shardings apply
    /// to every element uniformly.
    pub fn sub_sharding(&self, index: usize) -> &Sharding {
        match self {
            Sharding::Tuple(elements) => elements.get(index).unwrap_or(self),
            Sharding::Single(_) => self,
        }
    }
}

/// Whether selecting element `index` out of a container is placement
/// compatible with a consumer's own annotation. If either side carries a
/// sharding, both must, and the container's sub-sharding at `index` must
/// equal the consumer's.
pub fn select_sharding_compatible(
    container: Option<&Sharding>,
    index: usize,
    consumer: Option<&Sharding>,
) -> bool {
    match (container, consumer) {
        (None, None) => true,
        (Some(c), Some(u)) => c.sub_sharding(index) == u,
        _ => false,
    }
}

// ── Tests ──
