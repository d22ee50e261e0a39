// classify.rs — Operation classification queries
//
// Small pure predicates over instructions, shared by the allocation passes.
// These encode which ops are elementwise, which fix a layout by
// construction, and which are admissible allocation targets.

use crate::ir::{Instruction, Module, OpKind};

pub fn is_bias_add(inst: &Instruction) -> bool {
    matches!(inst.op, OpKind::BiasAdd)
}

pub fn is_normalization(inst: &Instruction) -> bool {
    matches!(inst.op, OpKind::NormTrain | OpKind::NormInference)
}

pub fn is_elementwise_unary(inst: &Instruction) -> bool {
    matches!(
        inst.op,
        OpKind::Negate
            | OpKind::Exponential
            | OpKind::Log
            | OpKind::Tanh
            | OpKind::Abs
            | OpKind::Convert
    )
}

/// Binary in the elementwise sense: the first two operands are combined
/// pointwise. Fused forms may carry trailing extra operands (a bias vector
/// broadcast, a scale scalar) beyond the two combined ones.
pub fn is_elementwise_binary(inst: &Instruction) -> bool {
    matches!(
        inst.op,
        OpKind::Add
            | OpKind::Subtract
            | OpKind::Multiply
            | OpKind::Divide
            | OpKind::Maximum
            | OpKind::Minimum
            | OpKind::BiasAdd
            | OpKind::ScaledAdd
    )
}

pub fn is_elementwise(inst: &Instruction) -> bool {
    is_elementwise_unary(inst) || is_elementwise_binary(inst)
}

/// Shape-only pass-throughs: the output is the operand's data rearranged,
/// never recomputed.
pub fn is_shape_passthrough(inst: &Instruction) -> bool {
    matches!(inst.op, OpKind::Reshape | OpKind::Transpose)
}

/// Ops whose output layout is fixed by the tile mapping they are lowered
/// with, independent of this analysis.
pub fn fixes_layout(inst: &Instruction) -> bool {
    matches!(inst.op, OpKind::Convolution | OpKind::Dot)
}

/// True origins for deferred allocation: values that enter the computation
/// from outside rather than being computed.
pub fn is_allocation_origin(inst: &Instruction) -> bool {
    matches!(
        inst.op,
        OpKind::Parameter | OpKind::Constant | OpKind::Feed
    )
}

/// Whether `inst` declares that some operand's allocation must match
/// another operand's layout by value.
pub fn declares_layout_dependencies(inst: &Instruction) -> bool {
    !inst.layout_dependencies().is_empty()
}

/// Output element type equals every operand's element type. False whenever
/// the output or any operand is tuple-shaped.
pub fn types_preserved(module: &Module, inst: &Instruction) -> bool {
    let Some(out_ty) = inst.shape.element_type() else {
        return false;
    };
    inst.operands
        .iter()
        .all(|&o| module.inst(o).shape.element_type() == Some(out_ty))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ModuleBuilder;
    use crate::shape::{ElementType as Ty, Shape};

    fn vec4() -> Shape {
        Shape::array(Ty::F32, &[4])
    }

    #[test]
    fn elementwise_partitions() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        let q = b.parameter("q", vec4()).unwrap();
        let s = b.parameter("s", Shape::scalar(Ty::F32)).unwrap();
        let add = b.elementwise("add", OpKind::Add, &[p, q]).unwrap();
        let badd = b.elementwise("badd", OpKind::BiasAdd, &[p, q]).unwrap();
        let sadd = b
            .elementwise("sadd", OpKind::ScaledAdd, &[p, q, s])
            .unwrap();
        let neg = b.elementwise("neg", OpKind::Negate, &[p]).unwrap();
        let cvt = b.convert("cvt", p, Ty::F16).unwrap();
        let rsh = b.reshape("rsh", p, &[2, 2]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        for id in [add, badd, sadd] {
            assert!(is_elementwise_binary(m.inst(id)));
            assert!(!is_elementwise_unary(m.inst(id)));
        }
        for id in [neg, cvt] {
            assert!(is_elementwise_unary(m.inst(id)));
        }
        assert!(is_bias_add(m.inst(badd)));
        assert!(!is_bias_add(m.inst(add)));
        assert!(is_shape_passthrough(m.inst(rsh)));
        assert!(!is_elementwise(m.inst(rsh)));
    }

    #[test]
    fn origins_and_layout_fixers() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        let c = b.constant("c", vec4()).unwrap();
        let f = b.feed("f", vec4()).unwrap();
        let conv = b.convolution("conv", p, c).unwrap();
        let d = b.dot("d", p, c).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        for id in [p, c, f] {
            assert!(is_allocation_origin(m.inst(id)));
        }
        assert!(fixes_layout(m.inst(conv)));
        assert!(fixes_layout(m.inst(d)));
        assert!(!fixes_layout(m.inst(p)));
    }

    #[test]
    fn layout_dependency_declarations() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let x = b.parameter("x", vec4()).unwrap();
        let s = b.parameter("s", Shape::scalar(Ty::F32)).unwrap();
        let o = b.parameter("o", Shape::scalar(Ty::F32)).unwrap();
        let n = b.norm_train("n", x, s, o).unwrap();
        let plain = b
            .custom("plain", "widget", vec4(), &[x], vec![])
            .unwrap();
        let declared = b
            .custom("declared", "pool_grad", vec4(), &[x, s], vec![(1, 0)])
            .unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        assert!(declares_layout_dependencies(m.inst(n)));
        assert!(is_normalization(m.inst(n)));
        assert!(!declares_layout_dependencies(m.inst(plain)));
        assert!(declares_layout_dependencies(m.inst(declared)));
    }

    #[test]
    fn type_preservation() {
        let mut b = ModuleBuilder::new("m");
        b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        let q = b.parameter("q", vec4()).unwrap();
        let add = b.elementwise("add", OpKind::Add, &[p, q]).unwrap();
        let cvt = b.convert("cvt", p, Ty::F16).unwrap();
        let mixed = b.elementwise("mixed", OpKind::Add, &[cvt, cvt]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        assert!(types_preserved(&m, m.inst(add)));
        // Conversion changes the output type away from its operand's.
        assert!(!types_preserved(&m, m.inst(cvt)));
        assert!(types_preserved(&m, m.inst(mixed)));
    }
}
