// deferred.rs — Deferred allocation path discovery
//
// Finds the true non-tuple origins of allocatable values: parameters,
// constants, and feed results, unwrapped through chains of tuple index
// selects. A tuple node unwraps only when every consumer is an index
// select, the selected indices are pairwise distinct, and placement
// annotations agree; unwrapping descends only through selects that may
// alias their operand ("in place"). Each non-tuple leaf reached this way
// becomes a map key, carrying the (container, flat index) steps needed to
// find it again inside the origin's nested shape, innermost container
// first.
//
// Preconditions: `comp` is a computation of `module`.
// Postconditions: every key's instruction has a non-tuple shape.
// Failure modes: none; nodes that fail the unwrap conditions simply
//                contribute nothing.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::classify;
use crate::id::{CompId, InstId};
use crate::ir::{Instruction, Module};
use crate::shape::{flatten_tuple_index, select_sharding_compatible};

/// One step of a deferred allocation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredStep {
    pub container: InstId,
    pub flat_index: u64,
}

/// Steps from the leaf back out to the origin, innermost container first.
/// Empty when the origin itself is the leaf.
pub type DeferredPath = Vec<DeferredStep>;

/// Map every true origin leaf in `comp` to its deferred allocation path.
pub fn find_deferred_origins(module: &Module, comp: CompId) -> HashMap<InstId, DeferredPath> {
    let mut origins = HashMap::new();
    for &id in &module.computation(comp).instructions {
        if classify::is_allocation_origin(module.inst(id)) {
            unwrap_origin(module, id, &mut origins);
        }
    }
    origins
}

/// Worklist walk from one origin. Each frame carries the value node to
/// examine plus the select chain taken to reach it, as immutable
/// (container, selected index) pairs.
fn unwrap_origin(
    module: &Module,
    origin: InstId,
    out: &mut HashMap<InstId, DeferredPath>,
) {
    let mut frames: Vec<(InstId, Vec<(InstId, usize)>)> = vec![(origin, Vec::new())];
    while let Some((node, chain)) = frames.pop() {
        let inst = module.inst(node);
        if inst.shape.is_tuple() {
            if !users_cleanly_unwrap(module, inst) {
                continue;
            }
            for &user in &inst.users {
                let select = module.inst(user);
                if !select.in_place {
                    continue;
                }
                let Some(index) = select.select_index() else {
                    continue;
                };
                let mut extended = chain.clone();
                extended.push((node, index));
                frames.push((user, extended));
            }
        } else {
            // Leaf: fold the chain back out, innermost container first,
            // accumulating the flat offset through each nested shape.
            let mut flat = 0u64;
            let mut path = DeferredPath::new();
            for &(container, index) in chain.iter().rev() {
                flat = flatten_tuple_index(&module.inst(container).shape, index, flat);
                path.push(DeferredStep {
                    container,
                    flat_index: flat,
                });
            }
            out.insert(node, path);
        }
    }
}

fn users_cleanly_unwrap(module: &Module, tuple: &Instruction) -> bool {
    let mut seen = HashSet::new();
    for &user in &tuple.users {
        let select = module.inst(user);
        let Some(index) = select.select_index() else {
            return false;
        };
        if !seen.insert(index) {
            return false;
        }
        if !select_sharding_compatible(tuple.sharding.as_ref(), index, select.sharding.as_ref()) {
            return false;
        }
    }
    true
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ModuleBuilder, OpKind};
    use crate::shape::{ElementType as Ty, Shape, Sharding};

    fn vec4() -> Shape {
        Shape::array(Ty::F32, &[4])
    }

    #[test]
    fn plain_origin_has_empty_path() {
        let mut b = ModuleBuilder::new("m");
        let comp = b.begin_computation("main", false).unwrap();
        let p = b.parameter("p", vec4()).unwrap();
        b.elementwise("a", OpKind::Abs, &[p]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        let origins = find_deferred_origins(&m, comp);
        assert_eq!(origins.len(), 1);
        assert_eq!(origins[&p], vec![]);
    }

    #[test]
    fn tuple_parameter_unwraps_per_element() {
        let mut b = ModuleBuilder::new("m");
        let comp = b.begin_computation("main", false).unwrap();
        let arg = b
            .parameter("arg", Shape::tuple(vec![vec4(), vec4()]))
            .unwrap();
        let x = b.select("x", arg, 0).unwrap();
        let y = b.select("y", arg, 1).unwrap();
        b.elementwise("sum", OpKind::Add, &[x, y]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        let origins = find_deferred_origins(&m, comp);
        assert_eq!(origins.len(), 2);
        assert_eq!(
            origins[&x],
            vec![DeferredStep {
                container: arg,
                flat_index: 0
            }]
        );
        assert_eq!(
            origins[&y],
            vec![DeferredStep {
                container: arg,
                flat_index: 1
            }]
        );
    }

    #[test]
    fn nested_tuple_flattens_through_containers() {
        // arg : (f32[4], (f32[2], f32[2]))
        let mut b = ModuleBuilder::new("m");
        let comp = b.begin_computation("main", false).unwrap();
        let inner = Shape::tuple(vec![
            Shape::array(Ty::F32, &[2]),
            Shape::array(Ty::F32, &[2]),
        ]);
        let arg = b
            .parameter("arg", Shape::tuple(vec![vec4(), inner]))
            .unwrap();
        let first = b.select("first", arg, 0).unwrap();
        let pair = b.select("pair", arg, 1).unwrap();
        let snd = b.select("snd", pair, 1).unwrap();
        b.elementwise("use", OpKind::Add, &[snd, snd]).unwrap();
        b.elementwise("keep", OpKind::Abs, &[first]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        let origins = find_deferred_origins(&m, comp);
        assert_eq!(origins.len(), 2);
        // snd is leaf 2 of the flattened origin: innermost step indexes the
        // pair container, the outer step folds in the leading f32[4] leaf.
        assert_eq!(
            origins[&snd],
            vec![
                DeferredStep {
                    container: pair,
                    flat_index: 1
                },
                DeferredStep {
                    container: arg,
                    flat_index: 2
                },
            ]
        );
        assert_eq!(
            origins[&first],
            vec![DeferredStep {
                container: arg,
                flat_index: 0
            }]
        );
    }

    #[test]
    fn duplicate_select_index_stops_unwrapping() {
        let mut b = ModuleBuilder::new("m");
        let comp = b.begin_computation("main", false).unwrap();
        let arg = b
            .parameter("arg", Shape::tuple(vec![vec4(), vec4()]))
            .unwrap();
        let x = b.select("x", arg, 0).unwrap();
        let x2 = b.select("x2", arg, 0).unwrap();
        b.elementwise("sum", OpKind::Add, &[x, x2]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        assert!(find_deferred_origins(&m, comp).is_empty());
    }

    #[test]
    fn non_select_consumer_stops_unwrapping() {
        let mut b = ModuleBuilder::new("m");
        let comp = b.begin_computation("main", false).unwrap();
        let arg = b
            .parameter("arg", Shape::tuple(vec![vec4(), vec4()]))
            .unwrap();
        let x = b.select("x", arg, 0).unwrap();
        // The tuple itself also flows into another tuple, so it cannot be
        // unwrapped.
        b.tuple("wrap", &[arg]).unwrap();
        b.elementwise("use", OpKind::Abs, &[x]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        assert!(find_deferred_origins(&m, comp).is_empty());
    }

    #[test]
    fn not_in_place_select_is_not_descended() {
        let mut b = ModuleBuilder::new("m");
        let comp = b.begin_computation("main", false).unwrap();
        let arg = b
            .parameter("arg", Shape::tuple(vec![vec4(), vec4()]))
            .unwrap();
        let x = b.select("x", arg, 0).unwrap();
        let y = b.select("y", arg, 1).unwrap();
        b.set_in_place(y, false);
        b.elementwise("sum", OpKind::Add, &[x, y]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        let origins = find_deferred_origins(&m, comp);
        assert_eq!(origins.len(), 1);
        assert!(origins.contains_key(&x));
        assert!(!origins.contains_key(&y));
    }

    #[test]
    fn sharding_mismatch_stops_unwrapping() {
        let mut b = ModuleBuilder::new("m");
        let comp = b.begin_computation("main", false).unwrap();
        let arg = b
            .parameter("arg", Shape::tuple(vec![vec4(), vec4()]))
            .unwrap();
        b.set_sharding(
            arg,
            Sharding::Tuple(vec![Sharding::Single(0), Sharding::Single(1)]),
        );
        let x = b.select("x", arg, 0).unwrap();
        b.set_sharding(x, Sharding::Single(1));
        b.elementwise("use", OpKind::Abs, &[x]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        assert!(find_deferred_origins(&m, comp).is_empty());
    }

    #[test]
    fn matching_sharding_unwraps() {
        let mut b = ModuleBuilder::new("m");
        let comp = b.begin_computation("main", false).unwrap();
        let arg = b
            .parameter("arg", Shape::tuple(vec![vec4(), vec4()]))
            .unwrap();
        b.set_sharding(
            arg,
            Sharding::Tuple(vec![Sharding::Single(0), Sharding::Single(1)]),
        );
        let x = b.select("x", arg, 0).unwrap();
        b.set_sharding(x, Sharding::Single(0));
        b.elementwise("use", OpKind::Abs, &[x]).unwrap();
        b.finish_computation(None).unwrap();
        let m = b.finish();

        let origins = find_deferred_origins(&m, comp);
        assert_eq!(origins.len(), 1);
        assert!(origins.contains_key(&x));
    }
}
