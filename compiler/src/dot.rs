// dot.rs — Graphviz DOT output for instruction graphs.
//
// Renders a module as one cluster per computation, with data edges solid
// and explicit ordering edges dashed red so the pass's additions stand
// out against the dataflow they constrain.
//
// Preconditions: `module` is fully constructed.
// Postconditions: returns a valid DOT string representing the module.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::classify;
use crate::ir::{Instruction, Module, OpKind};

/// Emit the module as a Graphviz DOT string.
pub fn emit_dot(module: &Module) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph {} {{", sanitize(&module.name)).unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    for comp in &module.computations {
        let sanitized = sanitize(&comp.name);
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_{sanitized} {{").unwrap();
        if comp.is_fusion {
            writeln!(buf, "        label=\"fusion: {}\";", comp.name).unwrap();
            writeln!(buf, "        style=dashed;").unwrap();
            writeln!(buf, "        color=gray70;").unwrap();
        } else {
            writeln!(buf, "        label=\"computation: {}\";", comp.name).unwrap();
            writeln!(buf, "        style=rounded;").unwrap();
            writeln!(buf, "        color=gray50;").unwrap();
        }

        for &id in &comp.instructions {
            let inst = module.inst(id);
            let attrs = node_attrs(inst, id == comp.root);
            writeln!(buf, "        n{} [{attrs}];", id.0).unwrap();
        }

        writeln!(buf).unwrap();
        for &id in &comp.instructions {
            for &operand in &module.inst(id).operands {
                writeln!(buf, "        n{} -> n{};", operand.0, id.0).unwrap();
            }
        }
        writeln!(buf, "    }}").unwrap();
    }

    // Ordering edges sit outside the clusters; constraint=false keeps the
    // layout driven by data edges alone.
    let mut ordering = module.ordering_edges();
    ordering.sort_by_key(|&(before, after)| (before.0, after.0));
    if !ordering.is_empty() {
        writeln!(buf).unwrap();
        writeln!(buf, "    // Ordering edges").unwrap();
        for (before, after) in ordering {
            writeln!(
                buf,
                "    n{} -> n{} [style=dashed, color=red, constraint=false];",
                before.0, after.0
            )
            .unwrap();
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Return DOT attributes string for one instruction node.
fn node_attrs(inst: &Instruction, is_root: bool) -> String {
    let (shape, color) = if classify::is_allocation_origin(inst) {
        ("cylinder", "lightsalmon")
    } else if classify::fixes_layout(inst) {
        ("box", "lightblue")
    } else if matches!(inst.op, OpKind::Tuple | OpKind::IndexSelect { .. }) {
        ("diamond", "lightyellow")
    } else {
        ("box", "white")
    };
    let mut attrs = format!(
        "shape={shape}, style=filled, fillcolor={color}, label=\"%{}\\n{} {}\"",
        inst.name, inst.op, inst.shape
    );
    if is_root {
        attrs.push_str(", peripheries=2");
    }
    attrs
}
