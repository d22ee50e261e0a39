// report.rs — Renders allocation decisions for human and machine readers.
//
// Both renderings resolve instruction ids back to source names and sort
// every listing, so two runs over the same input produce byte-identical
// output regardless of hash map iteration order.

use serde::Serialize;

use crate::alloc::Annotations;
use crate::id::InstId;
use crate::ir::Module;
use crate::shape::Shape;

// ── Report model ─────────────────────────────────────────────────────────

/// Everything the pass decided about one module, with ids replaced by
/// instruction names. Produced by [`build`], rendered by [`render_text`]
/// or [`AllocationReport::to_json`].
#[derive(Debug, Serialize)]
pub struct AllocationReport {
    pub module: String,
    /// Hex digest of the source text the module was parsed from.
    pub source_hash: String,
    pub compiler_version: &'static str,
    pub decisions: Vec<DecisionEntry>,
    pub deferred: Vec<DeferredEntry>,
    pub layouts: Vec<LayoutEntry>,
    pub ordering_edges: Vec<OrderingEdgeEntry>,
}

/// One committed allocation decision: which consumer's layout requirement
/// drives the source tensor, and through which nodes the layout travels.
#[derive(Debug, Serialize)]
pub struct DecisionEntry {
    pub source: String,
    pub output_index: u64,
    pub target: String,
    pub operand_index: usize,
    pub layout_producer: String,
    pub layout_output_index: usize,
    /// Interior nodes of the producer-to-target path.
    pub forward_path: Vec<String>,
    /// Interior nodes of the source-to-target path.
    pub backward_path: Vec<String>,
}

/// A tuple slot whose allocation is deferred to a decided source tensor.
#[derive(Debug, Serialize)]
pub struct DeferredEntry {
    pub computation: String,
    pub container: String,
    pub flat_index: u64,
    pub source: String,
    pub output_index: u64,
}

/// An output known to carry a layout after the pass ran.
#[derive(Debug, Serialize)]
pub struct LayoutEntry {
    pub instruction: String,
    pub output_index: u64,
    pub shape: String,
}

/// One explicit ordering edge added to the module.
#[derive(Debug, Serialize)]
pub struct OrderingEdgeEntry {
    pub before: String,
    pub after: String,
}

impl AllocationReport {
    /// Pretty-printed JSON with a trailing newline.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

// ── Construction ─────────────────────────────────────────────────────────

/// Resolve `annotations` against `module` into a sorted report.
pub fn build(module: &Module, annotations: &Annotations, source: &str) -> AllocationReport {
    let mut decisions: Vec<DecisionEntry> = annotations
        .tensor_targets
        .iter()
        .map(|(&(source, output_index), record)| DecisionEntry {
            source: module.inst(source).name.clone(),
            output_index,
            target: module.inst(record.target).name.clone(),
            operand_index: record.operand_index,
            layout_producer: module.inst(record.layout_producer).name.clone(),
            layout_output_index: record.layout_output_index,
            forward_path: names(module, &record.forward_path),
            backward_path: names(module, &record.backward_path),
        })
        .collect();
    decisions.sort_by(|a, b| {
        (a.source.as_str(), a.output_index).cmp(&(b.source.as_str(), b.output_index))
    });

    let mut deferred: Vec<DeferredEntry> = annotations
        .deferred_allocations
        .iter()
        .map(|(&(comp, container, flat_index), &(source, output_index))| DeferredEntry {
            computation: module.computation(comp).name.clone(),
            container: module.inst(container).name.clone(),
            flat_index,
            source: module.inst(source).name.clone(),
            output_index,
        })
        .collect();
    deferred.sort_by(|a, b| {
        (a.computation.as_str(), a.container.as_str(), a.flat_index).cmp(&(
            b.computation.as_str(),
            b.container.as_str(),
            b.flat_index,
        ))
    });

    let mut layouts: Vec<LayoutEntry> = annotations
        .tensors_with_layout
        .iter()
        .map(|&(id, output_index)| {
            let inst = module.inst(id);
            LayoutEntry {
                instruction: inst.name.clone(),
                output_index,
                shape: leaf_shape(&inst.shape, output_index)
                    .unwrap_or(&inst.shape)
                    .to_string(),
            }
        })
        .collect();
    layouts.sort_by(|a, b| {
        (a.instruction.as_str(), a.output_index).cmp(&(b.instruction.as_str(), b.output_index))
    });

    let mut ordering_edges: Vec<OrderingEdgeEntry> = module
        .ordering_edges()
        .into_iter()
        .map(|(before, after)| OrderingEdgeEntry {
            before: module.inst(before).name.clone(),
            after: module.inst(after).name.clone(),
        })
        .collect();
    ordering_edges
        .sort_by(|a, b| (a.before.as_str(), a.after.as_str()).cmp(&(b.before.as_str(), b.after.as_str())));

    AllocationReport {
        module: module.name.clone(),
        source_hash: source_hash(source),
        compiler_version: env!("CARGO_PKG_VERSION"),
        decisions,
        deferred,
        layouts,
        ordering_edges,
    }
}

fn names(module: &Module, ids: &[InstId]) -> Vec<String> {
    ids.iter().map(|&id| module.inst(id).name.clone()).collect()
}

/// Shape of the `flat`-th array leaf, walking nested tuples depth first.
fn leaf_shape(shape: &Shape, flat: u64) -> Option<&Shape> {
    match shape {
        Shape::Array { .. } => (flat == 0).then_some(shape),
        Shape::Tuple(elements) => {
            let mut remaining = flat;
            for element in elements {
                let leaves = element.leaf_count();
                if remaining < leaves {
                    return leaf_shape(element, remaining);
                }
                remaining -= leaves;
            }
            None
        }
    }
}

// ── Text rendering ───────────────────────────────────────────────────────

/// Plain text rendering for terminal use.
pub fn render_text(report: &AllocationReport) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "forward allocation for module '{}'", report.module);
    let _ = writeln!(out, "  source hash      {}", report.source_hash);
    let _ = writeln!(out, "  compiler version {}", report.compiler_version);
    let _ = writeln!(out);

    let _ = writeln!(out, "decisions ({})", report.decisions.len());
    for d in &report.decisions {
        let _ = writeln!(out, "  %{} output {}", d.source, d.output_index);
        let _ = writeln!(out, "    target   %{} operand {}", d.target, d.operand_index);
        let _ = writeln!(
            out,
            "    layout   %{} output {}",
            d.layout_producer, d.layout_output_index
        );
        let _ = writeln!(out, "    forward  {}", path_text(&d.forward_path));
        let _ = writeln!(out, "    backward {}", path_text(&d.backward_path));
    }

    let _ = writeln!(out, "deferred allocations ({})", report.deferred.len());
    for d in &report.deferred {
        let _ = writeln!(
            out,
            "  {}: %{} flat {} <- %{} output {}",
            d.computation, d.container, d.flat_index, d.source, d.output_index
        );
    }

    let _ = writeln!(out, "tensors with layout ({})", report.layouts.len());
    for l in &report.layouts {
        let _ = writeln!(out, "  %{} output {}  {}", l.instruction, l.output_index, l.shape);
    }

    let _ = writeln!(out, "ordering edges ({})", report.ordering_edges.len());
    for e in &report.ordering_edges {
        let _ = writeln!(out, "  %{} -> %{}", e.before, e.after);
    }
    out
}

fn path_text(path: &[String]) -> String {
    if path.is_empty() {
        return "(direct)".to_string();
    }
    path.iter()
        .map(|n| format!("%{}", n))
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ── Provenance ───────────────────────────────────────────────────────────

/// 64 character hex digest stamping the report with its exact input.
fn source_hash(source: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}
