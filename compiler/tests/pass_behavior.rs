// End-to-end behavior of the forward allocation pass over .tg sources.
//
// Each test parses a module from text, seeds fixed layouts, runs the pass
// and checks the committed decisions, the ordering edges pinning them, and
// that the graph stays acyclic throughout.

use tgc::alloc::{self, Annotations};
use tgc::diag::DiagLevel;
use tgc::forward_allocation::forward_allocate;
use tgc::id::InstId;
use tgc::ir::{detect_cycles, Module};
use tgc::parser;

// ── Test helpers ────────────────────────────────────────────────────────────

fn analyzed(source: &str) -> (Module, Annotations) {
    let result = parser::parse_module(source);
    let errors: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.level == DiagLevel::Error)
        .collect();
    assert!(errors.is_empty(), "diagnostics: {errors:?}");
    let mut module = result.module.expect("no module produced");

    let mut annotations = Annotations::new();
    alloc::seed_fixed_layouts(&module, &mut annotations);
    forward_allocate(&mut module, &mut annotations);
    assert_acyclic(&module);
    (module, annotations)
}

fn inst(module: &Module, name: &str) -> InstId {
    module
        .find_instruction(name)
        .unwrap_or_else(|| panic!("no instruction '%{name}'"))
}

fn has_ordering_edge(module: &Module, before: &str, after: &str) -> bool {
    let before = inst(module, before);
    let after = inst(module, after);
    module
        .ordering_edges()
        .iter()
        .any(|&(b, a)| b == before && a == after)
}

fn assert_acyclic(module: &Module) {
    for comp in &module.computations {
        let cycles = detect_cycles(module, comp.id);
        assert!(
            cycles.is_empty(),
            "cycles in computation '{}': {:?}",
            comp.name,
            cycles
        );
    }
}

// ── Layout sensitive mode ───────────────────────────────────────────────────

#[test]
fn bias_feeding_a_convolution_sum_is_pinned_to_the_add() {
    let (module, annotations) = analyzed(
        r#"
module convnet {
  computation main {
    %x = f32[1,8,8,4] parameter
    %w = f32[3,3,4,4] parameter
    %bias = f32[4] parameter
    %conv = f32[1,8,8,4] convolution %x, %w
    root %sum = f32[1,8,8,4] bias_add %conv, %bias
  }
}
"#,
    );

    let bias = inst(&module, "bias");
    let record = annotations.decision((bias, 0)).expect("bias undecided");
    assert_eq!(record.target, inst(&module, "sum"));
    assert_eq!(record.operand_index, 1);
    assert_eq!(record.layout_producer, inst(&module, "conv"));
    assert_eq!(record.layout_output_index, 0);
    assert!(record.forward_path.is_empty());
    assert!(record.backward_path.is_empty());

    assert!(has_ordering_edge(&module, "conv", "bias"));
    assert!(annotations.tensors_with_layout.contains(&(bias, 0)));
    assert!(annotations
        .tensors_with_layout
        .contains(&(inst(&module, "sum"), 0)));
}

#[test]
fn params_feeding_the_convolution_get_no_decision() {
    let (module, annotations) = analyzed(
        r#"
module convnet {
  computation main {
    %x = f32[1,8,8,4] parameter
    %w = f32[3,3,4,4] parameter
    %bias = f32[4] parameter
    %conv = f32[1,8,8,4] convolution %x, %w
    root %sum = f32[1,8,8,4] bias_add %conv, %bias
  }
}
"#,
    );

    assert!(annotations.decision((inst(&module, "x"), 0)).is_none());
    assert!(annotations.decision((inst(&module, "w"), 0)).is_none());
}

#[test]
fn bias_add_wins_over_norm_and_plain_add() {
    let (module, annotations) = analyzed(
        r#"
module priority {
  computation main {
    %x = f32[8,8] parameter
    %w = f32[8,8] parameter
    %a = f32[8,8] parameter
    %prod = f32[8,8] dot %x, %w
    %plain = f32[8,8] add %prod, %a
    %biased = f32[8,8] bias_add %prod, %a
    %stats = (f32[8,8], f32[8,8], f32[8,8]) norm_train %prod, %a, %a
    root %out = f32[8,8] add %plain, %biased
  }
}
"#,
    );

    let a = inst(&module, "a");
    let record = annotations.decision((a, 0)).expect("a undecided");
    assert_eq!(record.target, inst(&module, "biased"));
    assert_eq!(annotations.tensor_targets.len(), 1);

    // The producer is ordered before the source, and the chosen target
    // before the losing sibling. The norm consumer never competed for
    // the in-place slot, so no edge points at it.
    assert!(has_ordering_edge(&module, "prod", "a"));
    assert!(has_ordering_edge(&module, "biased", "plain"));
    assert!(!has_ordering_edge(&module, "biased", "stats"));
    assert_eq!(module.ordering_edges().len(), 2);
}

#[test]
fn reduce_on_the_way_to_the_target_blocks_the_decision() {
    let (module, annotations) = analyzed(
        r#"
module blocked {
  computation main {
    %x = f32[4,4] parameter
    %w = f32[4,4] parameter
    %bias = f32[4,4] parameter
    %prod = f32[4,4] dot %x, %w
    %red = f32[4] reduce %bias
    root %sum = f32[4,4] bias_add %prod, %red
  }
}
"#,
    );

    assert!(annotations.tensor_targets.is_empty(), "{annotations:?}");
    assert!(module.ordering_edges().is_empty());
}

#[test]
fn convert_on_the_way_is_traversable() {
    let (module, annotations) = analyzed(
        r#"
module converted {
  computation main {
    %x = f32[4] parameter
    %w = f32[4] parameter
    %bias = f16[4] parameter
    %conv = f32[4] convolution %x, %w
    %up = f32[4] convert %bias
    root %sum = f32[4] bias_add %conv, %up
  }
}
"#,
    );

    let bias = inst(&module, "bias");
    let record = annotations.decision((bias, 0)).expect("bias undecided");
    assert_eq!(record.target, inst(&module, "sum"));
    assert_eq!(record.backward_path, vec![inst(&module, "up")]);
    assert!(has_ordering_edge(&module, "conv", "bias"));
}

#[test]
fn forward_path_may_cross_transparent_nodes() {
    let source = r#"
module cascade {
  computation main {
    %x = f32[4] parameter
    %w = f32[4] parameter
    %bias = f32[4] parameter
    %bias2 = f32[4] parameter
    %conv = f32[4] convolution %x, %w
    %sum = f32[4] bias_add %conv, %bias
    root %sum2 = f32[4] bias_add %sum, %bias2
  }
}
"#;
    let (module, annotations) = analyzed(source);

    let bias2 = inst(&module, "bias2");
    let record = annotations.decision((bias2, 0)).expect("bias2 undecided");
    assert_eq!(record.target, inst(&module, "sum2"));
    assert_eq!(record.layout_producer, inst(&module, "conv"));
    assert_eq!(record.forward_path, vec![inst(&module, "sum")]);

    // Both tiers land in a single sweep.
    assert!(annotations
        .decision((inst(&module, "bias"), 0))
        .is_some());
    assert_eq!(annotations.tensor_targets.len(), 2);
}

#[test]
fn downstream_sibling_is_filtered_out() {
    let (module, annotations) = analyzed(
        r#"
module chained {
  computation main {
    %x = f32[4] parameter
    %w = f32[4] parameter
    %bias = f32[4] parameter
    %conv = f32[4] convolution %x, %w
    %first = f32[4] add %conv, %bias
    root %second = f32[4] multiply %first, %bias
  }
}
"#,
    );

    let bias = inst(&module, "bias");
    let record = annotations.decision((bias, 0)).expect("bias undecided");
    assert_eq!(record.target, inst(&module, "first"));
}

// ── Layout dependent mode ───────────────────────────────────────────────────

#[test]
fn norm_scale_and_offset_follow_the_activations() {
    let (module, annotations) = analyzed(
        r#"
module norms {
  computation main {
    %activ = f32[8,4] feed
    %scale = f32[4] parameter
    %offset = f32[4] parameter
    root %norm = (f32[8,4], f32[4], f32[4]) norm_train %activ, %scale, %offset
  }
}
"#,
    );

    let norm = inst(&module, "norm");
    let activ = inst(&module, "activ");

    let scale = annotations
        .decision((inst(&module, "scale"), 0))
        .expect("scale undecided");
    assert_eq!(scale.target, norm);
    assert_eq!(scale.operand_index, 1);
    assert_eq!(scale.layout_producer, activ);

    let offset = annotations
        .decision((inst(&module, "offset"), 0))
        .expect("offset undecided");
    assert_eq!(offset.target, norm);
    assert_eq!(offset.operand_index, 2);
    assert_eq!(offset.layout_producer, activ);

    assert!(annotations.decision((activ, 0)).is_none());
    assert!(has_ordering_edge(&module, "activ", "scale"));
    assert!(has_ordering_edge(&module, "activ", "offset"));
}

#[test]
fn custom_layout_pairs_drive_the_decision() {
    let (module, annotations) = analyzed(
        r#"
module custom_pool {
  computation main {
    %input = f32[8,8] feed
    %grad = f32[8,8] parameter
    root %pg = f32[8,8] custom %input, %grad, target="pool.grad", pairs={1:0}
  }
}
"#,
    );

    let grad = inst(&module, "grad");
    let record = annotations.decision((grad, 0)).expect("grad undecided");
    assert_eq!(record.target, inst(&module, "pg"));
    assert_eq!(record.operand_index, 1);
    assert_eq!(record.layout_producer, inst(&module, "input"));
    assert!(annotations.decision((inst(&module, "input"), 0)).is_none());
    assert!(has_ordering_edge(&module, "input", "grad"));
}

// ── Deferred allocation and scoping ─────────────────────────────────────────

#[test]
fn tuple_parameter_defers_allocation_to_the_leaf() {
    let (module, annotations) = analyzed(
        r#"
module tupled {
  computation main {
    %args = (f32[4], f32[4], f32[4]) parameter
    %x = f32[4] select %args, index=0
    %w = f32[4] select %args, index=1
    %bias = f32[4] select %args, index=2
    %conv = f32[4] convolution %x, %w
    root %sum = f32[4] bias_add %conv, %bias
  }
}
"#,
    );

    let args = inst(&module, "args");
    let bias = inst(&module, "bias");
    let comp = module.computations[0].id;

    let record = annotations.decision((bias, 0)).expect("bias undecided");
    assert_eq!(record.target, inst(&module, "sum"));
    assert_eq!(
        annotations.deferred_allocations.get(&(comp, args, 2)),
        Some(&(bias, 0))
    );
    assert!(annotations.decision((args, 0)).is_none());
}

#[test]
fn independent_tuple_leaves_each_get_their_own_target() {
    let (module, annotations) = analyzed(
        r#"
module twin {
  computation main {
    %args = (f32[4], f32[4]) parameter
    %left = f32[4] select %args, index=0
    %right = f32[4] select %args, index=1
    %x = f32[4] parameter
    %w = f32[4] parameter
    %x2 = f32[4] parameter
    %w2 = f32[4] parameter
    %conv1 = f32[4] convolution %x, %w
    %conv2 = f32[4] convolution %x2, %w2
    %s1 = f32[4] bias_add %conv1, %left
    %s2 = f32[4] bias_add %conv2, %right
    root %out = f32[4] add %s1, %s2
  }
}
"#,
    );

    let args = inst(&module, "args");
    let left = inst(&module, "left");
    let right = inst(&module, "right");
    let comp = module.computations[0].id;

    let lrec = annotations.decision((left, 0)).expect("left undecided");
    assert_eq!(lrec.target, inst(&module, "s1"));
    let rrec = annotations.decision((right, 0)).expect("right undecided");
    assert_eq!(rrec.target, inst(&module, "s2"));

    // Both leaves of the tuple are deferred, each to its own select.
    assert_eq!(annotations.deferred_allocations.len(), 2);
    assert_eq!(
        annotations.deferred_allocations.get(&(comp, args, 0)),
        Some(&(left, 0))
    );
    assert_eq!(
        annotations.deferred_allocations.get(&(comp, args, 1)),
        Some(&(right, 0))
    );
    assert!(has_ordering_edge(&module, "conv1", "left"));
    assert!(has_ordering_edge(&module, "conv2", "right"));
    assert!(annotations.decision((args, 0)).is_none());
}

#[test]
fn fusion_computations_are_skipped() {
    let (module, annotations) = analyzed(
        r#"
module fused {
  computation main {
    %x = f32[4] parameter
    %w = f32[4] parameter
    %bias = f32[4] parameter
    %conv = f32[4] convolution %x, %w
    root %sum = f32[4] bias_add %conv, %bias
  }
  fusion computation helper {
    %fx = f32[4] parameter
    %fw = f32[4] parameter
    %fbias = f32[4] parameter
    %fconv = f32[4] convolution %fx, %fw
    root %fsum = f32[4] bias_add %fconv, %fbias
  }
}
"#,
    );

    assert!(annotations
        .decision((inst(&module, "bias"), 0))
        .is_some());
    assert!(annotations
        .decision((inst(&module, "fbias"), 0))
        .is_none());
}

// ── Fixpoint behavior ───────────────────────────────────────────────────────

#[test]
fn second_run_reaches_fixpoint() {
    let source = r#"
module convnet {
  computation main {
    %x = f32[1,8,8,4] parameter
    %w = f32[3,3,4,4] parameter
    %bias = f32[4] parameter
    %conv = f32[1,8,8,4] convolution %x, %w
    root %sum = f32[1,8,8,4] bias_add %conv, %bias
  }
}
"#;
    let result = parser::parse_module(source);
    let mut module = result.module.expect("no module produced");
    let mut annotations = Annotations::new();
    alloc::seed_fixed_layouts(&module, &mut annotations);

    assert!(forward_allocate(&mut module, &mut annotations));
    let decisions = annotations.tensor_targets.len();
    let edges = module.ordering_edges().len();

    assert!(!forward_allocate(&mut module, &mut annotations));
    assert_eq!(annotations.tensor_targets.len(), decisions);
    assert_eq!(module.ordering_edges().len(), edges);
    assert_acyclic(&module);
}
