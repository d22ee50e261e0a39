use clap::Parser;
use std::path::{Path, PathBuf};

use tgc::alloc::Annotations;
use tgc::diag::Diagnostic;
use tgc::{alloc, dot, forward_allocation, lexer, parser, report};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Alloc,
    Json,
    Dot,
    Ast,
    Tokens,
}

#[derive(Parser, Debug)]
#[command(
    name = "tgc",
    version,
    about = "Tile Graph Compiler - forward allocation analysis for .tg instruction graphs"
)]
struct Cli {
    /// Input .tg source file
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Alloc)]
    emit: EmitStage,

    /// Re-run the pass until it commits no further decisions
    #[arg(long)]
    iterate: bool,

    /// Print compiler phases and progress
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("tgc: source = {}", cli.source.display());
        eprintln!("tgc: emit   = {:?}", cli.emit);
    }

    // ── Read source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("tgc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    // Token and AST stages stop before resolution.
    match cli.emit {
        EmitStage::Tokens => {
            let out = render_tokens(&source, &cli.source);
            write_output(cli.output.as_deref(), &out);
            return;
        }
        EmitStage::Ast => {
            let out = render_ast(&source);
            write_output(cli.output.as_deref(), &out);
            return;
        }
        EmitStage::Alloc | EmitStage::Json | EmitStage::Dot => {}
    }

    // ── Parse and resolve ──
    let result = parser::parse_module(&source);
    report_diagnostics(&source, &cli.source, &result.diagnostics);
    let mut module = match result.module {
        Some(m) => m,
        None => std::process::exit(1),
    };

    if cli.verbose {
        eprintln!(
            "tgc: parsed module '{}': {} computations, {} instructions",
            module.name,
            module.computations.len(),
            module.inst_count(),
        );
    }

    // ── Forward allocation ──
    let mut annotations = Annotations::new();
    alloc::seed_fixed_layouts(&module, &mut annotations);
    let mut iteration = 0u32;
    loop {
        let progress = forward_allocation::forward_allocate(&mut module, &mut annotations);
        iteration += 1;
        if cli.verbose {
            eprintln!(
                "tgc: iteration {}: {} decisions, {} ordering edges",
                iteration,
                annotations.tensor_targets.len(),
                module.ordering_edges().len(),
            );
        }
        if !(cli.iterate && progress) {
            break;
        }
    }

    // ── Emit ──
    let rendered = match cli.emit {
        EmitStage::Json => match report::build(&module, &annotations, &source).to_json() {
            Ok(json) => json,
            Err(e) => {
                eprintln!("tgc: error: {}", e);
                std::process::exit(2);
            }
        },
        EmitStage::Dot => dot::emit_dot(&module),
        _ => report::render_text(&report::build(&module, &annotations, &source)),
    };
    write_output(cli.output.as_deref(), &rendered);
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn render_tokens(source: &str, path: &Path) -> String {
    let lexed = lexer::lex(source);
    if !lexed.errors.is_empty() {
        for err in &lexed.errors {
            let (line, col) = line_col(source, err.span.start);
            eprintln!(
                "tgc: {}:{}:{}: error: {}",
                path.display(),
                line,
                col,
                err.message
            );
        }
        std::process::exit(1);
    }
    let mut out = String::new();
    for (token, span) in &lexed.tokens {
        out.push_str(&format!("{:>5}..{:<5} {:?}\n", span.start, span.end, token));
    }
    out
}

fn render_ast(source: &str) -> String {
    let result = parser::parse(source);
    if !result.errors.is_empty() {
        for err in &result.errors {
            eprintln!("tgc: parse error: {}", err);
        }
        std::process::exit(1);
    }
    match result.program {
        Some(program) => format!("{program:#?}\n"),
        None => {
            eprintln!("tgc: parse failed with no output");
            std::process::exit(1);
        }
    }
}

fn report_diagnostics(source: &str, path: &Path, diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        let (line, col) = line_col(source, diag.span.start);
        eprintln!("tgc: {}:{}:{}: {}", path.display(), line, col, diag);
        for related in &diag.related_spans {
            let (line, col) = line_col(source, related.span.start);
            eprintln!(
                "tgc: {}:{}:{}: note: {}",
                path.display(),
                line,
                col,
                related.label
            );
        }
    }
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, c) in source.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn write_output(path: Option<&Path>, contents: &str) {
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, contents) {
                eprintln!("tgc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{contents}"),
    }
}
