// Parser for .tg tile-graph source files.
//
// Parses a token stream (from the lexer) into a surface AST, then resolves
// the AST into an instruction `Module`. Uses chumsky combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; resolution
//   errors produce coded `Diagnostic`s. Both are collected, never thrown.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::id::{CompId, InstId};
use crate::ir::{BuildError, Module, ModuleBuilder, OpKind};
use crate::lexer::{self, Token};
use crate::shape::{ElementType, Shape};

// ── Surface syntax ───────────────────────────────────────────────────────
//
// The AST mirrors the text format line for line. Shapes are parsed straight
// into `shape::Shape`; everything else keeps its source span for
// diagnostics during resolution.

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: SimpleSpan,
}

/// A whole source file: one module containing computations.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub name: Ident,
    pub computations: Vec<ComputationDecl>,
    pub span: SimpleSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputationDecl {
    pub is_fusion: bool,
    pub name: Ident,
    pub instructions: Vec<InstructionDecl>,
    pub span: SimpleSpan,
}

/// One instruction line: `[root] %name = shape op items...`.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionDecl {
    pub is_root: bool,
    pub name: Ident,
    pub shape: Shape,
    pub op: Ident,
    pub operands: Vec<Ident>,
    pub attrs: Vec<Attr>,
    pub span: SimpleSpan,
}

/// A `key=value` (or bare keyword) attribute on an instruction line.
/// Operands and attributes may be interleaved; order among attributes is
/// not significant.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    Index(u64, SimpleSpan),
    Target(String, SimpleSpan),
    Pairs(Vec<(u64, u64)>, SimpleSpan),
    NoInplace(SimpleSpan),
}

/// One comma-separated item on an instruction line.
#[derive(Debug, Clone, PartialEq)]
enum Item {
    Operand(Ident),
    Attr(Attr),
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a tile-graph source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = lexer::lex(source);
    let (program, parse_errors) = run_parser(source, lex_result.tokens);

    // Merge lex errors + parse errors.
    let mut errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    errors.extend(parse_errors);

    ParseResult { program, errors }
}

/// Result of parsing and resolving: a module plus diagnostics.
#[derive(Debug)]
pub struct ModuleParseResult {
    pub module: Option<Module>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a source string and resolve it into an instruction `Module`.
///
/// `module` is `Some` only when no error-level diagnostics were produced;
/// warnings alone do not discard the module.
pub fn parse_module(source: &str) -> ModuleParseResult {
    let lex_result = lexer::lex(source);
    let mut diagnostics: Vec<Diagnostic> = lex_result
        .errors
        .iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Diagnostic::error(span, e.message.clone()).with_code(codes::E0001)
        })
        .collect();

    let (program, parse_errors) = run_parser(source, lex_result.tokens);
    diagnostics.extend(
        parse_errors
            .iter()
            .map(|e| Diagnostic::error(*e.span(), e.to_string()).with_code(codes::E0010)),
    );

    let module = program.as_ref().map(|prog| {
        let resolver = Resolver::new(&prog.name.name, &mut diagnostics);
        resolver.run(prog)
    });

    let failed = diagnostics.iter().any(|d| d.level == DiagLevel::Error);
    ModuleParseResult {
        module: if failed { None } else { module },
        diagnostics,
    }
}

/// Run the chumsky parser over a pre-lexed token stream.
fn run_parser(
    source: &str,
    tokens: Vec<(Token, lexer::Span)>,
) -> (Option<Program>, Vec<Rich<'static, Token, SimpleSpan>>) {
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, errors) = parser.parse(stream).into_output_errors();
    let errors = errors.into_iter().map(|e| e.into_owned()).collect();
    (program, errors)
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Integer ──

    let int = select! { Token::Int(n) => n };

    // ── Shape: etype '[' dims? ']' | '(' shape (',' shape)* ')' ──

    let element_type = select! {
        Token::F32 => ElementType::F32,
        Token::F16 => ElementType::F16,
        Token::S32 => ElementType::S32,
        Token::U32 => ElementType::U32,
        Token::Pred => ElementType::Pred,
    };

    let shape = recursive(|shape| {
        let dims = int
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket));

        let array = element_type
            .clone()
            .then(dims)
            .map(|(ty, dims)| Shape::Array { ty, dims });

        let tuple = shape
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(Shape::Tuple);

        array.or(tuple)
    });

    // ── Operand: '%' IDENT ──

    let operand = just(Token::Percent).ignore_then(ident.clone());

    // ── Attributes ──

    let index_attr = just(Token::Index)
        .ignore_then(just(Token::Equals))
        .ignore_then(int.clone())
        .map_with(|n, e| Attr::Index(n, e.span()));

    let target_attr = just(Token::Target)
        .ignore_then(just(Token::Equals))
        .ignore_then(select! { Token::StringLit(s) => s })
        .map_with(|s, e| Attr::Target(s, e.span()));

    let pair = int
        .clone()
        .then_ignore(just(Token::Colon))
        .then(int.clone());

    let pairs_attr = just(Token::Pairs)
        .ignore_then(just(Token::Equals))
        .ignore_then(
            pair.separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|pairs, e| Attr::Pairs(pairs, e.span()));

    let noinplace_attr = just(Token::NoInplace).map_with(|_, e| Attr::NoInplace(e.span()));

    // ── Instruction line ──

    let item = operand.clone().map(Item::Operand).or(choice((
        index_attr,
        target_attr,
        pairs_attr,
        noinplace_attr,
    ))
    .map(Item::Attr));

    let instruction = just(Token::Root)
        .or_not()
        .then_ignore(just(Token::Percent))
        .then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(shape)
        .then(ident.clone())
        .then(item.separated_by(just(Token::Comma)).collect::<Vec<_>>())
        .map_with(|((((root, name), shape), op), items), e| {
            let mut operands = Vec::new();
            let mut attrs = Vec::new();
            for item in items {
                match item {
                    Item::Operand(id) => operands.push(id),
                    Item::Attr(a) => attrs.push(a),
                }
            }
            InstructionDecl {
                is_root: root.is_some(),
                name,
                shape,
                op,
                operands,
                attrs,
                span: e.span(),
            }
        });

    // ── Computation: ['fusion'] 'computation' IDENT '{' lines '}' ──

    let instruction_body = nl
        .clone()
        .ignore_then(
            instruction
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone());

    let computation = just(Token::Fusion)
        .or_not()
        .then_ignore(just(Token::Computation))
        .then(ident.clone())
        .then(instruction_body.delimited_by(just(Token::LBrace), just(Token::RBrace)))
        .map_with(|((fusion, name), instructions), e| ComputationDecl {
            is_fusion: fusion.is_some(),
            name,
            instructions,
            span: e.span(),
        });

    // ── Module ──

    let computation_list = nl
        .clone()
        .ignore_then(
            computation
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone());

    nl.clone()
        .ignore_then(just(Token::Module))
        .ignore_then(ident)
        .then(computation_list.delimited_by(just(Token::LBrace), just(Token::RBrace)))
        .then_ignore(nl)
        .map_with(|(name, computations), e| Program {
            name,
            computations,
            span: e.span(),
        })
}

// ── Module resolution ────────────────────────────────────────────────────
//
// Lowers the AST into a `Module` through `ModuleBuilder`, reporting every
// violation as a coded diagnostic. Resolution recovers per instruction: a
// line that fails is skipped and its name poisoned, so later references to
// it are dropped silently instead of cascading.

struct Resolver<'d> {
    builder: ModuleBuilder,
    /// Instruction name → (id, owning computation, definition span).
    names: HashMap<String, (InstId, CompId, SimpleSpan)>,
    comp_names: HashMap<String, SimpleSpan>,
    /// Declared names that failed to resolve.
    poisoned: HashSet<String>,
    diagnostics: &'d mut Vec<Diagnostic>,
}

/// Collected attributes of one instruction line, first occurrence wins.
#[derive(Default)]
struct InstAttrs {
    index: Option<(u64, SimpleSpan)>,
    target: Option<(String, SimpleSpan)>,
    pairs: Option<(Vec<(u64, u64)>, SimpleSpan)>,
    noinplace: bool,
}

/// Operand count bounds for a mnemonic, `usize::MAX` meaning unbounded.
/// `None` for unknown mnemonics.
fn operand_arity(op: &str) -> Option<(usize, usize)> {
    Some(match op {
        "parameter" | "constant" | "feed" => (0, 0),
        "tuple" => (1, usize::MAX),
        "select" | "negate" | "exp" | "log" | "tanh" | "abs" | "convert" | "reshape"
        | "transpose" | "reduce" => (1, 1),
        "add" | "subtract" | "multiply" | "divide" | "maximum" | "minimum" | "bias_add"
        | "convolution" | "dot" => (2, 2),
        "scaled_add" => (2, 3),
        "norm_train" => (3, 3),
        "norm_inference" => (5, 5),
        "custom" => (0, usize::MAX),
        _ => return None,
    })
}

fn arity_label(min: usize, max: usize) -> String {
    if min == max {
        format!("exactly {min}")
    } else if max == usize::MAX {
        format!("at least {min}")
    } else {
        format!("{min} to {max}")
    }
}

/// Op kinds with no attribute payload. `select` and `custom` are handled
/// separately.
fn simple_op_kind(op: &str) -> Option<OpKind> {
    Some(match op {
        "parameter" => OpKind::Parameter,
        "constant" => OpKind::Constant,
        "feed" => OpKind::Feed,
        "tuple" => OpKind::Tuple,
        "add" => OpKind::Add,
        "subtract" => OpKind::Subtract,
        "multiply" => OpKind::Multiply,
        "divide" => OpKind::Divide,
        "maximum" => OpKind::Maximum,
        "minimum" => OpKind::Minimum,
        "bias_add" => OpKind::BiasAdd,
        "scaled_add" => OpKind::ScaledAdd,
        "negate" => OpKind::Negate,
        "exp" => OpKind::Exponential,
        "log" => OpKind::Log,
        "tanh" => OpKind::Tanh,
        "abs" => OpKind::Abs,
        "convert" => OpKind::Convert,
        "reshape" => OpKind::Reshape,
        "transpose" => OpKind::Transpose,
        "reduce" => OpKind::Reduce,
        "convolution" => OpKind::Convolution,
        "dot" => OpKind::Dot,
        "norm_train" => OpKind::NormTrain,
        "norm_inference" => OpKind::NormInference,
        _ => return None,
    })
}

impl<'d> Resolver<'d> {
    fn new(module_name: &str, diagnostics: &'d mut Vec<Diagnostic>) -> Self {
        Resolver {
            builder: ModuleBuilder::new(module_name),
            names: HashMap::new(),
            comp_names: HashMap::new(),
            poisoned: HashSet::new(),
            diagnostics,
        }
    }

    fn run(mut self, program: &Program) -> Module {
        for comp in &program.computations {
            self.computation(comp);
        }
        self.builder.finish()
    }

    fn computation(&mut self, decl: &ComputationDecl) {
        if let Some(&first) = self.comp_names.get(&decl.name.name) {
            self.diagnostics.push(
                Diagnostic::error(
                    decl.name.span,
                    format!("duplicate computation name '{}'", decl.name.name),
                )
                .with_code(codes::E0100)
                .with_related(first, "first defined here"),
            );
            return;
        }
        self.comp_names
            .insert(decl.name.name.clone(), decl.name.span);

        let comp = match self
            .builder
            .begin_computation(&decl.name.name, decl.is_fusion)
        {
            Ok(id) => id,
            Err(_) => return,
        };

        let mut root: Option<(InstId, SimpleSpan)> = None;
        for inst in &decl.instructions {
            let Some(id) = self.instruction(comp, inst) else {
                continue;
            };
            if inst.is_root {
                match root {
                    Some((_, first)) => self.diagnostics.push(
                        Diagnostic::error(
                            inst.name.span,
                            format!("multiple root markers in computation '{}'", decl.name.name),
                        )
                        .with_code(codes::E0108)
                        .with_related(first, "first root marker here"),
                    ),
                    None => root = Some((id, inst.name.span)),
                }
            }
        }

        match self.builder.finish_computation(root.map(|(id, _)| id)) {
            Ok(_) => {}
            Err(BuildError::EmptyComputation(name)) => {
                // Only report when the source truly had no lines; a body
                // whose every line failed already carries its own errors.
                if decl.instructions.is_empty() {
                    self.diagnostics.push(
                        Diagnostic::error(
                            decl.name.span,
                            format!("computation '{name}' has no instructions"),
                        )
                        .with_code(codes::E0107),
                    );
                }
            }
            Err(_) => {}
        }
    }

    fn instruction(&mut self, comp: CompId, decl: &InstructionDecl) -> Option<InstId> {
        let name = &decl.name.name;
        if let Some(&(_, _, first)) = self.names.get(name) {
            // The first definition stays resolvable; only report here.
            self.diagnostics.push(
                Diagnostic::error(decl.name.span, format!("duplicate name '%{name}'"))
                    .with_code(codes::E0100)
                    .with_related(first, "first defined here"),
            );
            return None;
        }

        match self.try_instruction(comp, decl) {
            Some(id) => {
                self.names.insert(name.clone(), (id, comp, decl.name.span));
                Some(id)
            }
            None => {
                self.poisoned.insert(name.clone());
                None
            }
        }
    }

    fn try_instruction(&mut self, comp: CompId, decl: &InstructionDecl) -> Option<InstId> {
        let operands = self.operands(comp, decl)?;
        let attrs = self.attributes(decl);

        let op = decl.op.name.as_str();
        let Some((min, max)) = operand_arity(op) else {
            self.diagnostics.push(
                Diagnostic::error(decl.op.span, format!("unknown operation '{op}'"))
                    .with_code(codes::E0102),
            );
            return None;
        };
        if operands.len() < min || operands.len() > max {
            self.diagnostics.push(
                Diagnostic::error(
                    decl.op.span,
                    format!(
                        "'{op}' expects {} operand{}, found {}",
                        arity_label(min, max),
                        if max == 1 { "" } else { "s" },
                        operands.len()
                    ),
                )
                .with_code(codes::E0105),
            );
            return None;
        }

        self.check_attr_placement(op, &attrs);

        let built = match op {
            "select" => {
                let Some((index, index_span)) = attrs.index else {
                    self.diagnostics.push(
                        Diagnostic::error(decl.op.span, "select requires an index attribute")
                            .with_code(codes::E0106)
                            .with_hint("write select %tuple, index=N"),
                    );
                    return None;
                };
                match self
                    .builder
                    .select(&decl.name.name, operands[0], index as usize)
                {
                    Err(BuildError::NotATuple(_)) => {
                        self.diagnostics.push(
                            Diagnostic::error(
                                decl.operands[0].span,
                                format!("'%{}' is not a tuple", decl.operands[0].name),
                            )
                            .with_code(codes::E0103),
                        );
                        return None;
                    }
                    Err(BuildError::SelectIndexOutOfRange { index, .. }) => {
                        self.diagnostics.push(
                            Diagnostic::error(
                                index_span,
                                format!(
                                    "select index {index} is out of range for '%{}'",
                                    decl.operands[0].name
                                ),
                            )
                            .with_code(codes::E0104),
                        );
                        return None;
                    }
                    other => other,
                }
            }
            "custom" => {
                let Some((target, _)) = attrs.target.clone() else {
                    self.diagnostics.push(
                        Diagnostic::error(decl.op.span, "custom requires a target attribute")
                            .with_code(codes::E0106)
                            .with_hint(r#"write custom %a, %b, target="library.op""#),
                    );
                    return None;
                };
                let pairs = self.layout_pairs(decl, &operands, &attrs)?;
                self.builder.custom(
                    &decl.name.name,
                    &target,
                    decl.shape.clone(),
                    &operands,
                    pairs,
                )
            }
            _ => {
                let Some(kind) = simple_op_kind(op) else {
                    debug_assert!(false, "mnemonic '{op}' has arity but no kind");
                    return None;
                };
                self.builder
                    .add(&decl.name.name, kind, decl.shape.clone(), &operands)
            }
        };

        match built {
            Ok(id) => {
                if attrs.noinplace {
                    self.builder.set_in_place(id, false);
                }
                Some(id)
            }
            Err(err) => {
                self.build_error(decl, err);
                None
            }
        }
    }

    fn operands(&mut self, comp: CompId, decl: &InstructionDecl) -> Option<Vec<InstId>> {
        let mut ids = Vec::with_capacity(decl.operands.len());
        let mut failed = false;
        for operand in &decl.operands {
            match self.names.get(&operand.name) {
                Some(&(id, owner, def_span)) => {
                    if owner == comp {
                        ids.push(id);
                    } else {
                        self.diagnostics.push(
                            Diagnostic::error(
                                operand.span,
                                format!(
                                    "operand '%{}' is defined in a different computation",
                                    operand.name
                                ),
                            )
                            .with_code(codes::E0101)
                            .with_related(def_span, "defined here"),
                        );
                        failed = true;
                    }
                }
                None => {
                    if !self.poisoned.contains(&operand.name) {
                        self.diagnostics.push(
                            Diagnostic::error(
                                operand.span,
                                format!("unknown operand '%{}'", operand.name),
                            )
                            .with_code(codes::E0101),
                        );
                    }
                    failed = true;
                }
            }
        }
        (!failed).then_some(ids)
    }

    fn attributes(&mut self, decl: &InstructionDecl) -> InstAttrs {
        let mut out = InstAttrs::default();
        for attr in &decl.attrs {
            match attr {
                Attr::Index(value, span) => {
                    if out.index.is_some() {
                        self.duplicate_attr("index", *span);
                    } else {
                        out.index = Some((*value, *span));
                    }
                }
                Attr::Target(value, span) => {
                    if out.target.is_some() {
                        self.duplicate_attr("target", *span);
                    } else {
                        out.target = Some((value.clone(), *span));
                    }
                }
                Attr::Pairs(value, span) => {
                    if out.pairs.is_some() {
                        self.duplicate_attr("pairs", *span);
                    } else {
                        out.pairs = Some((value.clone(), *span));
                    }
                }
                Attr::NoInplace(_) => out.noinplace = true,
            }
        }
        out
    }

    /// Convert declared layout pairs to operand indices, or warn when a
    /// custom op declares none.
    fn layout_pairs(
        &mut self,
        decl: &InstructionDecl,
        operands: &[InstId],
        attrs: &InstAttrs,
    ) -> Option<Vec<(usize, usize)>> {
        let (pairs, span) = match &attrs.pairs {
            Some((pairs, span)) if !pairs.is_empty() => (pairs, *span),
            _ => {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagLevel::Warning,
                        decl.op.span,
                        format!(
                            "custom operation '%{}' declares no layout pairs",
                            decl.name.name
                        ),
                    )
                    .with_code(codes::W0001)
                    .with_hint(
                        "operands that must match another operand's layout are declared \
                         with pairs={operand:layout, ...}",
                    ),
                );
                return Some(Vec::new());
            }
        };

        let mut out = Vec::with_capacity(pairs.len());
        for &(i, j) in pairs {
            if i as usize >= operands.len() || j as usize >= operands.len() {
                self.diagnostics.push(
                    Diagnostic::error(
                        span,
                        format!(
                            "layout pair {i}:{j} references a missing operand ('%{}' has {})",
                            decl.name.name,
                            operands.len()
                        ),
                    )
                    .with_code(codes::E0106),
                );
                return None;
            }
            out.push((i as usize, j as usize));
        }
        Some(out)
    }

    fn check_attr_placement(&mut self, op: &str, attrs: &InstAttrs) {
        if op != "select" {
            if let Some((_, span)) = attrs.index {
                self.misplaced_attr("index", "select", span);
            }
        }
        if op != "custom" {
            if let Some((_, span)) = &attrs.target {
                self.misplaced_attr("target", "custom", *span);
            }
            if let Some((_, span)) = &attrs.pairs {
                self.misplaced_attr("pairs", "custom", *span);
            }
        }
    }

    fn misplaced_attr(&mut self, attr: &str, wanted: &str, span: SimpleSpan) {
        self.diagnostics.push(
            Diagnostic::error(
                span,
                format!("'{attr}' is only valid on {wanted} operations"),
            )
            .with_code(codes::E0106),
        );
    }

    fn duplicate_attr(&mut self, attr: &str, span: SimpleSpan) {
        self.diagnostics.push(
            Diagnostic::error(span, format!("duplicate '{attr}' attribute"))
                .with_code(codes::E0106),
        );
    }

    fn build_error(&mut self, decl: &InstructionDecl, err: BuildError) {
        let operand_span = decl.operands.first().map(|o| o.span).unwrap_or(decl.span);
        let diag = match err {
            BuildError::DuplicateName(name) => {
                Diagnostic::error(decl.name.span, format!("duplicate name '%{name}'"))
                    .with_code(codes::E0100)
            }
            BuildError::OperandOutsideComputation(_) => Diagnostic::error(
                operand_span,
                "operand is defined in a different computation",
            )
            .with_code(codes::E0101),
            BuildError::NotATuple(_) => Diagnostic::error(
                operand_span,
                format!(
                    "'%{}' is not a tuple",
                    decl.operands
                        .first()
                        .map(|o| o.name.as_str())
                        .unwrap_or("?")
                ),
            )
            .with_code(codes::E0103),
            BuildError::SelectIndexOutOfRange { index, .. } => {
                Diagnostic::error(decl.span, format!("select index {index} is out of range"))
                    .with_code(codes::E0104)
            }
            BuildError::EmptyComputation(_) | BuildError::NoOpenComputation => {
                Diagnostic::error(decl.span, err.to_string())
            }
        };
        self.diagnostics.push(diag);
    }
}

// ── Tests ──
