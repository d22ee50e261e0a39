// Lexer for .tg tile-graph source files.
//
// Tokenizes a textual instruction module. Uses the `logos` crate for
// DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Tile-graph token types.
///
/// Keywords, element types and symbols are matched as fixed strings.
/// Literals carry parsed values. Identifiers carry no value — use the span
/// to retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("module")]
    Module,
    #[token("computation")]
    Computation,
    #[token("fusion")]
    Fusion,
    #[token("root")]
    Root,
    #[token("noinplace")]
    NoInplace,
    #[token("index")]
    Index,
    #[token("target")]
    Target,
    #[token("pairs")]
    Pairs,

    // ── Element types ──
    #[token("f32")]
    F32,
    #[token("f16")]
    F16,
    #[token("s32")]
    S32,
    #[token("u32")]
    U32,
    #[token("pred")]
    Pred,

    // ── Symbols ──
    #[token("%")]
    Percent,
    #[token("=")]
    Equals,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,

    // ── Literals ──
    /// Unsigned integer literal (dimension, tuple index, layout pair).
    #[regex(r"[0-9]+", parse_int)]
    Int(u64),

    /// String literal with `\"` and `\\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    // ── Identifier ──
    //
    // Placed after keywords — logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `root` matches Root, not Ident.
    // Dots are allowed so pass-generated names like `conv.36.29` survive a
    // round trip through the printer.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_.]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (significant — instruction terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Module => write!(f, "module"),
            Token::Computation => write!(f, "computation"),
            Token::Fusion => write!(f, "fusion"),
            Token::Root => write!(f, "root"),
            Token::NoInplace => write!(f, "noinplace"),
            Token::Index => write!(f, "index"),
            Token::Target => write!(f, "target"),
            Token::Pairs => write!(f, "pairs"),
            Token::F32 => write!(f, "f32"),
            Token::F16 => write!(f, "f16"),
            Token::S32 => write!(f, "s32"),
            Token::U32 => write!(f, "u32"),
            Token::Pred => write!(f, "pred"),
            Token::Percent => write!(f, "%"),
            Token::Equals => write!(f, "="),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Int(v) => write!(f, "{v}"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                _ => {
                    // Only \" and \\ are supported. Reject unknown escapes.
                    return None;
                }
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex a tile-graph source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
