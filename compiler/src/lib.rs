// tgc — Tile Graph Compiler
//
// Library root. The forward allocation pass and the phases feeding it
// live here as modules.

pub mod alloc;
pub mod classify;
pub mod deferred;
pub mod diag;
pub mod dot;
pub mod forward_allocation;
pub mod graph_view;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod reachability;
pub mod report;
pub mod shape;
