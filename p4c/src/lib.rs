//! One-pass recursive-descent compiler for the P4 Pascal dialect (spec
//! §4.1-§4.4): lexer, symbol/type tables, recursive-descent parser with
//! semantic analysis, and a textual P-code emitter, matching the
//! teacher's `p4vm`/`p4asm` split of lexing+parsing from assembly.
//!
//! [`Parser::compile`] is the single entry point: it consumes a whole
//! source string and returns the emitted P-code text alongside every
//! diagnostic raised along the way (spec §7 — compile-time diagnostics
//! are accumulated, never fatal).

pub mod attr;
pub mod diagnostics;
pub mod display;
pub mod emitter;
pub mod idents;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod types;

pub use diagnostics::{Code, Diagnostic};
pub use parser::Parser;

/// Compiles `source`, returning the emitted P-code text and any
/// diagnostics raised. The text is produced even when diagnostics are
/// non-empty (spec §7: compile errors resync and continue); callers
/// decide whether a non-empty diagnostic list should suppress emission.
pub fn compile(source: &str) -> (String, Vec<Diagnostic>) {
    Parser::new(source).compile()
}
