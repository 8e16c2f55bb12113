//! Assembler/loader for the textual P-code emitted by `p4c` (spec §4.5).
//!
//! [`assemble`] parses a P-code program with a [pest]-generated grammar,
//! then runs the line AST through [`assemble::run_pass`] twice over the
//! same label table: forward references thread through instruction
//! operand fields on the first pass and resolve immediately by the
//! second, matching the original two-pass assembler's rewind-and-rescan
//! structure. The result is a packed `p4vm::Code` plus the populated
//! interned-constant pools of a `p4vm::Store`, ready for `p4vm::Machine`.
//!
//! [pest]: https://docs.rs/pest/

mod assemble;
mod ast;
pub mod error;
mod labels;
mod parser;

#[cfg(test)]
mod test;

pub use error::{Error, Result};
pub use labels::{LabelError, LabelState, LabelTable};

use p4vm::{Code, Store};
use parser::{Rule, P4Parser};
use pest::Parser;

/// An assembled program: packed code plus the constant pools its
/// instructions reference.
pub struct Assembled {
    pub code: Code,
    pub store: Store,
    /// First unused instruction slot; every slot in `[BEGINCODE, end_pc)`
    /// was written by a pass. Lets a loader serialize only the code
    /// actually emitted instead of the full fixed-size code segment.
    pub end_pc: usize,
}

fn parse(source: &str) -> Result<Vec<ast::Line>> {
    let mut pairs = P4Parser::parse(Rule::program, source)?;
    let program = pairs.next().unwrap();
    Ok(ast::parse_program(program))
}

/// Assembles a full P-code program (spec §4.5). Runs two passes over the
/// same parsed line list sharing one label table, returning an error on
/// the first fatal condition (illegal mnemonic, pool overflow, duplicate
/// or dangling label).
pub fn assemble(source: &str) -> Result<Assembled> {
    let lines = parse(source)?;

    let mut code = Code::new();
    let mut store = Store::new();
    let mut labels = LabelTable::new();

    log::debug!("assembler pass 1: {} lines", lines.len());
    assemble::run_pass(&lines, &mut code, &mut store, &mut labels)?;

    log::debug!("assembler pass 2 (rewind)");
    let end_pc = assemble::run_pass(&lines, &mut code, &mut store, &mut labels)?;

    if let Some(label) = labels.entered_labels().into_iter().next() {
        return Err(Error::UnresolvedLabel(label));
    }

    Ok(Assembled { code, store, end_pc })
}
