//! Fatal VM conditions and the error type surfaced by the interpreter loop.

use std::error::Error as StdError;
use std::fmt;

/// Reason the interpreter stopped. `Halted` is the only non-error outcome.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ExitCode {
    Halted,
    StackOverflow,
    HeapStackCollision,
    RangeCheck,
    PointerCheck,
    DivisionByZero,
    NilDereference,
    EofOnWrongFile,
    InvalidOpcode(u8),
    BadJump,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Loaded code word count did not make a whole number of instruction slots.
    InvalidProgram(usize),
    /// Fatal condition reached during interpretation, carrying the slot at
    /// which it was detected.
    Fault(ExitCode, usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidProgram(len) => write!(f, "invalid program: {} instructions", len),
            Error::Fault(code, pc) => write!(f, "ERROR op: {:?} at pc={}", code, pc),
        }
    }
}

impl StdError for Error {}
