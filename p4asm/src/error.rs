//! Assembler errors. Unlike the compiler's diagnostics these are fatal:
//! the first one found aborts assembly (spec §4.5/§7).

use crate::parser::Rule;
use pest::error::Error as PestError;
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum PoolKind {
    Integer,
    Real,
    Set,
    Boundary,
    Multiple,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PoolKind::Integer => "integer",
            PoolKind::Real => "real",
            PoolKind::Set => "set",
            PoolKind::Boundary => "boundary",
            PoolKind::Multiple => "multiple",
        };
        write!(f, "{} table overflow", name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    Syntax(Box<PestError<Rule>>),
    IllegalInstruction(String),
    IllegalStandardProcedure(String),
    DuplicateLabel(u32),
    UnresolvedLabel(u32),
    PoolOverflow(PoolKind),
    StringTooLong(String),
}

impl From<PestError<Rule>> for Error {
    fn from(err: PestError<Rule>) -> Error {
        Error::Syntax(Box::new(err))
    }
}

impl From<crate::labels::LabelError> for Error {
    fn from(err: crate::labels::LabelError) -> Error {
        match err {
            crate::labels::LabelError::DuplicateLabel(label) => Error::DuplicateLabel(label),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Syntax(err) => write!(f, "{}", err),
            Error::IllegalInstruction(name) => write!(f, "illegal instruction \"{}\"", name),
            Error::IllegalStandardProcedure(name) => {
                write!(f, "illegal standard procedure \"{}\"", name)
            }
            Error::DuplicateLabel(label) => write!(f, "duplicated label {}", label),
            Error::UnresolvedLabel(label) => write!(f, "label {} never defined", label),
            Error::PoolOverflow(kind) => write!(f, "{}", kind),
            Error::StringTooLong(value) => {
                write!(f, "string literal '{}' exceeds 16 characters", value)
            }
        }
    }
}

impl StdError for Error {}

pub type Result<T> = std::result::Result<T, Error>;
