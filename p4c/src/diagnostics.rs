//! Compile-time diagnostics (spec §7): non-fatal, accumulated as
//! `(line, code, message)` triples while the parser resynchronises via
//! `skip(follow)` rather than unwinding.

use std::fmt;

/// A subset of the original's numeric diagnostic space big enough to
/// cover every code this compiler actually raises; see spec §7 for the
/// full taxonomy (1..99 syntactic, 100..199 semantic, 250..499 internal
/// limits).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Code {
    SyntaxError = 1,
    IdentExpected = 2,
    EqExpected = 3,
    SemicolonExpected = 14,
    PeriodExpected = 19,
    BecomesExpected = 51,
    ColonExpected = 5,
    OfExpected = 8,
    DoExpected = 54,
    ThenExpected = 52,
    EndExpected = 17,
    LParenExpected = 9,
    RParenExpected = 4,
    IllegalCharacter = 399,
    DuplicateIdent = 101,
    UndeclaredIdent = 104,
    NotAType = 110,
    NotAVariable = 111,
    NotAConst = 112,
    NotAProcOrFunc = 113,
    TypeConflict = 129,
    AssignmentIncompatible = 129,
    NotOrdinal = 148,
    BadSubrangeBounds = 149,
    IndexNotOrdinal = 140,
    WrongParamCount = 134,
    UnresolvedForwardPointer = 117,
    LabelUndefined = 168,
    TooDeeplyNested = 250,
    TableOverflow = 254,
    Unimplemented = 399,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Code::SyntaxError => "syntax error",
            Code::IdentExpected => "identifier expected",
            Code::EqExpected => "'=' expected",
            Code::SemicolonExpected => "';' expected",
            Code::PeriodExpected => "'.' expected",
            Code::BecomesExpected => "':=' expected",
            Code::ColonExpected => "':' expected",
            Code::OfExpected => "'of' expected",
            Code::DoExpected => "'do' expected",
            Code::ThenExpected => "'then' expected",
            Code::EndExpected => "'end' expected",
            Code::LParenExpected => "'(' expected",
            Code::RParenExpected => "')' expected",
            Code::IllegalCharacter => "illegal character",
            Code::DuplicateIdent => "identifier declared twice",
            Code::UndeclaredIdent => "undeclared identifier",
            Code::NotAType => "not a type identifier",
            Code::NotAVariable => "not a variable",
            Code::NotAConst => "not a constant identifier",
            Code::NotAProcOrFunc => "not a procedure or function identifier",
            Code::TypeConflict => "type conflict",
            Code::NotOrdinal => "ordinal type required here",
            Code::BadSubrangeBounds => "lower bound exceeds upper bound",
            Code::IndexNotOrdinal => "index type must be ordinal and not full integer range",
            Code::WrongParamCount => "parameter count or type mismatch",
            Code::UnresolvedForwardPointer => "forward-referenced pointer type never declared",
            Code::LabelUndefined => "label used in goto but never defined",
            Code::TooDeeplyNested => "nesting too deep",
            Code::TableOverflow => "compiler table overflow",
            Code::Unimplemented => "unimplemented feature",
        };
        write!(f, "{}", text)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub line: u32,
    pub code: Code,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "line {}: ^{} {}", self.line, self.code as u16, self.code)
        } else {
            write!(f, "line {}: ^{} {}: {}", self.line, self.code as u16, self.code, self.detail)
        }
    }
}

#[derive(Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn push(&mut self, line: u32, code: Code, detail: impl Into<String>) {
        log::debug!("diagnostic {:?} at line {}", code, line);
        self.items.push(Diagnostic {
            line,
            code,
            detail: detail.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}
