//! Identifier descriptors (spec §3): a tagged variant over
//! `type | const | var | field | proc | func`, each carrying
//! class-specific attributes.

use crate::types::TypeId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VarKind {
    Actual,
    Formal,
}

#[derive(Clone, Copy, Debug)]
pub enum ConstValue {
    Int(i64),
    Real(f64),
    Bool(bool),
    Char(char),
}

/// Standard-procedure/function key, used when a `proc`/`func` identifier
/// is a built-in rather than user-declared (spec §3's "standard-key").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StdKey {
    Abs,
    Sqr,
    Odd,
    Succ,
    Pred,
    Chr,
    Ord,
    Trunc,
    Round,
    Sin,
    Cos,
    Exp,
    Ln,
    Sqrt,
    ArcTan,
    Eof,
    Eoln,
    Read,
    ReadLn,
    Write,
    WriteLn,
    Pack,
    Unpack,
    New,
    Page,
    Get,
    Put,
    Reset,
    Rewrite,
    Mark,
    Release,
}

#[derive(Clone, Debug)]
pub enum DeclKind {
    Standard(StdKey),
    Declared {
        level: u8,
        /// `None` until the body has been emitted and a label assigned.
        label: Option<u32>,
        forward: bool,
    },
}

#[derive(Clone, Debug)]
pub struct Routine {
    pub decl: DeclKind,
    /// Parameter identifiers in declaration order (threaded in reverse
    /// while parsing, then reversed — spec §4.3).
    pub params: Vec<IdentId>,
    pub result: Option<TypeId>,
}

impl Routine {
    pub fn label(&self) -> Option<u32> {
        match self.decl {
            DeclKind::Declared { label, .. } => label,
            DeclKind::Standard(_) => None,
        }
    }

    pub fn set_label(&mut self, l: u32) {
        if let DeclKind::Declared { label, .. } = &mut self.decl {
            *label = Some(l);
        }
    }

    pub fn is_forward(&self) -> bool {
        matches!(self.decl, DeclKind::Declared { forward: true, .. })
    }

    pub fn clear_forward(&mut self) {
        if let DeclKind::Declared { forward, .. } = &mut self.decl {
            *forward = false;
        }
    }

    pub fn level(&self) -> u8 {
        match self.decl {
            DeclKind::Declared { level, .. } => level,
            DeclKind::Standard(_) => 0,
        }
    }
}

/// The standard procedure/function identifiers pre-entered at level 0
/// (spec §3's "standard-key"): surface name, key, and whether it yields
/// a value (function) rather than being called as a statement (procedure).
pub fn standard_routines() -> Vec<(&'static str, StdKey, bool)> {
    vec![
        ("abs", StdKey::Abs, true),
        ("sqr", StdKey::Sqr, true),
        ("odd", StdKey::Odd, true),
        ("succ", StdKey::Succ, true),
        ("pred", StdKey::Pred, true),
        ("chr", StdKey::Chr, true),
        ("ord", StdKey::Ord, true),
        ("trunc", StdKey::Trunc, true),
        ("round", StdKey::Round, true),
        ("sin", StdKey::Sin, true),
        ("cos", StdKey::Cos, true),
        ("exp", StdKey::Exp, true),
        ("ln", StdKey::Ln, true),
        ("sqrt", StdKey::Sqrt, true),
        ("arctan", StdKey::ArcTan, true),
        ("eof", StdKey::Eof, true),
        ("eoln", StdKey::Eoln, true),
        ("read", StdKey::Read, false),
        ("readln", StdKey::ReadLn, false),
        ("write", StdKey::Write, false),
        ("writeln", StdKey::WriteLn, false),
        ("pack", StdKey::Pack, false),
        ("unpack", StdKey::Unpack, false),
        ("new", StdKey::New, false),
        ("page", StdKey::Page, false),
        ("get", StdKey::Get, false),
        ("put", StdKey::Put, false),
        ("reset", StdKey::Reset, false),
        ("rewrite", StdKey::Rewrite, false),
        ("mark", StdKey::Mark, false),
        ("release", StdKey::Release, false),
    ]
}

#[derive(Clone, Debug)]
pub enum IdentKind {
    Type,
    Const(ConstValue),
    Var { kind: VarKind, level: u8, address: i32 },
    Field { offset: i32 },
    Proc(Routine),
    Func(Routine),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClassMask {
    Types,
    Konst,
    Vars,
    Field,
    Proc,
    Func,
}

impl IdentKind {
    pub fn class(&self) -> ClassMask {
        match self {
            IdentKind::Type => ClassMask::Types,
            IdentKind::Const(_) => ClassMask::Konst,
            IdentKind::Var { .. } => ClassMask::Vars,
            IdentKind::Field { .. } => ClassMask::Field,
            IdentKind::Proc(_) => ClassMask::Proc,
            IdentKind::Func(_) => ClassMask::Func,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct IdentId(pub usize);

#[derive(Clone, Debug)]
pub struct IdentDesc {
    pub name: String,
    pub type_id: Option<TypeId>,
    pub kind: IdentKind,
}

/// Arena of every identifier ever entered, across every scope; the
/// per-scope BSTs in [`crate::display::Display`] hold [`IdentId`]s into
/// this table rather than owning the descriptors themselves.
#[derive(Default)]
pub struct IdentTable {
    arena: Vec<IdentDesc>,
}

impl IdentTable {
    pub fn new() -> IdentTable {
        IdentTable::default()
    }

    pub fn alloc(&mut self, desc: IdentDesc) -> IdentId {
        self.arena.push(desc);
        IdentId(self.arena.len() - 1)
    }

    pub fn get(&self, id: IdentId) -> &IdentDesc {
        &self.arena[id.0]
    }

    pub fn get_mut(&mut self, id: IdentId) -> &mut IdentDesc {
        &mut self.arena[id.0]
    }
}
