//! An expression's compile-time attributes (spec §4.3): type, value kind,
//! and — for variables — how to reach the storage cell.

use crate::idents::ConstValue;
use crate::types::TypeId;

/// How a variable's storage is reached. `Direct` is resolved entirely at
/// compile time (a static level/displacement pair fed to `lod`/`str`/
/// `lda`); `Indirect` means the address has already been computed and
/// pushed onto the evaluation stack (through a pointer dereference, an
/// array index, or an indirect `with` base) — every further field/array
/// selector folds its offset into that same stack-top address before the
/// attribute is handed back (spec §4.3's `access ∈ {direct, indirect,
/// indexed}`; this collapses `indexed` into `indirect` since both leave
/// an address on the stack rather than a static displacement).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarAccess {
    Direct { level: u8, displ: i32 },
    Indirect,
}

#[derive(Clone, Debug)]
pub enum AttrKind {
    Constant(ConstValue),
    Variable(VarAccess),
    Expression,
}

#[derive(Clone, Debug)]
pub struct Attr {
    pub type_id: TypeId,
    pub kind: AttrKind,
}

impl Attr {
    pub fn expr(type_id: TypeId) -> Attr {
        Attr { type_id, kind: AttrKind::Expression }
    }

    pub fn constant(type_id: TypeId, value: ConstValue) -> Attr {
        Attr { type_id, kind: AttrKind::Constant(value) }
    }

    pub fn variable(type_id: TypeId, access: VarAccess) -> Attr {
        Attr { type_id, kind: AttrKind::Variable(access) }
    }
}
