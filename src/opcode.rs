//! The P-code instruction set: base mnemonics, their typed variants, and
//! the standard-procedure keys dispatched through `csp`.
//!
//! Most opcodes come in up to five type-tagged variants (int/real/
//! bool/char/address). Rather than enumerating every variant as its own
//! enum member, [`Opcode`] holds the 62 base mnemonics and [`variant_opcode`]
//! folds in the type tag the same way the original's sparse `cop[]` table
//! does: a handful of opcodes remap to a five-wide strip of numbers above
//! the base table, the rest are untyped and dispatch on the base number
//! alone.

use num_derive::{FromPrimitive, ToPrimitive};
use util_derive::EnumFromStr;

/// Base P-code opcodes, numbered exactly as the assembler's `instr[]`
/// table and the VM's dispatch switch agree on.
#[derive(Clone, Copy, PartialEq, Eq, Debug, ToPrimitive, FromPrimitive, EnumFromStr)]
pub enum Opcode {
    Lod = 0,
    Ldo = 1,
    Str = 2,
    Sro = 3,
    Lda = 4,
    Lao = 5,
    Sto = 6,
    Ldc = 7,
    Lci = 8,
    Ind = 9,
    Inc = 10,
    Mst = 11,
    Cup = 12,
    Ent = 13,
    Ret = 14,
    Csp = 15,
    Ixa = 16,
    Equ = 17,
    Neq = 18,
    Geq = 19,
    Grt = 20,
    Leq = 21,
    Les = 22,
    Ujp = 23,
    Fjp = 24,
    Xjp = 25,
    Chk = 26,
    Eof = 27,
    Adi = 28,
    Adr = 29,
    Sbi = 30,
    Sbr = 31,
    Sgs = 32,
    Flt = 33,
    Flo = 34,
    Trc = 35,
    Ngi = 36,
    Ngr = 37,
    Sqi = 38,
    Sqr = 39,
    Abi = 40,
    Abr = 41,
    Not = 42,
    And = 43,
    Ior = 44,
    Dif = 45,
    Int = 46,
    Uni = 47,
    Inn = 48,
    Mod = 49,
    Mpi = 50,
    Mpr = 51,
    Dvi = 52,
    Dvr = 53,
    Mov = 54,
    Lca = 55,
    Dec = 56,
    Stp = 57,
    Ord = 58,
    Chr = 59,
    Ujc = 60,
}

/// Numeric opcode reached only through a type-tagged remap of [`Opcode::Chk`]
/// with [`TypeTag::Address`]; kept as a plain constant since it has no
/// mnemonic of its own in the textual format. Equal to
/// `variant_opcode(Opcode::Chk, Some(TypeTag::Address))`.
pub const CHKA: u8 = 99;

/// The single-letter type suffix attached to a handful of mnemonics
/// (`lod r`, `sro a`, ...) that selects a typed variant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeTag {
    Int,
    Real,
    Bool,
    Char,
    Address,
    Set,
    Multi,
}

impl TypeTag {
    pub fn from_letter(c: char) -> Option<TypeTag> {
        match c {
            'i' => Some(TypeTag::Int),
            'r' => Some(TypeTag::Real),
            'b' => Some(TypeTag::Bool),
            'c' => Some(TypeTag::Char),
            'a' => Some(TypeTag::Address),
            's' => Some(TypeTag::Set),
            'm' => Some(TypeTag::Multi),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            TypeTag::Int => 'i',
            TypeTag::Real => 'r',
            TypeTag::Bool => 'b',
            TypeTag::Char => 'c',
            TypeTag::Address => 'a',
            TypeTag::Set => 's',
            TypeTag::Multi => 'm',
        }
    }

    /// Index into a five-wide variant strip; only `i/r/b/c/a` occupy one.
    fn strip_index(self) -> Option<u8> {
        match self {
            TypeTag::Int => Some(0),
            TypeTag::Real => Some(1),
            TypeTag::Bool => Some(2),
            TypeTag::Char => Some(3),
            TypeTag::Address => Some(4),
            TypeTag::Set | TypeTag::Multi => None,
        }
    }
}

/// The sparse `cop[]` remap: base opcode number -> first number of its
/// five-wide typed-variant strip. Opcodes absent here have no typed
/// variant and dispatch on their base number regardless of any suffix.
fn remap_base(op: Opcode) -> Option<u8> {
    match op {
        Opcode::Lod => Some(105),
        Opcode::Ldo => Some(65),
        Opcode::Str => Some(70),
        Opcode::Sro => Some(75),
        Opcode::Sto => Some(80),
        Opcode::Ind => Some(85),
        Opcode::Inc => Some(90),
        Opcode::Chk => Some(95),
        Opcode::Dec => Some(100),
        _ => None,
    }
}

/// Folds a base opcode and an optional type tag into the numeric opcode
/// actually packed into a code word, exactly as the assembler's
/// `typesymbol` + `cop[]` remap does.
pub fn variant_opcode(op: Opcode, tag: Option<TypeTag>) -> u8 {
    match (remap_base(op), tag.and_then(TypeTag::strip_index)) {
        (Some(base), Some(index)) => base + index,
        _ => op as u8,
    }
}

/// Recovers the base opcode for any numeric opcode reached via a typed
/// variant strip, used by the VM to fold variants back to one dispatch arm.
pub fn base_of_variant(numeric: u8) -> Opcode {
    use num_traits::FromPrimitive;
    if numeric == CHKA {
        return Opcode::Chk;
    }
    for op in [
        Opcode::Lod,
        Opcode::Ldo,
        Opcode::Str,
        Opcode::Sro,
        Opcode::Sto,
        Opcode::Ind,
        Opcode::Inc,
        Opcode::Chk,
        Opcode::Dec,
    ] {
        if let Some(base) = remap_base(op) {
            if numeric >= base && numeric < base + 5 {
                return op;
            }
        }
    }
    Opcode::from_u8(numeric).unwrap_or(Opcode::Ujc)
}

/// Standard procedures dispatched through `csp q`, numbered exactly as
/// the VM's `callsp` switch.
#[derive(Clone, Copy, PartialEq, Eq, Debug, ToPrimitive, FromPrimitive, EnumFromStr)]
pub enum StdProc {
    Get = 0,
    Put = 1,
    Rst = 2,
    Rln = 3,
    New = 4,
    Wln = 5,
    Wrs = 6,
    Eln = 7,
    Wri = 8,
    Wrr = 9,
    Wrc = 10,
    Rdi = 11,
    Rdr = 12,
    Rdc = 13,
    Sin = 14,
    Cos = 15,
    Exp = 16,
    Log = 17,
    Sqt = 18,
    Atn = 19,
    Sav = 20,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_variant_folds_into_strip() {
        assert_eq!(variant_opcode(Opcode::Lod, Some(TypeTag::Int)), 105);
        assert_eq!(variant_opcode(Opcode::Lod, Some(TypeTag::Address)), 109);
        assert_eq!(variant_opcode(Opcode::Ldo, Some(TypeTag::Real)), 66);
    }

    #[test]
    fn untyped_opcode_ignores_tag() {
        assert_eq!(variant_opcode(Opcode::Mov, Some(TypeTag::Int)), Opcode::Mov as u8);
    }

    #[test]
    fn chka_is_the_address_variant_of_chk() {
        assert_eq!(variant_opcode(Opcode::Chk, Some(TypeTag::Address)), CHKA);
    }

    #[test]
    fn base_of_variant_round_trips() {
        assert_eq!(base_of_variant(105), Opcode::Lod);
        assert_eq!(base_of_variant(109), Opcode::Lod);
        assert_eq!(base_of_variant(CHKA), Opcode::Chk);
        assert_eq!(base_of_variant(Opcode::Mov as u8), Opcode::Mov);
    }
}
