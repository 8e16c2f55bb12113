//! Structural type descriptors (spec §3/§4.3): a tagged variant arena
//! plus `comptypes`, the structural-equivalence check that breaks pointer
//! cycles with an explicit in-progress frame (DESIGN NOTES §9).

use p4vm::constants::{BOOLAL, CHARAL, INTAL, PTRSIZE, REALAL, SETAL};

/// Index into [`TypeTable`]'s arena. Copy because the arena never moves
/// entries once allocated.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct TypeId(pub usize);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScalarBase {
    Int,
    Real,
    Bool,
    Char,
    /// User `(a, b, c)` enumeration; ordinal value is declaration order.
    Enum,
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub type_id: TypeId,
    pub offset: i32,
}

#[derive(Clone, Debug)]
pub enum TypeForm {
    Scalar { base: ScalarBase },
    Subrange { host: TypeId, min: i64, max: i64 },
    /// `eltype` is `None` while a `^T` forward reference to an
    /// undeclared `T` is still outstanding; patched at block end
    /// (spec §4.2, diagnostic 117 if it never resolves).
    Pointer { eltype: Option<TypeId> },
    Set { eltype: TypeId },
    Array { index: TypeId, eltype: TypeId, packed: bool },
    Record { fields: Vec<Field>, variant_tag: Option<(String, TypeId)> },
    File { eltype: TypeId },
}

#[derive(Clone, Debug)]
pub struct TypeDesc {
    pub form: TypeForm,
    pub size: i32,
}

pub struct TypeTable {
    arena: Vec<TypeDesc>,
    pub int_ty: TypeId,
    pub real_ty: TypeId,
    pub bool_ty: TypeId,
    pub char_ty: TypeId,
    pub nil_ty: TypeId,
    pub intptr: TypeId,
    pub realptr: TypeId,
    pub charptr: TypeId,
    pub boolptr: TypeId,
    pub nilptr: TypeId,
    pub textptr: TypeId,
    cycle_frame: Vec<(TypeId, TypeId)>,
}

impl TypeTable {
    pub fn new() -> TypeTable {
        let mut arena = Vec::new();
        let mut push = |form: TypeForm, size: i32| {
            arena.push(TypeDesc { form, size });
            TypeId(arena.len() - 1)
        };
        let int_ty = push(TypeForm::Scalar { base: ScalarBase::Int }, INTAL);
        let real_ty = push(TypeForm::Scalar { base: ScalarBase::Real }, REALAL);
        let bool_ty = push(TypeForm::Scalar { base: ScalarBase::Bool }, BOOLAL);
        let char_ty = push(TypeForm::Scalar { base: ScalarBase::Char }, CHARAL);
        let nil_ty = push(TypeForm::Pointer { eltype: None }, PTRSIZE);

        // The six predefined pointers (spec §4.3 "Supplemental"): allocated
        // once here and shared by reference, never re-synthesised per
        // syntactic `^T` occurrence the way user pointer types are.
        let intptr = push(TypeForm::Pointer { eltype: Some(int_ty) }, PTRSIZE);
        let realptr = push(TypeForm::Pointer { eltype: Some(real_ty) }, PTRSIZE);
        let charptr = push(TypeForm::Pointer { eltype: Some(char_ty) }, PTRSIZE);
        let boolptr = push(TypeForm::Pointer { eltype: Some(bool_ty) }, PTRSIZE);
        let nilptr = push(TypeForm::Pointer { eltype: None }, PTRSIZE);
        let textptr = push(TypeForm::File { eltype: char_ty }, PTRSIZE);

        TypeTable {
            arena,
            int_ty,
            real_ty,
            bool_ty,
            char_ty,
            nil_ty,
            intptr,
            realptr,
            charptr,
            boolptr,
            nilptr,
            textptr,
            cycle_frame: Vec::new(),
        }
    }

    pub fn alloc(&mut self, form: TypeForm, size: i32) -> TypeId {
        self.arena.push(TypeDesc { form, size });
        TypeId(self.arena.len() - 1)
    }

    pub fn get(&self, id: TypeId) -> &TypeDesc {
        &self.arena[id.0]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeDesc {
        &mut self.arena[id.0]
    }

    pub fn size_of(&self, id: TypeId) -> i32 {
        self.arena[id.0].size
    }

    pub fn is_ordinal(&self, id: TypeId) -> bool {
        match &self.get(id).form {
            TypeForm::Scalar { base } => *base != ScalarBase::Real,
            TypeForm::Subrange { .. } => true,
            _ => false,
        }
    }

    pub fn is_real(&self, id: TypeId) -> bool {
        matches!(self.get(id).form, TypeForm::Scalar { base: ScalarBase::Real })
    }

    pub fn is_int(&self, id: TypeId) -> bool {
        matches!(self.get(id).form, TypeForm::Scalar { base: ScalarBase::Int })
            || matches!(self.get(id).form, TypeForm::Subrange { host, .. } if self.is_int(host))
    }

    /// Rounds `displ` up to `id`'s alignment quotient. The boolean case
    /// intentionally falls through to `INTAL` unless matched explicitly,
    /// preserving the original's quirk (DESIGN NOTES §9, open question).
    pub fn align(&self, id: TypeId, displ: i32) -> i32 {
        let quot = match &self.get(id).form {
            TypeForm::Scalar { base: ScalarBase::Real } => REALAL,
            TypeForm::Scalar { base: ScalarBase::Char } => CHARAL,
            TypeForm::Scalar { base: ScalarBase::Bool } => INTAL,
            TypeForm::Set { .. } => SETAL,
            _ => INTAL,
        };
        if quot <= 1 {
            displ
        } else {
            (displ + quot - 1) / quot * quot
        }
    }

    /// Structural type equivalence (spec §3): walks both descriptors
    /// recursively; pointer-pointer comparisons push the pair onto
    /// `cycle_frame` before recursing into element types so that a
    /// self-referential pointer graph terminates instead of looping.
    pub fn comptypes(&mut self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        if self.cycle_frame.contains(&(a, b)) || self.cycle_frame.contains(&(b, a)) {
            return true;
        }
        let (fa, fb) = (self.get(a).form.clone(), self.get(b).form.clone());
        match (fa, fb) {
            (TypeForm::Scalar { base: ba }, TypeForm::Scalar { base: bb }) => ba == bb,
            (
                TypeForm::Subrange { host: ha, .. },
                TypeForm::Subrange { host: hb, .. },
            ) => self.comptypes(ha, hb),
            (TypeForm::Subrange { host, .. }, _) => self.comptypes(host, b),
            (_, TypeForm::Subrange { host, .. }) => self.comptypes(a, host),
            (TypeForm::Pointer { eltype: ea }, TypeForm::Pointer { eltype: eb }) => {
                self.cycle_frame.push((a, b));
                let result = match (ea, eb) {
                    (Some(ea), Some(eb)) => self.comptypes(ea, eb),
                    (None, None) => true,
                    _ => false,
                };
                self.cycle_frame.pop();
                result
            }
            (TypeForm::Set { eltype: ea }, TypeForm::Set { eltype: eb }) => self.comptypes(ea, eb),
            (
                TypeForm::Array { index: ia, eltype: ea, .. },
                TypeForm::Array { index: ib, eltype: eb, .. },
            ) => self.comptypes(ia, ib) && self.comptypes(ea, eb),
            (TypeForm::Record { fields: fa, .. }, TypeForm::Record { fields: fb, .. }) => {
                fa.len() == fb.len()
                    && fa
                        .iter()
                        .zip(fb.iter())
                        .all(|(x, y)| self.comptypes(x.type_id, y.type_id))
            }
            (TypeForm::File { eltype: ea }, TypeForm::File { eltype: eb }) => self.comptypes(ea, eb),
            _ => false,
        }
    }
}

impl Default for TypeTable {
    fn default() -> TypeTable {
        TypeTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_pointers_are_shared() {
        let types = TypeTable::new();
        assert!(matches!(types.get(types.intptr).form, TypeForm::Pointer { eltype: Some(t) } if t == types.int_ty));
    }

    #[test]
    fn structural_equivalence_recurses_into_arrays() {
        let mut types = TypeTable::new();
        let idx = types.alloc(TypeForm::Subrange { host: types.int_ty, min: 1, max: 10 }, INTAL);
        let a1 = types.alloc(TypeForm::Array { index: idx, eltype: types.int_ty, packed: false }, 10);
        let a2 = types.alloc(TypeForm::Array { index: idx, eltype: types.int_ty, packed: false }, 10);
        assert!(types.comptypes(a1, a2));
    }

    #[test]
    fn cyclic_pointer_graph_terminates() {
        let mut types = TypeTable::new();
        let p1 = types.alloc(TypeForm::Pointer { eltype: None }, PTRSIZE);
        let p2 = types.alloc(TypeForm::Pointer { eltype: Some(p1) }, PTRSIZE);
        types.get_mut(p1).form = TypeForm::Pointer { eltype: Some(p2) };
        assert!(types.comptypes(p1, p2));
    }

    #[test]
    fn subrange_is_ordinal_but_real_is_not() {
        let mut types = TypeTable::new();
        let sub = types.alloc(TypeForm::Subrange { host: types.int_ty, min: 0, max: 9 }, INTAL);
        assert!(types.is_ordinal(sub));
        assert!(!types.is_ordinal(types.real_ty));
    }
}
