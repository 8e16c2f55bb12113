//! Store layout and fixed addresses shared by the assembler and the VM.
//!
//! These mirror the numeric constants of the original P4 store: the store
//! is one flat array partitioned into the runtime stack/globals region
//! followed by five append-only interned-constant pools.

/// Highest code-word index (an instruction word holds two slots).
pub const CODEMAX: usize = 8650;
/// Highest instruction slot (`pc`) value.
pub const PCMAX: usize = 17500;

/// Upper bound of the runtime stack / static globals region.
pub const MAXSTK: usize = 13650;
/// Upper bound of the interned integer-constant pool.
pub const OVERI: usize = 13655;
/// Upper bound of the interned real-constant pool.
pub const OVERR: usize = 13660;
/// Upper bound of the interned set-constant pool.
pub const OVERS: usize = 13730;
/// Upper bound of the interned subrange-check `(lb, ub)` pool.
pub const OVERB: usize = 13820;
/// Upper bound of the interned multi-character string pool.
pub const OVERM: usize = 18000;

/// Highest valid store address; `store` is sized `[0, STORE_HIGH]`.
pub const STORE_HIGH: usize = OVERM;

/// Largest integer literal the assembler packs directly into `q`
/// before it must be interned into the integer-constant pool.
pub const LARGEINT: i64 = 26144;

/// First instruction slot of a compiled program; slots below are reserved.
pub const BEGINCODE: usize = 3;

/// Fixed store addresses that encode the identity of standard files.
pub const INPUTADR: usize = 5;
pub const OUTPUTADR: usize = 6;
pub const PRDADR: usize = 7;
pub const PRRADR: usize = 8;

/// Placeholder opcode used to fill gaps in a dense `xjp` jump table.
/// Trapping on this opcode at runtime signals an out-of-range `case`.
pub const DUMINST: u8 = 62;

/// Bounds of a Pascal `set of` value representable by the set library.
pub const SETLOW: i32 = 0;
pub const SETHIGH: i32 = 47;

/// Number of cells in a mark-stack activation-record header.
pub const MARKSIZE: i32 = 5;

pub const MAXLABEL: usize = 1850;

/// Per-scalar-type cell size / alignment quotient, taken verbatim from
/// the original's `#define INTSIZE 1`/`INTAL 1`/etc. — every predefined
/// type occupies exactly one store cell, so size and alignment coincide.
pub const INTSIZE: i32 = 1;
pub const INTAL: i32 = 1;
pub const REALSIZE: i32 = 1;
pub const REALAL: i32 = 1;
pub const CHARSIZE: i32 = 1;
pub const CHARAL: i32 = 1;
pub const BOOLSIZE: i32 = 1;
pub const BOOLAL: i32 = 1;
pub const PTRSIZE: i32 = 1;
pub const SETSIZE: i32 = 1;
pub const SETAL: i32 = 1;

/// Highest ordinal value representable by `char` (spec §3's store cell
/// holds a 16-bit character index; the original's `ORDMAXCHAR` bounds the
/// *default* character set actually in use).
pub const ORDMAXCHAR: i64 = 63;
pub const ORDMINCHAR: i64 = 0;

/// Largest value representable by a Pascal `integer` (the store's `vi`
/// field is a wider `i32`, but the language's own `maxint` is this).
pub const MAXINT: i64 = 32767;

/// Maximum static nesting depth of declared procedures/functions.
pub const MAXLEVEL: usize = 10;
/// Maximum depth of the display, including `with`-pushed record scopes
/// on top of `MAXLEVEL` block scopes.
pub const DISPLIMIT: usize = 20;

/// Activation-record header size in cells, duplicated here from
/// [`MARKSIZE`] as the `i32` the compiler's address arithmetic wants;
/// named `LCAFTERMARKSTACK` in the original.
pub const LCAFTERMARKSTACK: i32 = MARKSIZE;
