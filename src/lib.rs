//! Store layout, opcode table, and interpreter for the P4 Pascal dialect's
//! stack machine. Shared by the assembler (which packs textual P-code into
//! this store's representation) and the VM driver (which runs it).

extern crate num;
#[macro_use]
extern crate num_derive;

pub mod code;
pub mod constants;
pub mod error;
pub mod opcode;
pub mod set;
pub mod store;
pub mod vm;

pub use code::{Code, Instruction};
pub use error::{Error, ExitCode};
pub use opcode::{base_of_variant, variant_opcode, Opcode, StdProc, TypeTag, CHKA};
pub use set::PSet;
pub use store::{Cell, Store};
pub use vm::Machine;
