//! The two-pass assembler proper (spec §4.5): translates the line AST
//! into packed `p4vm::Code` plus the five interned-constant pools of a
//! `p4vm::Store`, threading forward label references through operand `q`
//! fields via [`crate::labels::LabelTable`].

use crate::ast::{InstrLine, Line, Operand};
use crate::error::{Error, PoolKind, Result};
use crate::labels::LabelTable;
use p4vm::constants::BEGINCODE;
use p4vm::{variant_opcode, Code, Instruction, Opcode, PSet, StdProc, Store, TypeTag, CHKA};
use std::str::FromStr;

fn opcode_from_mnemonic(mnemonic: &str) -> Result<Opcode> {
    let mut chars = mnemonic.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => return Err(Error::IllegalInstruction(mnemonic.to_string())),
    };
    Opcode::from_str(&capitalized).map_err(|_| Error::IllegalInstruction(mnemonic.to_string()))
}

fn stdproc_from_name(name: &str) -> Result<StdProc> {
    let mut chars = name.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => return Err(Error::IllegalStandardProcedure(name.to_string())),
    };
    StdProc::from_str(&capitalized).map_err(|_| Error::IllegalStandardProcedure(name.to_string()))
}

fn as_number(operands: &[Operand], index: usize) -> f64 {
    match operands.get(index) {
        Some(Operand::Number(n)) => *n,
        _ => 0.0,
    }
}

fn as_label(operands: &[Operand], index: usize) -> u32 {
    match operands.get(index) {
        Some(Operand::Label(n)) => *n,
        _ => 0,
    }
}

fn string_to_bytes(value: &str) -> Result<[u8; 16]> {
    if value.len() > 16 {
        return Err(Error::StringTooLong(value.to_string()));
    }
    let mut bytes = [0u8; 16];
    for (i, b) in value.bytes().enumerate() {
        bytes[i] = b;
    }
    Ok(bytes)
}

/// Runs one full pass over `lines`, emitting into `code`/`store`/`labels`
/// starting at [`BEGINCODE`]. Called twice by [`crate::assemble`] with the
/// same AST and the same label table, matching spec §4.5's two-pass
/// design: labels resolved entirely on pass one are read back as already
/// `defined` on pass two, so the emitted code words are identical.
pub fn run_pass(
    lines: &[Line],
    code: &mut Code,
    store: &mut Store,
    labels: &mut LabelTable,
) -> Result<usize> {
    let mut pc = BEGINCODE;

    for line in lines {
        match line {
            Line::Label { number, equate } => {
                let value = equate.unwrap_or(pc as i32);
                labels.define(*number, value, |slot| {
                    let mut instr = code.fetch(slot as usize);
                    let prev = instr.q;
                    instr.q = value;
                    code.store(slot as usize, instr);
                    prev
                })?;
            }
            Line::End | Line::Info(_) => {}
            Line::Instr(instr_line) => {
                let instruction = assemble_instruction(instr_line, pc, store, labels)?;
                code.store(pc, instruction);
                pc += 1;
            }
        }
    }
    Ok(pc)
}

fn tag_index_for_letter(letter: char) -> u8 {
    match TypeTag::from_letter(letter) {
        Some(TypeTag::Int) => 0,
        Some(TypeTag::Real) => 1,
        Some(TypeTag::Bool) => 2,
        Some(TypeTag::Char) => 3,
        Some(TypeTag::Address) => 4,
        Some(TypeTag::Set) => 4,
        Some(TypeTag::Multi) => 4,
        None => 0,
    }
}

fn assemble_instruction(
    line: &InstrLine,
    pc: usize,
    store: &mut Store,
    labels: &mut LabelTable,
) -> Result<Instruction> {
    let base = opcode_from_mnemonic(&line.mnemonic)?;
    let tag = line.type_letter.and_then(TypeTag::from_letter);

    let mut op = variant_opcode(base, tag);
    let mut p: u8 = 0;
    let mut q: i32 = 0;

    match base {
        Opcode::Lod | Opcode::Str => {
            p = as_number(&line.operands, 0) as u8;
            q = as_number(&line.operands, 1) as i32;
        }
        Opcode::Ldo | Opcode::Sro | Opcode::Ind | Opcode::Inc | Opcode::Dec => {
            q = as_number(&line.operands, 0) as i32;
        }
        Opcode::Lda => {
            p = as_number(&line.operands, 0) as u8;
            q = as_number(&line.operands, 1) as i32;
        }
        Opcode::Lao | Opcode::Ixa | Opcode::Mov => {
            q = as_number(&line.operands, 0) as i32;
        }
        Opcode::Sto => {}
        Opcode::Mst => {
            p = as_number(&line.operands, 0) as u8;
        }
        Opcode::Cup => {
            p = as_number(&line.operands, 0) as u8;
            q = labels.lookup(as_label(&line.operands, 1), pc as i32);
        }
        Opcode::Ent => {
            p = as_number(&line.operands, 0) as u8;
            q = labels.lookup(as_label(&line.operands, 1), pc as i32);
        }
        Opcode::Ret => {
            p = if line.type_letter.is_some() { 1 } else { 0 };
        }
        Opcode::Csp => {
            let name = match line.operands.first() {
                Some(Operand::Ident(name)) => name.clone(),
                _ => String::new(),
            };
            q = stdproc_from_name(&name)? as i32;
        }
        Opcode::Equ | Opcode::Neq | Opcode::Geq | Opcode::Grt | Opcode::Leq | Opcode::Les => {
            p = line.type_letter.map(tag_index_for_letter).unwrap_or(0);
            if line.type_letter == Some('m') {
                q = as_number(&line.operands, 0) as i32;
            }
        }
        Opcode::Ujp | Opcode::Fjp | Opcode::Xjp => {
            q = labels.lookup(as_label(&line.operands, 0), pc as i32);
        }
        Opcode::Chk => {
            if line.type_letter == Some('a') {
                op = CHKA;
            } else {
                let bounds = match line.operands.first() {
                    Some(Operand::List(values)) if values.len() == 2 => (values[0], values[1]),
                    _ => (0, 0),
                };
                q = store
                    .intern_bound(bounds.0, bounds.1)
                    .map_err(|_| Error::PoolOverflow(PoolKind::Boundary))? as i32;
            }
        }
        Opcode::Ldc => {
            let (new_op, new_p, new_q) = assemble_ldc(line, store)?;
            op = new_op;
            p = new_p;
            q = new_q;
        }
        Opcode::Lca => {
            let text = match line.operands.first() {
                Some(Operand::Str(s)) => s.clone(),
                _ => String::new(),
            };
            let bytes = string_to_bytes(&text)?;
            q = store
                .intern_string(bytes)
                .map_err(|_| Error::PoolOverflow(PoolKind::Multiple))? as i32;
        }
        _ => {}
    }

    Ok(Instruction { op, p, q })
}

/// `ldc` packs its literal's type tag into `p` (not the opcode number,
/// since `ldc`/`lci` have no typed variant strip — see `p4vm::vm`): 0=int,
/// 1=real, 2=bool, 3=char, 4=set. Literals too large for a 16-bit `q`, or
/// of real/set kind, are interned and the opcode switches to `lci`.
fn assemble_ldc(line: &InstrLine, store: &mut Store) -> Result<(u8, u8, i32)> {
    use p4vm::constants::LARGEINT;

    match line.type_letter {
        Some('i') => {
            let value = as_number(&line.operands, 0) as i64;
            if value.abs() >= LARGEINT {
                let idx = store
                    .intern_int(value as i32)
                    .map_err(|_| Error::PoolOverflow(PoolKind::Integer))?;
                Ok((Opcode::Lci as u8, 0, idx as i32))
            } else {
                Ok((Opcode::Ldc as u8, 0, value as i32))
            }
        }
        Some('r') => {
            let value = as_number(&line.operands, 0);
            let idx = store
                .intern_real(value)
                .map_err(|_| Error::PoolOverflow(PoolKind::Real))?;
            Ok((Opcode::Lci as u8, 1, idx as i32))
        }
        Some('b') => {
            let value = as_number(&line.operands, 0) as i32;
            Ok((Opcode::Ldc as u8, 2, value))
        }
        Some('c') => {
            let ch = match line.operands.first() {
                Some(Operand::Str(s)) => s.chars().next().unwrap_or(' '),
                _ => ' ',
            };
            Ok((Opcode::Ldc as u8, 3, ch as i32))
        }
        Some('s') | None if matches!(line.operands.first(), Some(Operand::List(_))) => {
            let mut set = PSet::EMPTY;
            if let Some(Operand::List(values)) = line.operands.first() {
                for v in values {
                    set.add(*v);
                }
            }
            let idx = store
                .intern_set(set)
                .map_err(|_| Error::PoolOverflow(PoolKind::Set))?;
            Ok((Opcode::Lci as u8, 4, idx as i32))
        }
        // bare `ldc` with no operand pushes nil: an address-typed zero.
        None => Ok((Opcode::Ldc as u8, 0, 0)),
        Some(_) => Ok((Opcode::Ldc as u8, 0, 0)),
    }
}
