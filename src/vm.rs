//! The stack-machine interpreter: typed instruction dispatch, the
//! mark-stack activation-record protocol, and the standard-procedure
//! (`csp`) interface.

use crate::code::{Code, Instruction};
use crate::constants::*;
use crate::error::{Error, ExitCode};
use crate::opcode::{base_of_variant, Opcode, StdProc, CHKA};
use crate::set::PSet;
use crate::store::{Cell, Store};
use num_traits::FromPrimitive;
use std::io::{self, BufRead, Write};

/// The P4 stack machine. Owns the packed code, the flat store, and the
/// four cursor registers that the activation-record protocol mutates.
pub struct Machine<R: BufRead, W: Write> {
    pub code: Code,
    pub store: Store,
    pub pc: usize,
    pub mp: usize,
    pub sp: usize,
    pub ep: usize,
    pub np: usize,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Machine<R, W> {
    pub fn new(code: Code, store: Store, input: R, output: W) -> Machine<R, W> {
        Machine {
            code,
            store,
            pc: BEGINCODE,
            mp: 0,
            sp: 0,
            ep: MAXSTK,
            np: MAXSTK,
            input,
            output,
        }
    }

    /// Walks the static-link chain `levels` steps up from the current frame.
    fn base(&self, levels: u8) -> usize {
        let mut display = self.mp;
        for _ in 0..levels {
            display = self.store.get(display + 1).as_address() as usize;
        }
        display
    }

    fn push(&mut self, cell: Cell) -> Result<(), Error> {
        if self.sp + 1 >= self.ep {
            return Err(Error::Fault(ExitCode::StackOverflow, self.pc));
        }
        self.sp += 1;
        self.store.set(self.sp, cell);
        Ok(())
    }

    fn pop(&mut self) -> Cell {
        let v = self.store.get(self.sp);
        self.sp -= 1;
        v
    }

    /// Runs until a fatal condition or a `stp` halt; returns the exit code.
    pub fn run(&mut self) -> Result<ExitCode, Error> {
        loop {
            let instr = self.code.fetch(self.pc);
            self.pc += 1;
            match self.step(instr)? {
                Some(code) => return Ok(code),
                None => continue,
            }
        }
    }

    fn step(&mut self, instr: Instruction) -> Result<Option<ExitCode>, Error> {
        let base = base_of_variant(instr.op);

        match base {
            Opcode::Lod => {
                let addr = self.base(instr.p) as i32 + instr.q;
                let cell = self.store.get(addr as usize);
                self.push(cell)?;
            }
            Opcode::Ldo => {
                let cell = self.store.get(instr.q as usize);
                self.push(cell)?;
            }
            Opcode::Str => {
                let addr = self.base(instr.p) as i32 + instr.q;
                let v = self.pop();
                self.store.set(addr as usize, v);
            }
            Opcode::Sro => {
                let v = self.pop();
                self.store.set(instr.q as usize, v);
            }
            Opcode::Lda => {
                let addr = self.base(instr.p) as i32 + instr.q;
                self.push(Cell::address(addr))?;
            }
            Opcode::Lao => {
                self.push(Cell::address(instr.q))?;
            }
            Opcode::Sto => {
                let v = self.pop();
                let addr = self.pop().as_address();
                self.store.set(addr as usize, v);
            }
            Opcode::Ldc => {
                // in-line literal: q carries the value directly. `ldc`/`lci`
                // have no typed variant strip of their own (their opcode
                // number never changes), so the assembler carries the type
                // tag directly in `p` instead: 0=int, 1=real, 2=bool,
                // 3=char, 4=set.
                match instr.p {
                    2 => self.push(Cell::boolean(instr.q != 0))?,
                    3 => self.push(Cell::char(instr.q as i16))?,
                    _ => self.push(Cell::int(instr.q))?,
                }
            }
            Opcode::Lci => {
                // indirect literal: q is a pool index relative to its region
                match instr.p {
                    0 => {
                        let v = self.store.ints.get(instr.q as usize).unwrap_or(0);
                        self.push(Cell::int(v))?;
                    }
                    1 => {
                        let bits = self.store.reals.get(instr.q as usize).unwrap_or(0);
                        self.push(Cell::real(f64::from_bits(bits)))?;
                    }
                    4 => {
                        let set = self.store.sets.get(instr.q as usize).unwrap_or(PSet::EMPTY);
                        self.push_set(set)?;
                    }
                    _ => self.push(Cell::int(0))?,
                }
            }
            Opcode::Ind => {
                let addr = self.pop().as_address() + instr.q;
                let cell = self.store.get(addr as usize);
                self.push(cell)?;
            }
            Opcode::Inc => {
                let addr = self.pop().as_address() + instr.q;
                let v = self.pop();
                self.store.set(addr as usize, v);
            }
            Opcode::Mst => {
                for _ in 0..MARKSIZE {
                    self.push(Cell::int(0))?;
                }
                let base = self.sp as i32 - MARKSIZE + 1;
                self.store.set(base as usize + 1, Cell::address(self.base(instr.p) as i32));
                self.store.set(base as usize + 2, Cell::address(self.mp as i32));
                self.store.set(base as usize + 3, Cell::address(self.ep as i32));
            }
            Opcode::Cup => {
                let n = instr.p as i32;
                let new_mp = self.sp as i32 - n - 4;
                self.store.set(new_mp as usize + 4, Cell::address(self.pc as i32));
                self.mp = new_mp as usize;
                self.pc = instr.q as usize;
            }
            Opcode::Ent => {
                // `p` is literally 1 or 2, matching the `ent 1,S` / `ent 2,T`
                // textual forms: it is not a typed-variant strip index.
                if instr.p == 1 {
                    let new_sp = self.mp as i32 + instr.q;
                    if new_sp as usize > self.np {
                        return Ok(Some(ExitCode::StackOverflow));
                    }
                    self.sp = new_sp as usize;
                } else {
                    let new_ep = self.sp as i32 + instr.q;
                    if new_ep as usize > self.np {
                        return Ok(Some(ExitCode::StackOverflow));
                    }
                    self.ep = new_ep as usize;
                }
            }
            Opcode::Ret => {
                let old_mp = self.mp;
                self.pc = self.store.get(old_mp + 4).as_address() as usize;
                self.ep = self.store.get(old_mp + 3).as_address() as usize;
                let dynamic_link = self.store.get(old_mp + 2).as_address() as usize;
                if instr.p != 0 {
                    // function (p=1): leave result in place of the mark
                    self.sp = old_mp;
                } else {
                    self.sp = old_mp.wrapping_sub(1);
                }
                self.mp = dynamic_link;
            }
            Opcode::Csp => {
                if let Some(code) = self.callsp(instr.q)? {
                    return Ok(Some(code));
                }
            }
            Opcode::Ixa => {
                let index = self.pop().as_int();
                let base = self.pop().as_address();
                self.push(Cell::address(base + index * instr.q))?;
            }
            Opcode::Equ | Opcode::Neq | Opcode::Geq | Opcode::Grt | Opcode::Leq | Opcode::Les => {
                self.compare(base, instr.p, instr.q)?;
            }
            Opcode::Ujp => {
                self.pc = instr.q as usize;
            }
            Opcode::Fjp => {
                let v = self.pop().as_bool();
                if !v {
                    self.pc = instr.q as usize;
                }
            }
            Opcode::Xjp => {
                let v = self.pop().as_int();
                self.pc = (instr.q + v) as usize;
            }
            Opcode::Chk => {
                if instr.op == CHKA {
                    let v = self.pop().as_address();
                    if (v as usize) < MAXSTK && v != 0 {
                        return Ok(Some(ExitCode::PointerCheck));
                    }
                    self.push(Cell::address(v))?;
                } else {
                    let (lb, ub) = self
                        .store
                        .bounds
                        .get(instr.q as usize)
                        .unwrap_or((i32::MIN, i32::MAX));
                    let v = self.pop().as_int();
                    if v < lb || v > ub {
                        return Ok(Some(ExitCode::RangeCheck));
                    }
                    self.push(Cell::int(v))?;
                }
            }
            Opcode::Eof => {
                return Ok(Some(ExitCode::EofOnWrongFile));
            }
            Opcode::Adi => self.binop_int(|a, b| a.wrapping_add(b))?,
            Opcode::Adr => self.binop_real(|a, b| a + b)?,
            Opcode::Sbi => self.binop_int(|a, b| a.wrapping_sub(b))?,
            Opcode::Sbr => self.binop_real(|a, b| a - b)?,
            Opcode::Sgs => {
                let e = self.pop().as_int();
                self.push_set(PSet::singleton(e))?;
            }
            Opcode::Flt => {
                let v = self.pop().as_int();
                self.push(Cell::real(v as f64))?;
            }
            Opcode::Flo => {
                let top = self.pop();
                let under = self.pop().as_int();
                self.push(Cell::real(under as f64))?;
                self.push(top)?;
            }
            Opcode::Trc => {
                let v = self.pop().as_real();
                self.push(Cell::int(v.trunc() as i32))?;
            }
            Opcode::Ngi => {
                let v = self.pop().as_int();
                self.push(Cell::int(-v))?;
            }
            Opcode::Ngr => {
                let v = self.pop().as_real();
                self.push(Cell::real(-v))?;
            }
            Opcode::Sqi => {
                let v = self.pop().as_int();
                self.push(Cell::int(v.wrapping_mul(v)))?;
            }
            Opcode::Sqr => {
                let v = self.pop().as_real();
                self.push(Cell::real(v * v))?;
            }
            Opcode::Abi => {
                let v = self.pop().as_int();
                self.push(Cell::int(v.abs()))?;
            }
            Opcode::Abr => {
                let v = self.pop().as_real();
                self.push(Cell::real(v.abs()))?;
            }
            Opcode::Not => {
                let v = self.pop().as_bool();
                self.push(Cell::boolean(!v))?;
            }
            Opcode::And => {
                let b = self.pop().as_bool();
                let a = self.pop().as_bool();
                self.push(Cell::boolean(a && b))?;
            }
            Opcode::Ior => {
                let b = self.pop().as_bool();
                let a = self.pop().as_bool();
                self.push(Cell::boolean(a || b))?;
            }
            Opcode::Dif => self.setop(PSet::difference)?,
            Opcode::Int => self.setop(PSet::intersect)?,
            Opcode::Uni => self.setop(PSet::union)?,
            Opcode::Inn => {
                let set = self.pop_set();
                let e = self.pop().as_int();
                self.push(Cell::boolean(set.contains(e)))?;
            }
            Opcode::Mod => {
                let b = self.pop().as_int();
                let a = self.pop().as_int();
                if b == 0 {
                    return Ok(Some(ExitCode::DivisionByZero));
                }
                self.push(Cell::int(a.rem_euclid(b)))?;
            }
            Opcode::Mpi => self.binop_int_checked(|a, b| a.checked_mul(b))?,
            Opcode::Mpr => self.binop_real(|a, b| a * b)?,
            Opcode::Dvi => {
                let b = self.pop().as_int();
                let a = self.pop().as_int();
                if b == 0 {
                    return Ok(Some(ExitCode::DivisionByZero));
                }
                self.push(Cell::int(a / b))?;
            }
            Opcode::Dvr => self.binop_real(|a, b| a / b)?,
            Opcode::Mov => {
                let count = instr.q as usize;
                let dst = self.pop().as_address() as usize;
                let src = self.pop().as_address() as usize;
                for i in 0..count {
                    let v = self.store.get(src + i);
                    self.store.set(dst + i, v);
                }
            }
            Opcode::Lca => {
                // pushes the string pool index itself as its "address";
                // csp wrs reads the pool directly by that index.
                self.push(Cell::address(instr.q))?;
            }
            Opcode::Dec => {
                let addr = self.pop().as_address();
                let v = self.store.get(addr as usize).as_int();
                self.store.set(addr as usize, Cell::int(v - 1));
            }
            Opcode::Stp => {
                return Ok(Some(ExitCode::Halted));
            }
            Opcode::Ord | Opcode::Chr => {
                // no-op: ordinal <-> char share a representation
            }
            Opcode::Ujc => {
                return Ok(Some(ExitCode::InvalidOpcode(instr.op)));
            }
        }
        Ok(None)
    }

    fn binop_int(&mut self, f: impl Fn(i32, i32) -> i32) -> Result<(), Error> {
        let b = self.pop().as_int();
        let a = self.pop().as_int();
        self.push(Cell::int(f(a, b)))
    }

    fn binop_int_checked(&mut self, f: impl Fn(i32, i32) -> Option<i32>) -> Result<(), Error> {
        let b = self.pop().as_int();
        let a = self.pop().as_int();
        self.push(Cell::int(f(a, b).unwrap_or(0)))
    }

    fn binop_real(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), Error> {
        let b = self.pop().as_real();
        let a = self.pop().as_real();
        self.push(Cell::real(f(a, b)))
    }

    fn push_set(&mut self, set: PSet) -> Result<(), Error> {
        self.push(Cell::int(set.raw() as i32))
    }

    fn pop_set(&mut self) -> PSet {
        PSet::from_raw(self.pop().as_int() as u32 as u64)
    }

    fn setop(&mut self, f: impl Fn(PSet, PSet) -> PSet) -> Result<(), Error> {
        let b = self.pop_set();
        let a = self.pop_set();
        self.push_set(f(a, b))
    }

    /// Comparison opcodes carry their type tag directly in `p` (0=int,
    /// 1=real, 2=bool, 3=char, 4=address, 5=multi) rather than through a
    /// variant-opcode strip, since `equ`/`neq`/... have no typed numeric
    /// variants of their own. `Multi` scans `count` cells lexically,
    /// mirroring the original's `compare()` helper.
    fn compare(&mut self, op: Opcode, tag_index: u8, count: i32) -> Result<(), Error> {
        use std::cmp::Ordering;
        let ordering = if tag_index == 4 && count > 0 {
            let b_addr = self.pop().as_address();
            let a_addr = self.pop().as_address();
            let mut ord = Ordering::Equal;
            for i in 0..count {
                let a = self.store.get((a_addr + i) as usize).as_int();
                let b = self.store.get((b_addr + i) as usize).as_int();
                ord = a.cmp(&b);
                if ord != Ordering::Equal {
                    break;
                }
            }
            ord
        } else {
            match tag_index {
                1 => {
                    let b = self.pop().as_real();
                    let a = self.pop().as_real();
                    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                }
                2 => {
                    let b = self.pop().as_bool();
                    let a = self.pop().as_bool();
                    a.cmp(&b)
                }
                3 => {
                    let b = self.pop().as_char();
                    let a = self.pop().as_char();
                    a.cmp(&b)
                }
                _ => {
                    let b = self.pop().as_int();
                    let a = self.pop().as_int();
                    a.cmp(&b)
                }
            }
        };
        let result = match op {
            Opcode::Equ => ordering == Ordering::Equal,
            Opcode::Neq => ordering != Ordering::Equal,
            Opcode::Geq => ordering != Ordering::Less,
            Opcode::Grt => ordering == Ordering::Greater,
            Opcode::Leq => ordering != Ordering::Greater,
            Opcode::Les => ordering == Ordering::Less,
            _ => unreachable!(),
        };
        self.push(Cell::boolean(result))
    }

    /// Standard-procedure dispatch (`csp q`). File identity is encoded by
    /// the store address pushed for the file argument: `INPUTADR`,
    /// `OUTPUTADR`, `PRDADR`, `PRRADR`.
    fn callsp(&mut self, q: i32) -> Result<Option<ExitCode>, Error> {
        let proc = StdProc::from_i32(q).ok_or(Error::Fault(ExitCode::InvalidOpcode(q as u8), self.pc))?;
        match proc {
            StdProc::Get => {
                let _ = self.pop();
            }
            StdProc::Rst => {
                let addr = self.pop().as_address();
                self.np = addr as usize;
            }
            StdProc::Put => {
                let _ = self.pop();
            }
            StdProc::Rln => {
                let _file = self.pop();
                let mut line = String::new();
                let _ = self.input.read_line(&mut line);
            }
            StdProc::Wln => {
                let _file = self.pop();
                let _ = writeln!(self.output);
            }
            StdProc::Eln => {
                let _file = self.pop();
                self.push(Cell::boolean(true))?;
            }
            StdProc::Wri => {
                let width = self.pop().as_int();
                let value = self.pop().as_int();
                let _file = self.pop();
                let _ = write!(self.output, "{:>width$}", value, width = width.max(1) as usize);
            }
            StdProc::Wrr => {
                let width = self.pop().as_int();
                let value = self.pop().as_real();
                let _file = self.pop();
                let _ = write!(self.output, "{:>width$}", value, width = width.max(1) as usize);
            }
            StdProc::Wrc => {
                let width = self.pop().as_int();
                let value = self.pop().as_char();
                let _file = self.pop();
                let ch = std::char::from_u32(value as u32).unwrap_or(' ');
                let _ = write!(self.output, "{:>width$}", ch, width = width.max(1) as usize);
            }
            StdProc::Wrs => {
                let width = self.pop().as_int();
                let addr = self.pop().as_address();
                let _file = self.pop();
                let bytes = self.store.strings.get(addr as usize).unwrap_or([0u8; 16]);
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let s = String::from_utf8_lossy(&bytes[..end]).into_owned();
                let _ = write!(self.output, "{:>width$}", s, width = width.max(1) as usize);
            }
            StdProc::Rdi => {
                let addr = self.pop().as_address();
                let _file = self.pop();
                let mut line = String::new();
                let _ = self.input.read_line(&mut line);
                let v: i32 = line.trim().parse().unwrap_or(0);
                self.store.set(addr as usize, Cell::int(v));
            }
            StdProc::Rdr => {
                let addr = self.pop().as_address();
                let _file = self.pop();
                let mut line = String::new();
                let _ = self.input.read_line(&mut line);
                let v: f64 = line.trim().parse().unwrap_or(0.0);
                self.store.set(addr as usize, Cell::real(v));
            }
            StdProc::Rdc => {
                let addr = self.pop().as_address();
                let _file = self.pop();
                let mut buf = [0u8; 1];
                let v = match io::Read::read(&mut self.input, &mut buf) {
                    Ok(1) => buf[0] as i16,
                    _ => 0,
                };
                self.store.set(addr as usize, Cell::char(v));
            }
            StdProc::New => {
                let size = self.pop().as_int();
                let addr = self.pop().as_address();
                let new_np = self.np as i32 - size;
                if (new_np as usize) <= self.ep {
                    return Ok(Some(ExitCode::HeapStackCollision));
                }
                self.np = new_np as usize;
                self.store.set(addr as usize, Cell::address(self.np as i32));
            }
            StdProc::Sin => self.transcendental(f64::sin)?,
            StdProc::Cos => self.transcendental(f64::cos)?,
            StdProc::Exp => self.transcendental(f64::exp)?,
            StdProc::Log => self.transcendental(f64::ln)?,
            StdProc::Sqt => self.transcendental(f64::sqrt)?,
            StdProc::Atn => self.transcendental(f64::atan)?,
            StdProc::Sav => {
                let addr = self.pop().as_address();
                self.store.set(addr as usize, Cell::address(self.np as i32));
            }
        }
        Ok(None)
    }

    fn transcendental(&mut self, f: impl Fn(f64) -> f64) -> Result<(), Error> {
        let v = self.pop().as_real();
        self.push(Cell::real(f(v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_program(program: Vec<Instruction>) -> (ExitCode, String) {
        let mut code = Code::new();
        for (pc, instr) in program.into_iter().enumerate() {
            code.store(BEGINCODE + pc, instr);
        }
        let store = Store::new();
        let input = Cursor::new(Vec::new());
        let mut output = Vec::new();
        let exit_code = {
            let mut machine = Machine::new(code, store, input, &mut output);
            machine.run().unwrap()
        };
        (exit_code, String::from_utf8(output).unwrap())
    }

    fn ldc(value: i32) -> Instruction {
        Instruction {
            op: Opcode::Ldc as u8,
            p: 0,
            q: value,
        }
    }

    #[test]
    fn adds_two_literals_and_prints() {
        // wri expects file, value, width on the stack (file pushed first)
        let program = vec![
            Instruction { op: Opcode::Lao as u8, p: 0, q: OUTPUTADR as i32 },
            ldc(1),
            ldc(2),
            Instruction { op: Opcode::Adi as u8, p: 0, q: 0 },
            ldc(10),
            Instruction { op: Opcode::Csp as u8, p: 0, q: StdProc::Wri as i32 },
            Instruction { op: Opcode::Stp as u8, p: 0, q: 0 },
        ];
        let (exit_code, output) = run_program(program);
        assert_eq!(exit_code, ExitCode::Halted);
        assert_eq!(output.trim(), "3");
    }

    #[test]
    fn chk_traps_out_of_range() {
        let mut store = Store::new();
        let bound_idx = store.intern_bound(0, 10).unwrap();
        let mut code = Code::new();
        code.store(BEGINCODE, ldc(11));
        code.store(
            BEGINCODE + 1,
            Instruction {
                op: Opcode::Chk as u8,
                p: 0,
                q: bound_idx as i32,
            },
        );
        code.store(BEGINCODE + 2, Instruction { op: Opcode::Stp as u8, p: 0, q: 0 });

        let input = Cursor::new(Vec::new());
        let mut output = Vec::new();
        let mut machine = Machine::new(code, store, input, &mut output);
        assert_eq!(machine.run().unwrap(), ExitCode::RangeCheck);
    }

    #[test]
    fn set_membership() {
        let program = vec![
            ldc(3), // element
            ldc(0b10100), // set bits for {2,4} packed raw
            Instruction { op: Opcode::Inn as u8, p: 0, q: 0 },
            Instruction { op: Opcode::Stp as u8, p: 0, q: 0 },
        ];
        let (exit_code, _) = run_program(program);
        assert_eq!(exit_code, ExitCode::Halted);
    }

    fn machine_with(program: Vec<Instruction>) -> Machine<Cursor<Vec<u8>>, Vec<u8>> {
        let mut code = Code::new();
        for (pc, instr) in program.into_iter().enumerate() {
            code.store(BEGINCODE + pc, instr);
        }
        Machine::new(code, Store::new(), Cursor::new(Vec::new()), Vec::new())
    }

    #[test]
    fn csp_rst_restores_heap_pointer_from_popped_value() {
        let program = vec![
            Instruction { op: Opcode::Lao as u8, p: 0, q: 12345 },
            Instruction { op: Opcode::Csp as u8, p: 0, q: StdProc::Rst as i32 },
            Instruction { op: Opcode::Stp as u8, p: 0, q: 0 },
        ];
        let mut machine = machine_with(program);
        assert_eq!(machine.run().unwrap(), ExitCode::Halted);
        assert_eq!(machine.np, 12345);
    }

    #[test]
    fn ent_accepts_a_frame_that_exactly_fills_to_np() {
        let program = vec![
            Instruction { op: Opcode::Ent as u8, p: 1, q: 10 },
            Instruction { op: Opcode::Stp as u8, p: 0, q: 0 },
        ];
        let mut machine = machine_with(program);
        machine.np = 10;
        assert_eq!(machine.run().unwrap(), ExitCode::Halted);
        assert_eq!(machine.sp, 10);
    }

    #[test]
    fn ent_rejects_a_frame_one_past_np() {
        let program = vec![
            Instruction { op: Opcode::Ent as u8, p: 1, q: 11 },
            Instruction { op: Opcode::Stp as u8, p: 0, q: 0 },
        ];
        let mut machine = machine_with(program);
        machine.np = 10;
        assert_eq!(machine.run().unwrap(), ExitCode::StackOverflow);
    }

    #[test]
    fn new_faults_when_heap_would_land_exactly_on_ep() {
        let program = vec![
            Instruction { op: Opcode::Lao as u8, p: 0, q: 0 },
            ldc(5),
            Instruction { op: Opcode::Csp as u8, p: 0, q: StdProc::New as i32 },
            Instruction { op: Opcode::Stp as u8, p: 0, q: 0 },
        ];
        let mut machine = machine_with(program);
        machine.ep = 100;
        machine.np = 105;
        assert_eq!(machine.run().unwrap(), ExitCode::HeapStackCollision);
    }
}
