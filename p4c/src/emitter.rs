//! Textual P-code writer (spec §4.4): typed mnemonics, label generation,
//! per-routine literal occurrence bookkeeping, and `topnew`/`topmax`
//! expression-stack depth tracking patched into the `ent 2,T` operand at
//! routine end.
//!
//! Literal interning itself happens later, in the assembler (spec §4.5);
//! this module only ever writes text.

use p4vm::opcode::TypeTag;
use std::fmt::Write as _;

pub struct Emitter {
    out: String,
    next_label: u32,
    instr_count: u32,
    /// Current depth of temporaries pushed below the local frame by the
    /// routine being emitted, and the high-water mark seen so far —
    /// `ent 2,<label>` is equated to `topmax` once the routine ends. This
    /// is a simplified stand-in for the original's `cdx[]`/`pdx[]`
    /// per-opcode delta tables: every push-like emit bumps `topnew` by one
    /// cell, every pop-like emit by minus one, good enough to size the
    /// expression-evaluation reserve without replicating the full table.
    topnew: i32,
    topmax: i32,
}

impl Emitter {
    pub fn new() -> Emitter {
        Emitter {
            out: String::new(),
            next_label: 0,
            instr_count: 0,
            topnew: 0,
            topmax: 0,
        }
    }

    pub fn new_label(&mut self) -> u32 {
        self.next_label += 1;
        self.next_label
    }

    pub fn define_label(&mut self, label: u32) {
        writeln!(self.out, "l{}", label).unwrap();
    }

    pub fn equate_label(&mut self, label: u32, value: i32) {
        writeln!(self.out, "l{}={}", label, value).unwrap();
    }

    pub fn end_proc(&mut self) {
        writeln!(self.out, "q").unwrap();
    }

    /// Resets per-routine stack-depth tracking; called at the start of
    /// each procedure/function body.
    pub fn reset_depth(&mut self) {
        self.topnew = 0;
        self.topmax = 0;
    }

    pub fn topmax(&self) -> i32 {
        self.topmax
    }

    fn track(&mut self, delta: i32) {
        self.topnew += delta;
        if self.topnew > self.topmax {
            self.topmax = self.topnew;
        }
    }

    fn line(&mut self, mnemonic: &str, type_letter: Option<char>, operands: &[String], delta: i32) {
        self.track(delta);
        self.out.push(' ');
        self.out.push_str(mnemonic);
        if let Some(c) = type_letter {
            self.out.push(c);
        }
        for operand in operands {
            self.out.push(' ');
            self.out.push_str(operand);
        }
        self.out.push('\n');
        self.instr_count += 1;
        if self.instr_count % 10 == 0 {
            writeln!(self.out, "i{}", self.instr_count).unwrap();
        }
    }

    pub fn lod(&mut self, tag: TypeTag, level_delta: u8, displ: i32) {
        self.line("lod", Some(tag.letter()), &[level_delta.to_string(), displ.to_string()], 1);
    }

    pub fn ldo(&mut self, tag: TypeTag, addr: i32) {
        self.line("ldo", Some(tag.letter()), &[addr.to_string()], 1);
    }

    pub fn str_(&mut self, tag: TypeTag, level_delta: u8, displ: i32) {
        self.line("str", Some(tag.letter()), &[level_delta.to_string(), displ.to_string()], -1);
    }

    pub fn sro(&mut self, tag: TypeTag, addr: i32) {
        self.line("sro", Some(tag.letter()), &[addr.to_string()], -1);
    }

    pub fn lda(&mut self, level_delta: u8, displ: i32) {
        self.line("lda", None, &[level_delta.to_string(), displ.to_string()], 1);
    }

    pub fn lao(&mut self, addr: i32) {
        self.line("lao", None, &[addr.to_string()], 1);
    }

    pub fn sto(&mut self, tag: TypeTag) {
        self.line("sto", Some(tag.letter()), &[], -2);
    }

    pub fn ldc_int(&mut self, value: i64) {
        self.line("ldc", Some('i'), &[value.to_string()], 1);
    }

    pub fn ldc_real(&mut self, value: f64) {
        self.line("ldc", Some('r'), &[format_real(value)], 1);
    }

    pub fn ldc_bool(&mut self, value: bool) {
        self.line("ldc", Some('b'), &[(value as i32).to_string()], 1);
    }

    pub fn ldc_char(&mut self, value: char) {
        self.line("ldc", Some('c'), &[format!("'{}'", escape_char(value))], 1);
    }

    pub fn ldc_nil(&mut self) {
        self.line("ldc", None, &[], 1);
    }

    pub fn ldc_set(&mut self, elements: &[i32]) {
        let list = format!("({})", elements.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(","));
        self.line("ldc", Some('s'), &[list], 1);
    }

    pub fn ind(&mut self, tag: TypeTag, displ: i32) {
        self.line("ind", Some(tag.letter()), &[displ.to_string()], 0);
    }

    pub fn inc(&mut self, tag: TypeTag, displ: i32) {
        self.line("inc", Some(tag.letter()), &[displ.to_string()], -2);
    }

    pub fn mst(&mut self, level_delta: u8) {
        self.line("mst", None, &[level_delta.to_string()], 5);
    }

    pub fn cup(&mut self, nparams: i32, label: u32) {
        self.line("cup", None, &[nparams.to_string(), format!("l{}", label)], -nparams - 4);
    }

    pub fn ent1(&mut self, label: u32) {
        self.line("ent", None, &["1".to_string(), format!("l{}", label)], 0);
    }

    pub fn ent2(&mut self, label: u32) {
        self.line("ent", None, &["2".to_string(), format!("l{}", label)], 0);
    }

    pub fn ret(&mut self, is_function: bool) {
        self.line("ret", if is_function { Some('i') } else { None }, &[], 0);
    }

    pub fn csp(&mut self, name: &str, delta: i32) {
        self.line("csp", None, &[name.to_string()], delta);
    }

    pub fn ixa(&mut self, elt_size: i32) {
        self.line("ixa", None, &[elt_size.to_string()], -1);
    }

    pub fn compare(&mut self, op: &str, tag_letter: char, count: Option<i32>) {
        let operands: Vec<String> = count.map(|c| vec![c.to_string()]).unwrap_or_default();
        self.line(op, Some(tag_letter), &operands, -1);
    }

    pub fn ujp(&mut self, label: u32) {
        self.line("ujp", None, &[format!("l{}", label)], 0);
    }

    pub fn fjp(&mut self, label: u32) {
        self.line("fjp", None, &[format!("l{}", label)], -1);
    }

    pub fn xjp(&mut self, label: u32) {
        self.line("xjp", None, &[format!("l{}", label)], -1);
    }

    pub fn chk_range(&mut self, lb: i64, ub: i64) {
        self.line("chk", None, &[format!("({},{})", lb, ub)], 0);
    }

    pub fn chk_addr(&mut self) {
        self.line("chk", Some('a'), &[], 0);
    }

    pub fn eof(&mut self) {
        self.line("eof", None, &[], 0);
    }

    pub fn arith(&mut self, mnemonic: &str) {
        self.line(mnemonic, None, &[], -1);
    }

    pub fn unary(&mut self, mnemonic: &str) {
        self.line(mnemonic, None, &[], 0);
    }

    pub fn sgs(&mut self) {
        self.line("sgs", None, &[], 0);
    }

    pub fn mov(&mut self, count: i32) {
        self.line("mov", None, &[count.to_string()], -2);
    }

    pub fn lca(&mut self, text: &str) {
        self.line("lca", None, &[format!("'{}'", text.replace('\'', "''"))], 1);
    }

    pub fn dec(&mut self, addr: i32) {
        self.line("dec", None, &[addr.to_string()], -1);
    }

    pub fn stp(&mut self) {
        self.line("stp", None, &[], 0);
    }

    pub fn ujc(&mut self) {
        self.line("ujc", None, &[], 0);
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

impl Default for Emitter {
    fn default() -> Emitter {
        Emitter::new()
    }
}

fn format_real(value: f64) -> String {
    if value == value.trunc() {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn escape_char(c: char) -> String {
    if c == '\'' {
        "''".to_string()
    } else {
        c.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_monotonic() {
        let mut e = Emitter::new();
        assert_eq!(e.new_label(), 1);
        assert_eq!(e.new_label(), 2);
    }

    #[test]
    fn emitting_tracks_topmax() {
        let mut e = Emitter::new();
        e.reset_depth();
        e.ldc_int(1);
        e.ldc_int(2);
        e.arith("adi");
        assert_eq!(e.topmax(), 2);
    }

    #[test]
    fn instruction_lines_start_with_single_space() {
        let mut e = Emitter::new();
        e.stp();
        assert_eq!(e.into_string(), " stp\n");
    }

    #[test]
    fn label_definition_has_no_leading_space() {
        let mut e = Emitter::new();
        let l = e.new_label();
        e.define_label(l);
        assert_eq!(e.into_string(), "l1\n");
    }
}
