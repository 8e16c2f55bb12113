//! Converts the parse tree produced by [`crate::parser::P4Parser`] into a
//! small line-oriented AST the two assembler passes walk directly.

use crate::parser::Rule;
use pest::iterators::Pair;

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// An int or real literal; the instruction's category decides which.
    Number(f64),
    /// An `l<n>` reference to a label, resolved via the label table.
    Label(u32),
    /// A parenthesized `(e1,e2,...)` list: a set literal or a bound pair.
    List(Vec<i32>),
    /// A single-quoted string literal, doubled quotes already collapsed.
    Str(String),
    /// A bare lowercase name: the only form a `csp` operand takes.
    Ident(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstrLine {
    pub mnemonic: String,
    pub type_letter: Option<char>,
    pub operands: Vec<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Line {
    /// `l<n>` (equate is `None`, value = current pc) or `l<n>=<value>`.
    Label { number: u32, equate: Option<i32> },
    /// `q` alone on its line: end of a procedure's code.
    End,
    /// `i<slot>`, informational only.
    Info(u32),
    Instr(InstrLine),
}

fn parse_number(pair: Pair<Rule>) -> f64 {
    pair.as_str().parse().unwrap_or(0.0)
}

fn parse_signed_number(pair: Pair<Rule>) -> f64 {
    parse_number(pair)
}

fn parse_operand(pair: Pair<Rule>) -> Operand {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::label_ref => {
            let n: u32 = inner.as_str()[1..].parse().unwrap_or(0);
            Operand::Label(n)
        }
        Rule::set_literal => {
            let elements = inner
                .into_inner()
                .map(|p| parse_signed_number(p) as i32)
                .collect();
            Operand::List(elements)
        }
        Rule::string_literal => {
            let raw = inner.as_str();
            let body = &raw[1..raw.len() - 1];
            Operand::Str(body.replace("''", "'"))
        }
        Rule::identifier => Operand::Ident(inner.as_str().to_string()),
        Rule::signed_number => Operand::Number(parse_signed_number(inner)),
        other => unreachable!("unexpected operand rule {:?}", other),
    }
}

fn parse_instr_line(pair: Pair<Rule>) -> InstrLine {
    let mut mnemonic = String::new();
    let mut type_letter = None;
    let mut operands = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::mnemonic => mnemonic = inner.as_str().to_string(),
            Rule::type_letter => type_letter = inner.as_str().chars().next(),
            Rule::operand => operands.push(parse_operand(inner)),
            other => unreachable!("unexpected instr_line child {:?}", other),
        }
    }
    InstrLine {
        mnemonic,
        type_letter,
        operands,
    }
}

pub fn parse_line(pair: Pair<Rule>) -> Line {
    match pair.as_rule() {
        Rule::label_line => {
            let mut inner = pair.into_inner();
            let number: u32 = inner.next().unwrap().as_str().parse().unwrap_or(0);
            let equate = inner.next().map(|p| parse_signed_number(p) as i32);
            Line::Label { number, equate }
        }
        Rule::end_line => Line::End,
        Rule::info_line => {
            let slot: u32 = pair
                .into_inner()
                .next()
                .map(|p| p.as_str().parse().unwrap_or(0))
                .unwrap_or(0);
            Line::Info(slot)
        }
        Rule::instr_line => Line::Instr(parse_instr_line(pair)),
        other => unreachable!("unexpected line rule {:?}", other),
    }
}

pub fn parse_program(pair: Pair<Rule>) -> Vec<Line> {
    pair.into_inner()
        .filter(|p| p.as_rule() != Rule::EOI)
        .map(parse_line)
        .collect()
}
