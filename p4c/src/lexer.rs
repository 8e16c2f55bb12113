//! Character classification, token production, comment and compiler-option
//! handling (spec §4.1).

use crate::diagnostics::{Code, Diagnostics};
use crate::token::{Literal, Operator, Symbol, Token, RESERVED_WORDS};

/// Toggled by a `(*$x+,y-*)` compiler-option comment. Field names match
/// the four letters the original recognises: `t` prt-tables, `l` source
/// listing, `d` runtime-check emission, `c` code emission.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    pub tables: bool,
    pub listing: bool,
    pub debug_checks: bool,
    pub code_emission: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            tables: false,
            listing: false,
            debug_checks: true,
            code_emission: true,
        }
    }
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    pub options: Options,
}

const IDENT_MAX: usize = 8;
const STRING_MAX: usize = 16;

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Lexer<'a> {
        Lexer {
            chars: source.chars().peekable(),
            line: 1,
            options: Options::default(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Consumes whitespace and `(* ... *)` comments, applying any
    /// `(*$...*)` compiler-option directive found along the way.
    fn skip_trivia(&mut self, diags: &mut Diagnostics) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('(') => {
                    let mut clone = self.chars.clone();
                    clone.next();
                    if clone.peek() == Some(&'*') {
                        self.bump();
                        self.bump();
                        self.consume_comment(diags);
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn consume_comment(&mut self, diags: &mut Diagnostics) {
        let is_option = self.peek() == Some('$');
        if is_option {
            self.bump();
        }
        let mut body = String::new();
        loop {
            match self.bump() {
                Some('*') if self.peek() == Some(')') => {
                    self.bump();
                    break;
                }
                Some(c) => body.push(c),
                None => {
                    diags.push(self.line, Code::Unimplemented, "unterminated comment");
                    break;
                }
            }
        }
        if is_option {
            self.apply_options(&body);
        }
    }

    /// Applies a comma-separated list of single-letter `+`/`-` toggles.
    fn apply_options(&mut self, body: &str) {
        for item in body.split(',') {
            let item = item.trim();
            let mut chars = item.chars();
            if let (Some(letter), Some(sign)) = (chars.next(), chars.next()) {
                let on = sign == '+';
                match letter {
                    't' => self.options.tables = on,
                    'l' => self.options.listing = on,
                    'd' => self.options.debug_checks = on,
                    'c' => self.options.code_emission = on,
                    _ => {}
                }
            }
        }
    }

    /// Produces the next token, or the end-of-file sentinel once the
    /// character stream is exhausted.
    pub fn next_token(&mut self, diags: &mut Diagnostics) -> Token {
        self.skip_trivia(diags);
        let line = self.line;
        let c = match self.peek() {
            Some(c) => c,
            None => return Token::eof(line),
        };

        if c.is_ascii_alphabetic() {
            return self.lex_word(line);
        }
        if c.is_ascii_digit() {
            return self.lex_number(line);
        }
        match c {
            '\'' => self.lex_string(line),
            ':' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Token {
                        symbol: Symbol::Becomes,
                        operator: None,
                        literal: Literal::None,
                        name: String::new(),
                        line,
                    }
                } else {
                    sym_token(Symbol::Colon, line)
                }
            }
            '<' => {
                self.bump();
                let op = match self.peek() {
                    Some('=') => {
                        self.bump();
                        Operator::Le
                    }
                    Some('>') => {
                        self.bump();
                        Operator::Ne
                    }
                    _ => Operator::Lt,
                };
                rel_token(op, line)
            }
            '>' => {
                self.bump();
                let op = if self.peek() == Some('=') {
                    self.bump();
                    Operator::Ge
                } else {
                    Operator::Gt
                };
                rel_token(op, line)
            }
            '=' => {
                self.bump();
                rel_token(Operator::Eq, line)
            }
            '+' => {
                self.bump();
                add_token(Operator::Plus, line)
            }
            '-' => {
                self.bump();
                add_token(Operator::Minus, line)
            }
            '*' => {
                self.bump();
                mul_token(Operator::Mul, line)
            }
            '/' => {
                self.bump();
                mul_token(Operator::RDiv, line)
            }
            '(' => {
                self.bump();
                sym_token(Symbol::LParen, line)
            }
            ')' => {
                self.bump();
                sym_token(Symbol::RParen, line)
            }
            '[' => {
                self.bump();
                sym_token(Symbol::LBrack, line)
            }
            ']' => {
                self.bump();
                sym_token(Symbol::RBrack, line)
            }
            ',' => {
                self.bump();
                sym_token(Symbol::Comma, line)
            }
            ';' => {
                self.bump();
                sym_token(Symbol::Semicolon, line)
            }
            '.' => {
                self.bump();
                if self.peek() == Some('.') {
                    self.bump();
                    sym_token(Symbol::DotDot, line)
                } else {
                    sym_token(Symbol::Period, line)
                }
            }
            '^' | '@' => {
                self.bump();
                sym_token(Symbol::Arrow, line)
            }
            other => {
                self.bump();
                diags.push(line, Code::IllegalCharacter, format!("{:?}", other));
                self.next_token(diags)
            }
        }
    }

    fn lex_word(&mut self, line: u32) -> Token {
        let mut raw = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() {
                raw.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let folded = raw.to_ascii_lowercase();
        let name: String = folded.chars().take(IDENT_MAX).collect();
        if let Some((_, sym, op)) = RESERVED_WORDS.iter().find(|(kw, ..)| *kw == folded) {
            Token {
                symbol: *sym,
                operator: *op,
                literal: Literal::None,
                name,
                line,
            }
        } else {
            Token {
                symbol: Symbol::Ident,
                operator: None,
                literal: Literal::None,
                name,
                line,
            }
        }
    }

    fn lex_number(&mut self, line: u32) -> Token {
        let mut raw = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            raw.push(self.bump().unwrap());
        }
        let mut is_real = false;
        if self.peek() == Some('.') {
            let mut clone = self.chars.clone();
            clone.next();
            if matches!(clone.peek(), Some(c) if c.is_ascii_digit()) {
                is_real = true;
                raw.push(self.bump().unwrap());
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    raw.push(self.bump().unwrap());
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut clone = self.chars.clone();
            clone.next();
            let mut lookahead_ok = matches!(clone.peek(), Some(c) if c.is_ascii_digit());
            if matches!(clone.peek(), Some('+') | Some('-')) {
                clone.next();
                lookahead_ok = matches!(clone.peek(), Some(c) if c.is_ascii_digit());
            }
            if lookahead_ok {
                is_real = true;
                raw.push(self.bump().unwrap());
                if matches!(self.peek(), Some('+') | Some('-')) {
                    raw.push(self.bump().unwrap());
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    raw.push(self.bump().unwrap());
                }
            }
        }
        if is_real {
            Token {
                symbol: Symbol::RealConst,
                operator: None,
                literal: Literal::Real(raw.parse().unwrap_or(0.0)),
                name: String::new(),
                line,
            }
        } else {
            Token {
                symbol: Symbol::IntConst,
                operator: None,
                literal: Literal::Int(raw.parse().unwrap_or(0)),
                name: String::new(),
                line,
            }
        }
    }

    /// Single-quoted string; a doubled quote `''` inside one yields one
    /// literal quote character. Length is capped at 16 (spec §4.1).
    fn lex_string(&mut self, line: u32) -> Token {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('\'') => {
                    if self.peek() == Some('\'') {
                        self.bump();
                        s.push('\'');
                    } else {
                        break;
                    }
                }
                Some(c) => s.push(c),
                None => break,
            }
        }
        if s.chars().count() > STRING_MAX {
            s = s.chars().take(STRING_MAX).collect();
        }
        Token {
            symbol: Symbol::StringConst,
            operator: None,
            literal: Literal::Str(s),
            name: String::new(),
            line,
        }
    }
}

fn sym_token(symbol: Symbol, line: u32) -> Token {
    Token {
        symbol,
        operator: None,
        literal: Literal::None,
        name: String::new(),
        line,
    }
}

fn rel_token(op: Operator, line: u32) -> Token {
    Token {
        symbol: Symbol::RelOp,
        operator: Some(op),
        literal: Literal::None,
        name: String::new(),
        line,
    }
}

fn add_token(op: Operator, line: u32) -> Token {
    Token {
        symbol: Symbol::AddOp,
        operator: Some(op),
        literal: Literal::None,
        name: String::new(),
        line,
    }
}

fn mul_token(op: Operator, line: u32) -> Token {
    Token {
        symbol: Symbol::MulOp,
        operator: Some(op),
        literal: Literal::None,
        name: String::new(),
        line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut diags = Diagnostics::new();
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token(&mut diags);
            let eof = t.symbol == Symbol::Others;
            out.push(t);
            if eof {
                break;
            }
        }
        out
    }

    #[test]
    fn identifiers_fold_case_and_truncate() {
        let toks = tokens("FooBarBazQux");
        assert_eq!(toks[0].symbol, Symbol::Ident);
        assert_eq!(toks[0].name, "foobarba");
    }

    #[test]
    fn reserved_words_recognised() {
        let toks = tokens("begin end");
        assert_eq!(toks[0].symbol, Symbol::Begin);
        assert_eq!(toks[1].symbol, Symbol::End);
    }

    #[test]
    fn real_literal_with_exponent() {
        let toks = tokens("3.14e2");
        assert_eq!(toks[0].symbol, Symbol::RealConst);
        assert!(matches!(toks[0].literal, Literal::Real(v) if (v - 314.0).abs() < 1e-9));
    }

    #[test]
    fn doubled_quote_collapses() {
        let toks = tokens("'it''s'");
        assert_eq!(toks[0].literal, Literal::Str("it's".to_string()));
    }

    #[test]
    fn option_comment_toggles_flags() {
        let mut lexer = Lexer::new("(*$d-,c-*) begin");
        let mut diags = Diagnostics::new();
        let t = lexer.next_token(&mut diags);
        assert_eq!(t.symbol, Symbol::Begin);
        assert!(!lexer.options.debug_checks);
        assert!(!lexer.options.code_emission);
    }

    #[test]
    fn dotdot_is_one_token() {
        let toks = tokens("1..10");
        assert_eq!(toks[0].symbol, Symbol::IntConst);
        assert_eq!(toks[1].symbol, Symbol::DotDot);
        assert_eq!(toks[2].symbol, Symbol::IntConst);
    }

    #[test]
    fn illegal_character_reported_and_skipped() {
        let mut lexer = Lexer::new("# begin");
        let mut diags = Diagnostics::new();
        let t = lexer.next_token(&mut diags);
        assert_eq!(t.symbol, Symbol::Begin);
        assert!(!diags.is_empty());
    }
}
