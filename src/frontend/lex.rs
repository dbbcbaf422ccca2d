//! The lexer for the textual IR surface syntax (SPEC_FULL §A, DESIGN.md
//! Open Question OQ-1).
//!
//! Grounded structurally on `parishoffman-smol/src/front/lex.rs`: a
//! `Lexer` driven by a whitespace/comment regex plus an ordered list of
//! `(Regex, TokenKind)` matchers, tried in order so that longer operators
//! (`<=`, `<<`) are matched before their single-character prefixes (`<`).

use derive_more::Display;
use regex::Regex;

use crate::common::Loc;

/// Token classes recognized by the textual IR surface syntax.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum TokenKind {
    #[display("identifier")]
    Ident,
    #[display("integer")]
    Int,
    #[display("string")]
    Str,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(":")]
    Colon,
    #[display(",")]
    Comma,
    #[display("=")]
    Eq,
    #[display("@")]
    At,
    #[display("*")]
    Star,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("&&")]
    AndAnd,
    #[display("&")]
    Amp,
    #[display("||")]
    OrOr,
    #[display("|")]
    Pipe,
    #[display("^")]
    Caret,
    #[display("<<")]
    Shl,
    #[display(">>")]
    Shr,
    #[display("<=")]
    Leq,
    #[display(">=")]
    Geq,
    #[display("==")]
    EqEq,
    #[display("!=")]
    Neq,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("/")]
    Slash,
    #[display("%")]
    Percent,
    #[display("!")]
    Bang,
    #[display("~")]
    Tilde,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub loc: Loc,
}

pub struct LexError {
    pub ch: char,
    pub loc: Loc,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unexpected character {:?} at {}", self.ch, self.loc)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: u32,
    col: u32,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        // Ordered so multi-character operators are tried before any
        // single-character operator that is one of their prefixes.
        let matchers = vec![
            (Regex::new(r#"\A"(?:[^"\\]|\\.)*""#).unwrap(), TokenKind::Str),
            (Regex::new(r"\A0[xX][0-9a-fA-F]+").unwrap(), TokenKind::Int),
            (Regex::new(r"\A[0-9]+").unwrap(), TokenKind::Int),
            (Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(), TokenKind::Ident),
            (Regex::new(r"\A<<").unwrap(), TokenKind::Shl),
            (Regex::new(r"\A>>").unwrap(), TokenKind::Shr),
            (Regex::new(r"\A<=").unwrap(), TokenKind::Leq),
            (Regex::new(r"\A>=").unwrap(), TokenKind::Geq),
            (Regex::new(r"\A==").unwrap(), TokenKind::EqEq),
            (Regex::new(r"\A!=").unwrap(), TokenKind::Neq),
            (Regex::new(r"\A&&").unwrap(), TokenKind::AndAnd),
            (Regex::new(r"\A\|\|").unwrap(), TokenKind::OrOr),
            (Regex::new(r"\A\(").unwrap(), TokenKind::LParen),
            (Regex::new(r"\A\)").unwrap(), TokenKind::RParen),
            (Regex::new(r"\A\{").unwrap(), TokenKind::LBrace),
            (Regex::new(r"\A\}").unwrap(), TokenKind::RBrace),
            (Regex::new(r"\A\[").unwrap(), TokenKind::LBracket),
            (Regex::new(r"\A\]").unwrap(), TokenKind::RBracket),
            (Regex::new(r"\A:").unwrap(), TokenKind::Colon),
            (Regex::new(r"\A,").unwrap(), TokenKind::Comma),
            (Regex::new(r"\A=").unwrap(), TokenKind::Eq),
            (Regex::new(r"\A@").unwrap(), TokenKind::At),
            (Regex::new(r"\A\*").unwrap(), TokenKind::Star),
            (Regex::new(r"\A\+").unwrap(), TokenKind::Plus),
            (Regex::new(r"\A-").unwrap(), TokenKind::Minus),
            (Regex::new(r"\A&").unwrap(), TokenKind::Amp),
            (Regex::new(r"\A\|").unwrap(), TokenKind::Pipe),
            (Regex::new(r"\A\^").unwrap(), TokenKind::Caret),
            (Regex::new(r"\A<").unwrap(), TokenKind::Lt),
            (Regex::new(r"\A>").unwrap(), TokenKind::Gt),
            (Regex::new(r"\A/").unwrap(), TokenKind::Slash),
            (Regex::new(r"\A%").unwrap(), TokenKind::Percent),
            (Regex::new(r"\A!").unwrap(), TokenKind::Bang),
            (Regex::new(r"\A~").unwrap(), TokenKind::Tilde),
        ];
        Lexer {
            input,
            pos: 0,
            line: 0,
            col: 0,
            whitespace: Regex::new(r"\A(?:[ \t\r\n]|(?:;[^\n]*))*").unwrap(),
            matchers,
        }
    }

    pub fn end_of_input(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn loc(&self) -> Loc {
        Loc { line: self.line, col: self.col }
    }

    /// Advance `pos`/`line`/`col` past `text`, which must begin at `pos`.
    fn advance(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }
        self.pos += text.len();
    }

    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            let matched = m.as_str().to_string();
            self.advance(&matched);
        }
    }

    /// Get the next token, or `None` at end of input.
    pub fn next(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        let mut found = None;
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                found = Some((m.as_str().to_string(), *kind));
                break;
            }
        }
        if let Some((text, kind)) = found {
            let loc = self.loc();
            self.advance(&text);
            return Ok(Some(Token { kind, text, loc }));
        }
        Err(LexError {
            ch: rest.chars().next().unwrap(),
            loc: self.loc(),
        })
    }

    /// Tokenize the whole input eagerly.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(tok) = self.next()? {
            tokens.push(tok);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_a_global_declaration() {
        let tokens = Lexer::new("global int x = 7").tokenize().unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Ident, TokenKind::Eq, TokenKind::Int]);
    }

    #[test]
    fn comment_lines_are_skipped() {
        let tokens = Lexer::new("; a comment\nreturn").tokenize().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "return");
    }

    #[test]
    fn maximal_munch_prefers_longer_operators() {
        let tokens = Lexer::new("<= << <").tokenize().unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Leq, TokenKind::Shl, TokenKind::Lt]);
    }

    #[test]
    fn unknown_character_is_a_lex_error() {
        assert!(Lexer::new("$").tokenize().is_err());
    }
}
