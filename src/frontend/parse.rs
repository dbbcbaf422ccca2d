//! The recursive-descent parser for the textual IR surface syntax.
//!
//! Grounded structurally on `parishoffman-smol/src/front/parse.rs`: a
//! `Parser` over a flat token vector with simple `peek`/`expect` helpers,
//! reusing the crate-wide `ParseError` (spec.md §7) rather than a local
//! one, since every frontend diagnostic already needs to flow through the
//! same `CompileError::Parse` path the backend's own errors use.

use crate::error::ParseError;
use crate::frontend::ast::*;
use crate::frontend::lex::{Lexer, Token, TokenKind};

const BASE_TYPES: &[&str] = &[
    "char",
    "uchar",
    "short",
    "ushort",
    "int",
    "uint",
    "long",
    "ulong",
    "longlong",
    "ulonglong",
    "ptr",
    "void",
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| t.kind)
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn check_kind(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn check_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::Ident && t.text == word)
    }

    fn peek_is_label(&self) -> bool {
        self.peek_kind() == Some(TokenKind::Ident) && self.peek_kind_at(1) == Some(TokenKind::Colon)
    }

    fn err_here(&self, message: impl Into<String>) -> ParseError {
        let loc = self.peek().map(|t| t.loc);
        ParseError::new(message, loc)
    }

    fn expect_kind(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check_kind(kind) {
            Ok(self.bump())
        } else {
            let found = self.peek().map(|t| t.kind.to_string()).unwrap_or_else(|| "end of input".to_string());
            Err(self.err_here(format!("expected {kind}, found {found}")))
        }
    }

    fn expect_ident_kw(&mut self, word: &str) -> Result<(), ParseError> {
        if self.check_ident(word) {
            self.bump();
            Ok(())
        } else {
            Err(self.err_here(format!("expected '{word}'")))
        }
    }

    fn expect_ident_name(&mut self) -> Result<String, ParseError> {
        let tok = self.expect_kind(TokenKind::Ident)?;
        Ok(tok.text)
    }

    fn parse_uint(&mut self) -> Result<usize, ParseError> {
        let tok = self.expect_kind(TokenKind::Int)?;
        parse_int_text(&tok.text).map(|v| v as usize).ok_or_else(|| ParseError::new(format!("malformed integer literal '{}'", tok.text), Some(tok.loc)))
    }

    fn parse_signed_int(&mut self) -> Result<i64, ParseError> {
        let negate = if self.check_kind(TokenKind::Minus) {
            self.bump();
            true
        } else {
            false
        };
        let tok = self.expect_kind(TokenKind::Int)?;
        let v = parse_int_text(&tok.text).ok_or_else(|| ParseError::new(format!("malformed integer literal '{}'", tok.text), Some(tok.loc)))?;
        Ok(if negate { -v } else { v })
    }

    fn parse_binop(&mut self) -> Result<BinOpTok, ParseError> {
        let tok = self.bump();
        use TokenKind::*;
        Ok(match tok.kind {
            Plus => BinOpTok::Add,
            Minus => BinOpTok::Sub,
            Amp => BinOpTok::And,
            Pipe => BinOpTok::Or,
            Caret => BinOpTok::Xor,
            Shl => BinOpTok::Shl,
            Shr => BinOpTok::Shr,
            AndAnd => BinOpTok::LogicalAnd,
            OrOr => BinOpTok::LogicalOr,
            Star => BinOpTok::Mul,
            Slash => BinOpTok::Div,
            Percent => BinOpTok::Rem,
            EqEq => BinOpTok::Equ,
            Neq => BinOpTok::Neq,
            Lt => BinOpTok::Lt,
            Gt => BinOpTok::Gt,
            Leq => BinOpTok::Leq,
            Geq => BinOpTok::Geq,
            other => return Err(ParseError::new(format!("expected a binary operator, found {other}"), Some(tok.loc))),
        })
    }

    fn parse_cmpop(&mut self) -> Result<CmpOpTok, ParseError> {
        let tok = self.bump();
        use TokenKind::*;
        Ok(match tok.kind {
            EqEq => CmpOpTok::Equ,
            Neq => CmpOpTok::Neq,
            Lt => CmpOpTok::Lt,
            Gt => CmpOpTok::Gt,
            Leq => CmpOpTok::Leq,
            Geq => CmpOpTok::Geq,
            other => return Err(ParseError::new(format!("expected a comparison operator, found {other}"), Some(tok.loc))),
        })
    }

    fn parse_typespec(&mut self) -> Result<TypeSpec, ParseError> {
        let tok = self.expect_kind(TokenKind::Ident)?;
        if !BASE_TYPES.contains(&tok.text.as_str()) {
            return Err(ParseError::new(format!("expected a type keyword, found '{}'", tok.text), Some(tok.loc)));
        }
        let mut stars = 0;
        while self.check_kind(TokenKind::Star) {
            self.bump();
            stars += 1;
        }
        Ok(TypeSpec {
            base: tok.text,
            stars,
            loc: tok.loc,
        })
    }

    fn parse_const_val(&mut self) -> Result<ConstVal, ParseError> {
        if self.check_kind(TokenKind::Amp) {
            self.bump();
            let name = self.expect_ident_name()?;
            Ok(ConstVal::Addr(name))
        } else if self.check_kind(TokenKind::Str) {
            let tok = self.bump();
            Ok(ConstVal::Str(unescape_str_literal(&tok.text)))
        } else {
            Ok(ConstVal::Int(self.parse_signed_int()?))
        }
    }

    fn parse_init_expr(&mut self) -> Result<InitExpr, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Amp) => {
                self.bump();
                let name = self.expect_ident_name()?;
                Ok(InitExpr::Addr(name))
            }
            Some(TokenKind::Str) => {
                let tok = self.bump();
                Ok(InitExpr::Str(unescape_str_literal(&tok.text)))
            }
            Some(TokenKind::LBracket) => {
                self.bump();
                let mut words = Vec::new();
                if !self.check_kind(TokenKind::RBracket) {
                    loop {
                        words.push(self.parse_signed_int()?);
                        if self.check_kind(TokenKind::Comma) {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect_kind(TokenKind::RBracket)?;
                Ok(InitExpr::Words(words))
            }
            _ => Ok(InitExpr::Int(self.parse_signed_int()?)),
        }
    }

    fn parse_global(&mut self) -> Result<GlobalDecl, ParseError> {
        let loc = self.bump().loc; // "global"
        let typ = self.parse_typespec()?;
        let name = self.expect_ident_name()?;
        let init = if self.check_kind(TokenKind::Eq) {
            self.bump();
            Some(self.parse_init_expr()?)
        } else {
            None
        };
        let addr = if self.check_kind(TokenKind::At) {
            self.bump();
            Some(self.parse_uint()? as u32)
        } else {
            None
        };
        let asm_linkage = if self.check_ident("asm") {
            self.bump();
            true
        } else {
            false
        };
        Ok(GlobalDecl {
            typ,
            name,
            init,
            addr,
            asm_linkage,
            loc,
        })
    }

    fn parse_assignment(&mut self) -> Result<StmtAst, ParseError> {
        let dst_tok = self.expect_kind(TokenKind::Ident)?;
        let dst = dst_tok.text;
        let loc = dst_tok.loc;
        self.expect_kind(TokenKind::Eq)?;

        if self.check_kind(TokenKind::Bang) {
            self.bump();
            let src = self.expect_ident_name()?;
            return Ok(StmtAst::Unary { dst, op: UnOpTok::LogicalNot, src, loc });
        }
        if self.check_kind(TokenKind::Tilde) {
            self.bump();
            let src = self.expect_ident_name()?;
            return Ok(StmtAst::Unary { dst, op: UnOpTok::Negate, src, loc });
        }
        if self.check_kind(TokenKind::Minus) {
            self.bump();
            let src = self.expect_ident_name()?;
            return Ok(StmtAst::Unary { dst, op: UnOpTok::Minus, src, loc });
        }
        if self.check_ident("copy") {
            self.bump();
            let src = self.expect_ident_name()?;
            return Ok(StmtAst::Unary { dst, op: UnOpTok::Identity, src, loc });
        }
        if self.check_ident("const") {
            self.bump();
            let value = self.parse_const_val()?;
            return Ok(StmtAst::Const { dst, value, loc });
        }
        if self.check_ident("cast") {
            self.bump();
            let src = self.expect_ident_name()?;
            return Ok(StmtAst::Cast { dst, src, loc });
        }
        if self.check_ident("ref") {
            self.bump();
            let src = self.expect_ident_name()?;
            return Ok(StmtAst::Ref { dst, src, loc });
        }
        if self.check_ident("load") {
            self.bump();
            let ptr = self.expect_ident_name()?;
            return Ok(StmtAst::Load { dst, ptr, loc });
        }
        if self.check_ident("call") {
            self.bump();
            let callee = self.expect_ident_name()?;
            let nargs = self.parse_uint()?;
            return Ok(StmtAst::Call { dst, callee, nargs, loc });
        }

        let a = self.expect_ident_name()?;
        let op = self.parse_binop()?;
        let b = self.expect_ident_name()?;
        Ok(StmtAst::Binary { dst, op, a, b, loc })
    }

    fn parse_condjump(&mut self) -> Result<StmtAst, ParseError> {
        let loc = self.bump().loc; // "if"
        let src = self.expect_ident_name()?;
        let op = self.parse_cmpop()?;
        let imm = self.parse_const_val()?;
        self.expect_ident_kw("goto")?;
        let true_label = self.expect_ident_name()?;
        self.expect_ident_kw("else")?;
        self.expect_ident_kw("goto")?;
        let false_label = self.expect_ident_name()?;
        Ok(StmtAst::CondJump {
            src,
            op,
            imm,
            true_label,
            false_label,
            loc,
        })
    }

    fn parse_stmt(&mut self) -> Result<StmtAst, ParseError> {
        if self.check_ident("return") {
            let loc = self.bump().loc;
            return Ok(StmtAst::Return { loc });
        }
        if self.check_ident("goto") {
            let loc = self.bump().loc;
            let target = self.expect_ident_name()?;
            return Ok(StmtAst::Goto { target, loc });
        }
        if self.check_ident("if") {
            return self.parse_condjump();
        }
        if self.check_ident("store") {
            let loc = self.bump().loc;
            let ptr = self.expect_ident_name()?;
            let src = self.expect_ident_name()?;
            return Ok(StmtAst::Store { ptr, src, loc });
        }
        if self.check_ident("param") {
            let loc = self.bump().loc;
            let arg = self.expect_ident_name()?;
            return Ok(StmtAst::Param { arg, loc });
        }
        self.parse_assignment()
    }

    fn parse_func(&mut self) -> Result<FuncDecl, ParseError> {
        let loc = self.bump().loc; // "func"
        let name = self.expect_ident_name()?;
        self.expect_kind(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check_kind(TokenKind::RParen) {
            loop {
                let typ = self.parse_typespec()?;
                let pname = self.expect_ident_name()?;
                params.push((typ, pname));
                if self.check_kind(TokenKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect_kind(TokenKind::RParen)?;
        self.expect_kind(TokenKind::Colon)?;
        let ret = self.parse_typespec()?;
        self.expect_kind(TokenKind::LBrace)?;

        let mut locals = Vec::new();
        while self.check_ident("local") {
            self.bump();
            let typ = self.parse_typespec()?;
            let lname = self.expect_ident_name()?;
            locals.push((typ, lname));
        }

        let mut blocks = Vec::new();
        while !self.check_kind(TokenKind::RBrace) {
            if !self.peek_is_label() {
                return Err(self.err_here("expected a block label ('name:')"));
            }
            let label = self.bump().text;
            self.bump(); // ':'
            let mut stmts = Vec::new();
            while !self.check_kind(TokenKind::RBrace) && !self.peek_is_label() {
                stmts.push(self.parse_stmt()?);
            }
            blocks.push(BlockDecl { label, stmts });
        }
        self.expect_kind(TokenKind::RBrace)?;

        Ok(FuncDecl {
            name,
            params,
            ret,
            locals,
            blocks,
            loc,
        })
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut items = Vec::new();
        while !self.at_end() {
            if self.check_ident("global") {
                items.push(Item::Global(self.parse_global()?));
            } else if self.check_ident("func") {
                items.push(Item::Func(self.parse_func()?));
            } else {
                return Err(self.err_here("expected 'global' or 'func'"));
            }
        }
        Ok(Program { items })
    }
}

fn parse_int_text(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Unescape a quoted string token's `\n`/`\t`/`\\`/`\"` sequences and strip
/// its surrounding quotes.
fn unescape_str_literal(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a full program from its textual surface syntax (SPEC_FULL §A).
pub fn parse(input: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(input).tokenize().map_err(|e| ParseError::new(e.to_string(), Some(e.loc)))?;
    Parser { tokens, pos: 0 }.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_global_with_integer_initializer() {
        let prog = parse("global int x = 7").unwrap();
        assert_eq!(prog.items.len(), 1);
        assert!(matches!(&prog.items[0], Item::Global(g) if g.name == "x"));
    }

    #[test]
    fn parses_a_minimal_function() {
        let src = "func main(): int {\nentry:\n_retval = const 0\nreturn\n}\n";
        let prog = parse(src).unwrap();
        assert_eq!(prog.items.len(), 1);
        let Item::Func(f) = &prog.items[0] else { panic!("expected a function") };
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].stmts.len(), 2);
    }

    #[test]
    fn parses_a_condjump_and_two_blocks() {
        let src = "func f(int a): int {\nentry:\nif a == 0 goto t else goto e\nt:\n_retval = const 1\nreturn\ne:\n_retval = const 2\nreturn\n}\n";
        let prog = parse(src).unwrap();
        let Item::Func(f) = &prog.items[0] else { panic!("expected a function") };
        assert_eq!(f.blocks.len(), 3);
    }

    #[test]
    fn rejects_an_unknown_type_keyword() {
        assert!(parse("global frobnicate x").is_err());
    }
}
