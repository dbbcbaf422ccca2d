//! The abstract syntax tree for the textual IR surface syntax.
//!
//! Grounded structurally on `parishoffman-smol/src/front/ast.rs`: a thin
//! `Program`/`Stmt`/`Expr`-shaped tree with no semantic checking of its
//! own, left entirely to the `lower` step.

use crate::common::Loc;

#[derive(Debug)]
pub struct Program {
    pub items: Vec<Item>,
}

#[derive(Debug)]
pub enum Item {
    Global(GlobalDecl),
    Func(FuncDecl),
}

#[derive(Debug)]
pub struct TypeSpec {
    pub base: String,
    pub stars: u32,
    pub loc: Loc,
}

#[derive(Debug)]
pub enum InitExpr {
    Int(i64),
    Addr(String),
    Str(String),
    Words(Vec<i64>),
}

#[derive(Debug)]
pub struct GlobalDecl {
    pub typ: TypeSpec,
    pub name: String,
    pub init: Option<InitExpr>,
    pub addr: Option<u32>,
    pub asm_linkage: bool,
    pub loc: Loc,
}

#[derive(Debug)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<(TypeSpec, String)>,
    pub ret: TypeSpec,
    pub locals: Vec<(TypeSpec, String)>,
    pub blocks: Vec<BlockDecl>,
    pub loc: Loc,
}

#[derive(Debug)]
pub struct BlockDecl {
    pub label: String,
    pub stmts: Vec<StmtAst>,
}

/// An operand reference: always a bare variable name resolved against the
/// enclosing function's declared params/locals during lowering.
pub type OperandRef = String;

#[derive(Clone, Copy, Debug)]
pub enum BinOpTok {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    LogicalAnd,
    LogicalOr,
    Mul,
    Div,
    Rem,
    Equ,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
}

#[derive(Clone, Copy, Debug)]
pub enum UnOpTok {
    Identity,
    LogicalNot,
    Negate,
    Minus,
}

#[derive(Clone, Copy, Debug)]
pub enum CmpOpTok {
    Equ,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
}

#[derive(Debug)]
pub enum ConstVal {
    Int(i64),
    Addr(String),
    /// A string literal used directly as an operand. Lowering synthesizes
    /// an anonymous global to hold it (SPEC_FULL §D).
    Str(String),
}

#[derive(Debug)]
pub enum StmtAst {
    Binary {
        dst: OperandRef,
        op: BinOpTok,
        a: OperandRef,
        b: OperandRef,
        loc: Loc,
    },
    Unary {
        dst: OperandRef,
        op: UnOpTok,
        src: OperandRef,
        loc: Loc,
    },
    Const {
        dst: OperandRef,
        value: ConstVal,
        loc: Loc,
    },
    Cast {
        dst: OperandRef,
        src: OperandRef,
        loc: Loc,
    },
    Ref {
        dst: OperandRef,
        src: OperandRef,
        loc: Loc,
    },
    Load {
        dst: OperandRef,
        ptr: OperandRef,
        loc: Loc,
    },
    Store {
        ptr: OperandRef,
        src: OperandRef,
        loc: Loc,
    },
    Param {
        arg: OperandRef,
        loc: Loc,
    },
    Call {
        dst: OperandRef,
        callee: String,
        nargs: usize,
        loc: Loc,
    },
    Goto {
        target: String,
        loc: Loc,
    },
    CondJump {
        src: OperandRef,
        op: CmpOpTok,
        imm: ConstVal,
        true_label: String,
        false_label: String,
        loc: Loc,
    },
    Return {
        loc: Loc,
    },
}
