//! The three-address statement sum type (spec.md §3).
//!
//! Grounded on `gwcc/il.py`'s per-statement classes (`BinaryStmt`,
//! `UnaryStmt`, `ConstantStmt`, ...) and its free `used_vars`/`defed_var`
//! functions. Per spec.md §9's "dynamic typing in the source" design note,
//! these become one Rust `enum Statement`, pattern-matched exhaustively;
//! the free functions become `Statement::uses`/`Statement::defines`.

use derive_more::Display;

use crate::common::Id;
use crate::ir::value::{Constant, Variable};

/// Binary operators, spec.md §3. Comparisons are included here because a
/// `Binary` statement may compute a boolean-as-integer result (e.g. `c = a
/// == b`); `ComparisonOp` below is the *subset* reused specifically by
/// `CondJump`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum BinOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("&")]
    And,
    #[display("|")]
    Or,
    #[display("^")]
    Xor,
    #[display("<<")]
    Shl,
    #[display(">>")]
    Shr,
    #[display("&&")]
    LogicalAnd,
    #[display("||")]
    LogicalOr,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Rem,
    #[display("==")]
    Equ,
    #[display("!=")]
    Neq,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("<=")]
    Leq,
    #[display(">=")]
    Geq,
}

impl BinOp {
    /// True for the six comparison operators, which also form
    /// [`ComparisonOp`].
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Equ | BinOp::Neq | BinOp::Lt | BinOp::Gt | BinOp::Leq | BinOp::Geq
        )
    }
}

/// Unary operators, spec.md §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum UnOp {
    #[display("")]
    Identity,
    #[display("!")]
    LogicalNot,
    #[display("~")]
    Negate,
    #[display("-")]
    Minus,
}

/// The comparison operators usable in a `CondJump`'s immediate test,
/// spec.md §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ComparisonOp {
    #[display("==")]
    Equ,
    #[display("!=")]
    Neq,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("<=")]
    Leq,
    #[display(">=")]
    Geq,
}

/// A three-address statement. Exactly one variant may terminate a basic
/// block (`Goto`, `CondJump`, `Return`); see `Statement::is_terminator`.
#[derive(Clone, Debug)]
pub enum Statement {
    Binary {
        dst: Variable,
        op: BinOp,
        src_a: Variable,
        src_b: Variable,
    },
    Unary {
        dst: Variable,
        op: UnOp,
        src: Variable,
    },
    Const {
        dst: Variable,
        imm: Constant,
    },
    Cast {
        dst: Variable,
        src: Variable,
    },
    Ref {
        dst: Variable,
        var: Variable,
    },
    DerefRead {
        dst: Variable,
        ptr: Variable,
    },
    DerefWrite {
        ptr: Variable,
        src: Variable,
    },
    Param {
        arg: Variable,
    },
    Call {
        dst: Variable,
        callee: Id,
        nargs: usize,
    },
    Goto {
        target: Id,
    },
    CondJump {
        true_block: Id,
        false_block: Id,
        src_a: Variable,
        op: ComparisonOp,
        imm: Constant,
    },
    Return,
    Comment(String),
}

impl Statement {
    /// Constructs a typed `Binary` statement, asserting the operand-type
    /// invariant of spec.md §3.
    pub fn binary(dst: Variable, op: BinOp, src_a: Variable, src_b: Variable) -> Self {
        assert!(
            dst.typ == src_a.typ && dst.typ == src_b.typ,
            "binary statement operands must be of equal type"
        );
        Statement::Binary { dst, op, src_a, src_b }
    }

    /// Constructs a typed `Unary` statement, asserting the operand-type
    /// invariant of spec.md §3.
    pub fn unary(dst: Variable, op: UnOp, src: Variable) -> Self {
        assert!(dst.typ == src.typ, "unary statement operands must be of equal type");
        Statement::Unary { dst, op, src }
    }

    /// Constructs a `DerefRead`, asserting the ref-level invariant of
    /// spec.md §3.
    pub fn deref_read(dst: Variable, ptr: Variable) -> Self {
        assert_eq!(
            dst.ref_level as i64,
            ptr.ref_level as i64 - 1,
            "dereference-read ref-level mismatch"
        );
        Statement::DerefRead { dst, ptr }
    }

    /// Constructs a `DerefWrite`, asserting the ref-level invariant of
    /// spec.md §3.
    pub fn deref_write(ptr: Variable, src: Variable) -> Self {
        assert_eq!(
            src.ref_level as i64,
            ptr.ref_level as i64 - 1,
            "dereference-write ref-level mismatch"
        );
        Statement::DerefWrite { ptr, src }
    }

    /// Is this one of the three statement kinds allowed to terminate a
    /// basic block?
    pub fn is_terminator(&self) -> bool {
        matches!(self, Statement::Goto { .. } | Statement::CondJump { .. } | Statement::Return)
    }

    /// Variables used (read) by this statement, per the table in spec.md
    /// §4.3. `Return`'s implicit use of the function's return-value
    /// variable is added by the liveness pass, not here, since this
    /// function has no access to the owning `Function`.
    pub fn uses(&self) -> Vec<Variable> {
        match self {
            Statement::Binary { src_a, src_b, .. } => vec![*src_a, *src_b],
            Statement::Unary { src, .. } => vec![*src],
            Statement::Const { .. } => vec![],
            Statement::Cast { src, .. } => vec![*src],
            Statement::Ref { var, .. } => vec![*var],
            Statement::DerefRead { ptr, .. } => vec![*ptr],
            Statement::DerefWrite { ptr, src } => vec![*ptr, *src],
            Statement::Param { arg } => vec![*arg],
            Statement::Call { .. } => vec![],
            Statement::Goto { .. } => vec![],
            Statement::CondJump { src_a, .. } => vec![*src_a],
            Statement::Return => vec![],
            Statement::Comment(_) => vec![],
        }
    }

    /// The variable defined (written) by this statement, if any, per the
    /// table in spec.md §4.3.
    pub fn defines(&self) -> Option<Variable> {
        match self {
            Statement::Binary { dst, .. } => Some(*dst),
            Statement::Unary { dst, .. } => Some(*dst),
            Statement::Const { dst, .. } => Some(*dst),
            Statement::Cast { dst, .. } => Some(*dst),
            Statement::Ref { dst, .. } => Some(*dst),
            Statement::DerefRead { dst, .. } => Some(*dst),
            Statement::DerefWrite { .. } => None,
            Statement::Param { .. } => None,
            Statement::Call { dst, .. } => Some(*dst),
            Statement::Goto { .. } => None,
            Statement::CondJump { .. } => None,
            Statement::Return => None,
            Statement::Comment(_) => None,
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Statement::Binary { dst, op, src_a, src_b } => write!(f, "{dst} = {src_a} {op} {src_b}"),
            Statement::Unary { dst, op, src } => write!(f, "{dst} = {op}{src}"),
            Statement::Const { dst, imm } => write!(f, "{dst} = {imm}"),
            Statement::Cast { dst, src } => write!(f, "{dst} = ({}) {src}", dst.typ),
            Statement::Ref { dst, var } => write!(f, "{dst} = &{var}"),
            Statement::DerefRead { dst, ptr } => write!(f, "{dst} = *{ptr}"),
            Statement::DerefWrite { ptr, src } => write!(f, "*{ptr} = {src}"),
            Statement::Param { arg } => write!(f, "param {arg}"),
            Statement::Call { dst, callee, nargs } => write!(f, "{dst} = call {callee}, {nargs}"),
            Statement::Goto { target } => write!(f, "goto {target}"),
            Statement::CondJump { true_block, false_block, src_a, op, imm } => {
                write!(f, "if ({src_a} {op} {imm}) goto {true_block} else goto {false_block}")
            }
            Statement::Return => write!(f, "return"),
            Statement::Comment(text) => write!(f, "; {text}"),
        }
    }
}
