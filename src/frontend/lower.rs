//! AST-to-IR lowering.
//!
//! Grounded structurally on `parishoffman-smol/src/front/lower.rs`'s
//! `lower` step: a single pass that walks the parsed tree and builds the
//! target data structures directly, with a small per-function symbol
//! table standing in for a flat variable environment.

use crate::common::{id, Id, Map};
use crate::error::ParseError;
use crate::frontend::ast;
use crate::ir::cfg::FlowEdge;
use crate::ir::function::{Function, GlobalName, Linkage};
use crate::ir::stmt::{BinOp, ComparisonOp, Statement, UnOp};
use crate::ir::value::{CompiledValue, Constant, Variable};
use crate::ir::Program;
use crate::types::Types;

fn lower_base_type(base: &str, loc: crate::common::Loc) -> Result<Types, ParseError> {
    Ok(match base {
        "char" => Types::Char,
        "uchar" => Types::Uchar,
        "short" => Types::Short,
        "ushort" => Types::Ushort,
        "int" => Types::Int,
        "uint" => Types::Uint,
        "long" => Types::Long,
        "ulong" => Types::Ulong,
        "longlong" => Types::Longlong,
        "ulonglong" => Types::Ulonglong,
        "ptr" => Types::Ptr,
        "void" => Types::Void,
        other => return Err(ParseError::new(format!("unknown type '{other}'"), Some(loc))),
    })
}

/// A `TypeSpec` becomes `(typ, ref_level, ref_type)`: zero stars is a plain
/// scalar of the named base type; one or more stars makes it a pointer
/// whose `ref_type` is that base type (spec.md §3's reference-level model
/// does not track multiple levels of pointee type, so `int**` and `int*`
/// both carry `ref_type: Some(Int)`, distinguished only by `ref_level`).
/// The bare `ptr` keyword with no stars names an untyped pointer, lowered
/// as `void*` (`ref_level` 1, `ref_type: Some(Void)`) since `Variable`
/// always requires a pointee type once `typ == Types::Ptr`.
fn lower_typespec(typ: &ast::TypeSpec) -> Result<(Types, u32, Option<Types>), ParseError> {
    let base = lower_base_type(&typ.base, typ.loc)?;
    if typ.stars == 0 {
        if base == Types::Ptr {
            Ok((Types::Ptr, 1, Some(Types::Void)))
        } else {
            Ok((base, 0, None))
        }
    } else {
        Ok((Types::Ptr, typ.stars, Some(base)))
    }
}

fn lower_variable(typ: &ast::TypeSpec, name: &str) -> Result<Variable, ParseError> {
    let (t, ref_level, ref_type) = lower_typespec(typ)?;
    Ok(Variable::new(id(name), t, ref_level, ref_type))
}

fn lower_global(g: &ast::GlobalDecl) -> Result<GlobalName, ParseError> {
    let var = lower_variable(&g.typ, &g.name)?;
    let init = match &g.init {
        None => None,
        Some(ast::InitExpr::Int(v)) => Some(CompiledValue::Integer(*v)),
        Some(ast::InitExpr::Addr(name)) => Some(CompiledValue::Pointer(id(name.clone()))),
        Some(ast::InitExpr::Str(s)) => Some(CompiledValue::WordArray(crate::ir::value::word_array_from_str(s))),
        Some(ast::InitExpr::Words(words)) => Some(CompiledValue::WordArray(words.clone())),
    };
    let mut global = GlobalName::new_variable(id(g.name.clone()), var, init);
    if let Some(addr) = g.addr {
        global = global.with_location(addr);
    }
    if g.asm_linkage {
        global = global.with_linkage(Linkage::Asm);
    }
    Ok(global)
}

/// Per-function lowering state: the symbol table mapping a declared
/// name to its fully-typed `Variable`, and the block-label map resolving
/// a source label to the `Id` `ControlFlowGraph::new_block` actually
/// assigned it (spec.md §9's "cyclic CFG ownership" note: blocks are
/// addressed by that stable `Id`, never by the user's label text).
struct FuncLowering {
    vars: Map<String, Variable>,
    blocks: Map<String, Id>,
}

impl FuncLowering {
    fn lookup(&self, name: &str, loc: crate::common::Loc) -> Result<Variable, ParseError> {
        self.vars.get(name).copied().ok_or_else(|| ParseError::new(format!("undeclared variable '{name}'"), Some(loc)))
    }

    fn block(&self, label: &str, loc: crate::common::Loc) -> Result<Id, ParseError> {
        self.blocks.get(label).copied().ok_or_else(|| ParseError::new(format!("undeclared block label '{label}'"), Some(loc)))
    }
}

fn lower_binop(op: ast::BinOpTok) -> BinOp {
    use ast::BinOpTok::*;
    match op {
        Add => BinOp::Add,
        Sub => BinOp::Sub,
        And => BinOp::And,
        Or => BinOp::Or,
        Xor => BinOp::Xor,
        Shl => BinOp::Shl,
        Shr => BinOp::Shr,
        LogicalAnd => BinOp::LogicalAnd,
        LogicalOr => BinOp::LogicalOr,
        Mul => BinOp::Mul,
        Div => BinOp::Div,
        Rem => BinOp::Rem,
        Equ => BinOp::Equ,
        Neq => BinOp::Neq,
        Lt => BinOp::Lt,
        Gt => BinOp::Gt,
        Leq => BinOp::Leq,
        Geq => BinOp::Geq,
    }
}

fn lower_unop(op: ast::UnOpTok) -> UnOp {
    match op {
        ast::UnOpTok::Identity => UnOp::Identity,
        ast::UnOpTok::LogicalNot => UnOp::LogicalNot,
        ast::UnOpTok::Negate => UnOp::Negate,
        ast::UnOpTok::Minus => UnOp::Minus,
    }
}

fn lower_cmpop(op: ast::CmpOpTok) -> ComparisonOp {
    match op {
        ast::CmpOpTok::Equ => ComparisonOp::Equ,
        ast::CmpOpTok::Neq => ComparisonOp::Neq,
        ast::CmpOpTok::Lt => ComparisonOp::Lt,
        ast::CmpOpTok::Gt => ComparisonOp::Gt,
        ast::CmpOpTok::Leq => ComparisonOp::Leq,
        ast::CmpOpTok::Geq => ComparisonOp::Geq,
    }
}

/// Name and intern a compiler-synthesized global holding a string literal's
/// contents, matching `gwcc/c_frontend.py`'s `__A_<alnum chars>` naming
/// (SPEC_FULL §D). Reuses an existing entry for an identical literal
/// instead of emitting a duplicate global.
fn synthesize_string_global(s: &str, synthesized: &mut Vec<GlobalName>) -> Id {
    let filtered: String = s.chars().filter(|c| c.is_alphanumeric()).collect();
    let name = id(format!("__A_{filtered}"));
    if !synthesized.iter().any(|g| g.name == name) {
        let var = Variable::scalar(name, Types::Char);
        let global = GlobalName::new_variable(name, var, Some(CompiledValue::WordArray(crate::ir::value::word_array_from_str(s))))
            .with_linkage(Linkage::Asm);
        synthesized.push(global);
    }
    name
}

fn lower_const_val(v: &ast::ConstVal, typ: Types, synthesized: &mut Vec<GlobalName>) -> Constant {
    match v {
        ast::ConstVal::Int(n) => Constant::int(*n, typ),
        ast::ConstVal::Addr(name) => Constant::new(CompiledValue::Pointer(id(name.clone())), typ),
        ast::ConstVal::Str(s) => Constant::new(CompiledValue::Pointer(synthesize_string_global(s, synthesized)), typ),
    }
}

fn lower_stmt(env: &FuncLowering, s: &ast::StmtAst, synthesized: &mut Vec<GlobalName>) -> Result<Statement, ParseError> {
    Ok(match s {
        ast::StmtAst::Binary { dst, op, a, b, loc } => {
            let dst = env.lookup(dst, *loc)?;
            let a = env.lookup(a, *loc)?;
            let b = env.lookup(b, *loc)?;
            Statement::binary(dst, lower_binop(*op), a, b)
        }
        ast::StmtAst::Unary { dst, op, src, loc } => {
            let dst = env.lookup(dst, *loc)?;
            let src = env.lookup(src, *loc)?;
            Statement::unary(dst, lower_unop(*op), src)
        }
        ast::StmtAst::Const { dst, value, loc } => {
            let dst = env.lookup(dst, *loc)?;
            Statement::Const { dst, imm: lower_const_val(value, dst.typ, synthesized) }
        }
        ast::StmtAst::Cast { dst, src, loc } => {
            let dst = env.lookup(dst, *loc)?;
            let src = env.lookup(src, *loc)?;
            Statement::Cast { dst, src }
        }
        ast::StmtAst::Ref { dst, src, loc } => {
            let dst = env.lookup(dst, *loc)?;
            let var = env.lookup(src, *loc)?;
            Statement::Ref { dst, var }
        }
        ast::StmtAst::Load { dst, ptr, loc } => {
            let dst = env.lookup(dst, *loc)?;
            let ptr = env.lookup(ptr, *loc)?;
            Statement::deref_read(dst, ptr)
        }
        ast::StmtAst::Store { ptr, src, loc } => {
            let ptr = env.lookup(ptr, *loc)?;
            let src = env.lookup(src, *loc)?;
            Statement::deref_write(ptr, src)
        }
        ast::StmtAst::Param { arg, loc } => Statement::Param { arg: env.lookup(arg, *loc)? },
        ast::StmtAst::Call { dst, callee, nargs, loc } => {
            let dst = env.lookup(dst, *loc)?;
            Statement::Call {
                dst,
                callee: id(callee.clone()),
                nargs: *nargs,
            }
        }
        ast::StmtAst::Goto { target, loc } => Statement::Goto { target: env.block(target, *loc)? },
        ast::StmtAst::CondJump {
            src,
            op,
            imm,
            true_label,
            false_label,
            loc,
        } => {
            let src_a = env.lookup(src, *loc)?;
            Statement::CondJump {
                true_block: env.block(true_label, *loc)?,
                false_block: env.block(false_label, *loc)?,
                src_a,
                op: lower_cmpop(*op),
                imm: lower_const_val(imm, src_a.typ, synthesized),
            }
        }
        ast::StmtAst::Return { .. } => Statement::Return,
    })
}

/// Lower one function, returning it alongside any string-literal globals
/// its body synthesized along the way.
fn lower_func(f: &ast::FuncDecl) -> Result<(Function, Vec<GlobalName>), ParseError> {
    let (ret_typ, ref_level, ref_type) = lower_typespec(&f.ret)?;
    let retval = Variable::new(id("_retval"), ret_typ, ref_level, ref_type);

    let mut params = Vec::new();
    let mut vars: Map<String, Variable> = Map::new();
    vars.insert("_retval".to_string(), retval);
    for (typ, name) in &f.params {
        let var = lower_variable(typ, name)?;
        params.push(var);
        vars.insert(name.clone(), var);
    }

    let mut func = Function::new(id(f.name.clone()), params, retval);
    for (typ, name) in &f.locals {
        let var = lower_variable(typ, name)?;
        func.add_local(var);
        vars.insert(name.clone(), var);
    }

    let mut blocks = Map::new();
    for b in &f.blocks {
        if blocks.contains_key(&b.label) {
            return Err(ParseError::new(format!("duplicate block label '{}'", b.label), Some(f.loc)));
        }
        blocks.insert(b.label.clone(), func.cfg.new_block());
    }
    let env = FuncLowering { vars, blocks };
    let mut synthesized = Vec::new();

    for b in &f.blocks {
        let bb = env.blocks[&b.label];
        for s in &b.stmts {
            let stmt = lower_stmt(&env, s, &mut synthesized)?;
            func.cfg.blocks.get_mut(&bb).unwrap().add_stmt(stmt);
        }
        let Some(last) = func.cfg.blocks[&bb].stmts.last() else {
            return Err(ParseError::new(format!("block '{}' has no statements", b.label), Some(f.loc)));
        };
        match last.clone() {
            Statement::Goto { target } => func.cfg.add_edge(FlowEdge::new(bb, target)),
            Statement::CondJump { true_block, false_block, .. } => {
                func.cfg.add_edge(FlowEdge::new(bb, true_block));
                func.cfg.add_edge(FlowEdge::new(bb, false_block));
            }
            Statement::Return => {}
            _ => return Err(ParseError::new(format!("block '{}' does not end in a terminator", b.label), Some(f.loc))),
        }
    }

    Ok((func, synthesized))
}

/// Lower a parsed `Program` into the middle-end IR (spec.md §6.1's
/// frontend-to-middle-end contract).
pub fn lower(ast: ast::Program) -> Result<Program, ParseError> {
    let mut program = Program::new();
    for item in &ast.items {
        match item {
            ast::Item::Global(g) => program.push(lower_global(g)?),
            ast::Item::Func(f) => {
                let (func, synthesized) = lower_func(f)?;
                program.push(GlobalName::new_function(id(f.name.clone()), func));
                for g in synthesized {
                    program.push(g);
                }
            }
        }
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse::parse;

    #[test]
    fn lowers_a_global_variable() {
        let ast = parse("global int x = 7").unwrap();
        let program = lower(ast).unwrap();
        assert_eq!(program.globals.len(), 1);
    }

    #[test]
    fn lowers_an_if_else_into_three_blocks() {
        let src = "func f(int a): int {\nentry:\nif a == 0 goto t else goto e\nt:\n_retval = const 1\nreturn\ne:\n_retval = const 2\nreturn\n}\n";
        let ast = parse(src).unwrap();
        let program = lower(ast).unwrap();
        let func = program.functions().next().unwrap();
        assert_eq!(func.cfg.num_blocks(), 3);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn rejects_use_of_an_undeclared_variable() {
        let src = "func f(): int {\nentry:\n_retval = q + q\nreturn\n}\n";
        let ast = parse(src).unwrap();
        assert!(lower(ast).is_err());
    }

    #[test]
    fn string_literal_operand_synthesizes_an_anonymous_global() {
        let src = "func f(): int {\nlocal ptr p\nentry:\np = const \"hi\"\nparam p\n_retval = call g 1\nreturn\n}\n";
        let ast = parse(src).unwrap();
        let program = lower(ast).unwrap();
        let anon = program.find(id("__A_hi")).expect("anonymous string global should be synthesized");
        match &anon.payload {
            crate::ir::function::GlobalPayload::Variable { init: Some(CompiledValue::WordArray(words)), .. } => {
                assert_eq!(words, &vec![104, 105, 0]);
            }
            other => panic!("expected a word-array variable global, got {other:?}"),
        }
        assert_eq!(anon.linkage, Linkage::Asm);
    }

    #[test]
    fn repeated_identical_string_literals_share_one_global() {
        let src = "func f(): int {\nlocal ptr p\nlocal ptr q\nentry:\np = const \"hi\"\nq = const \"hi\"\n_retval = const 0\nreturn\n}\n";
        let ast = parse(src).unwrap();
        let program = lower(ast).unwrap();
        let count = program.globals.iter().filter(|g| g.name == id("__A_hi")).count();
        assert_eq!(count, 1);
    }
}
