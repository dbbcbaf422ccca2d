//! Functions and globals (spec.md §3), and IR verification (spec.md §4.4).
//!
//! Grounded on `gwcc/il.py`'s `Function`/`GlobalName` and `Function.verify`.

use derive_more::Display;

use crate::common::{id, Id, Set};
use crate::error::InternalError;
use crate::ir::cfg::{self, ControlFlowGraph};
use crate::ir::stmt::Statement;
use crate::ir::value::{CompiledValue, Variable};

/// A function's name, parameters, return-value variable, locals, and CFG.
/// Parameters are always included in `locals` (spec.md §3).
#[derive(Clone, Debug)]
pub struct Function {
    pub name: Id,
    pub params: Vec<Variable>,
    pub retval: Variable,
    pub locals: Vec<Variable>,
    pub cfg: ControlFlowGraph,
    next_temp: usize,
}

impl Function {
    pub fn new(name: Id, params: Vec<Variable>, retval: Variable) -> Self {
        let locals = params.clone();
        Function {
            name,
            params,
            retval,
            locals,
            cfg: ControlFlowGraph::new(),
            next_temp: 0,
        }
    }

    pub fn num_args(&self) -> usize {
        self.params.len()
    }

    /// Add a non-parameter local.
    pub fn add_local(&mut self, var: Variable) {
        self.locals.push(var);
    }

    /// Allocate a fresh compiler-synthesized temporary. Reserved names
    /// (spec.md §3) are prefixed with `_` so `verify`'s def-before-use
    /// check exempts them automatically.
    pub fn new_temporary(&mut self, typ: crate::types::Types, ref_level: u32, ref_type: Option<crate::types::Types>) -> Variable {
        let name = id(format!("_t{}", self.next_temp));
        self.next_temp += 1;
        Variable::new(name, typ, ref_level, ref_type)
    }

    /// Verify CFG terminator invariants and def-before-use chains, per
    /// spec.md §4.4. Must pass before backend code generation.
    pub fn verify(&self) -> Result<(), InternalError> {
        for bb in self.cfg.blocks.values() {
            if bb.stmts.is_empty() {
                continue;
            }

            for stmt in &bb.stmts[..bb.stmts.len() - 1] {
                if stmt.is_terminator() {
                    return Err(InternalError(format!(
                        "block {} has a non-terminal control-flow statement: {stmt}",
                        bb.name
                    )));
                }
            }

            let last = bb.stmts.last().unwrap();
            if !last.is_terminator() {
                return Err(InternalError(format!("block {} does not end in a terminator", bb.name)));
            }

            match last {
                Statement::Goto { target } => {
                    if !self.cfg.blocks.contains_key(target) {
                        return Err(InternalError(format!("goto target {target} is not part of this function's CFG")));
                    }
                    let edges = self.cfg.get_edges(bb.name);
                    if edges.len() != 1 || !edges.contains(target) {
                        return Err(InternalError(format!("edge set for block {} does not match its goto target", bb.name)));
                    }
                }
                Statement::CondJump {
                    true_block, false_block, ..
                } => {
                    if !self.cfg.blocks.contains_key(true_block) || !self.cfg.blocks.contains_key(false_block) {
                        return Err(InternalError(format!("cond-jump targets of block {} are not part of this function's CFG", bb.name)));
                    }
                    let edges = self.cfg.get_edges(bb.name);
                    let expected_len = if true_block == false_block { 1 } else { 2 };
                    if edges.len() != expected_len {
                        return Err(InternalError(format!("edge set for block {} does not match its cond-jump targets", bb.name)));
                    }
                    if !edges.contains(true_block) || !edges.contains(false_block) {
                        return Err(InternalError(format!("edge set for block {} is missing a cond-jump target", bb.name)));
                    }
                }
                Statement::Return => {
                    if !self.cfg.get_edges(bb.name).is_empty() {
                        return Err(InternalError(format!("return-terminated block {} has outgoing edges", bb.name)));
                    }
                }
                _ => unreachable!("is_terminator guarantees one of the above"),
            }
        }

        // Parameters arrive already defined on function entry; only the
        // CFG's own statements need to establish def-before-use for
        // everything else (locals, temporaries).
        let mut defined: Set<Variable> = self.params.iter().copied().collect();
        for bb_id in cfg::topoorder(&self.cfg) {
            for stmt in &self.cfg.blocks[&bb_id].stmts {
                for used in stmt.uses() {
                    if !used.is_reserved() && !defined.contains(&used) {
                        return Err(InternalError(format!(
                            "use of {used} in block {bb_id} is not dominated by any definition"
                        )));
                    }
                }
                if let Some(defd) = stmt.defines() {
                    defined.insert(defd);
                }
            }
        }

        Ok(())
    }

    pub fn pretty_print(&self) -> String {
        let params = self.params.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ");
        let mut result = format!("Function {}({}) -> {}\n", self.name, params, self.retval);
        result += &self.cfg.pretty_print();
        result
    }

    pub fn dump_graph(&self) -> String {
        cfg::to_dot(&self.cfg, &self.name)
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "function.{}", self.name)
    }
}

/// Linkage kind for a [`GlobalName`] (spec.md §3, §6.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Linkage {
    /// Mangled at emission time (`_<seq>_<name>`).
    #[display("C")]
    C,
    /// Emitted verbatim, with no mangling.
    #[display("asm")]
    Asm,
}

/// What a [`GlobalName`] allocates: either a variable (with an optional
/// compile-time initializer) or a function.
#[derive(Clone, Debug)]
pub enum GlobalPayload {
    Variable { var: Variable, init: Option<CompiledValue> },
    Function(Function),
}

/// An allocation unit in the produced binary (spec.md §3).
#[derive(Clone, Debug)]
pub struct GlobalName {
    pub name: Id,
    pub payload: GlobalPayload,
    /// Absolute target location; 0 means unpinned (placed sequentially).
    pub location: u32,
    pub linkage: Linkage,
}

impl GlobalName {
    pub fn new_variable(name: Id, var: Variable, init: Option<CompiledValue>) -> Self {
        GlobalName {
            name,
            payload: GlobalPayload::Variable { var, init },
            location: 0,
            linkage: Linkage::C,
        }
    }

    pub fn new_function(name: Id, func: Function) -> Self {
        GlobalName {
            name,
            payload: GlobalPayload::Function(func),
            location: 0,
            linkage: Linkage::C,
        }
    }

    pub fn with_location(mut self, location: u32) -> Self {
        self.location = location;
        self
    }

    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::FlowEdge;
    use crate::ir::stmt::{BinOp, Statement};
    use crate::types::Types;

    fn retval() -> Variable {
        Variable::scalar(id("_retval"), Types::Int)
    }

    #[test]
    fn verify_accepts_single_return_block() {
        let mut func = Function::new(id("f"), vec![], retval());
        let entry = func.cfg.new_block();
        func.cfg.blocks.get_mut(&entry).unwrap().add_stmt(Statement::Return);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn verify_rejects_missing_terminator() {
        let mut func = Function::new(id("f"), vec![], retval());
        let entry = func.cfg.new_block();
        let x = Variable::scalar(id("x"), Types::Int);
        func.cfg
            .blocks
            .get_mut(&entry)
            .unwrap()
            .add_stmt(Statement::Const { dst: x, imm: crate::ir::value::Constant::int(1, Types::Int) });
        assert!(func.verify().is_err());
    }

    #[test]
    fn verify_rejects_use_before_def() {
        let mut func = Function::new(id("f"), vec![], retval());
        let entry = func.cfg.new_block();
        let a = Variable::scalar(id("a"), Types::Int);
        let b = Variable::scalar(id("b"), Types::Int);
        func.cfg
            .blocks
            .get_mut(&entry)
            .unwrap()
            .add_stmt(Statement::binary(b, BinOp::Add, a, a));
        func.cfg.blocks.get_mut(&entry).unwrap().add_stmt(Statement::Return);
        assert!(func.verify().is_err());
    }

    #[test]
    fn verify_checks_goto_edge_agreement() {
        let mut func = Function::new(id("f"), vec![], retval());
        let entry = func.cfg.new_block();
        let other = func.cfg.new_block();
        func.cfg.blocks.get_mut(&other).unwrap().add_stmt(Statement::Return);
        func.cfg
            .blocks
            .get_mut(&entry)
            .unwrap()
            .add_stmt(Statement::Goto { target: other });
        // no edge added: this should fail
        assert!(func.verify().is_err());
        func.cfg.add_edge(FlowEdge::new(entry, other));
        assert!(func.verify().is_ok());
    }
}
