//! Liveness dataflow analysis (spec.md §4.3).
//!
//! Grounded on `gwcc/optimization/dataflow.py`'s `LivenessAnalysis`
//! line-for-line: precompute `use`/`def` per block via a reverse statement
//! walk, then a backward worklist solver seeded in topological order.

use std::collections::VecDeque;

use tracing::trace;

use crate::common::{Id, Map, Set};
use crate::ir::cfg;
use crate::ir::function::Function;
use crate::ir::stmt::Statement;
use crate::ir::value::Variable;

/// The result of solving liveness to a fixed point over a function's CFG.
pub struct LivenessAnalysis {
    use_: Map<Id, Set<Variable>>,
    def: Map<Id, Set<Variable>>,
    out: Map<Id, Set<Variable>>,
    in_: Map<Id, Set<Variable>>,
}

impl LivenessAnalysis {
    /// Compute liveness for `func`.
    pub fn compute(func: &Function) -> Self {
        let mut analysis = LivenessAnalysis {
            use_: Map::new(),
            def: Map::new(),
            out: Map::new(),
            in_: Map::new(),
        };
        for bb in func.cfg.blocks.keys() {
            analysis.precompute_block(func, *bb);
        }

        let mut queue: VecDeque<Id> = cfg::topoorder(&func.cfg).into_iter().collect();
        let mut iterations = 0usize;
        while let Some(bb) = queue.pop_front() {
            iterations += 1;
            let mut cur_out: Set<Variable> = Set::new();
            for succ in func.cfg.get_edges(bb) {
                cur_out.extend(analysis.in_.get(&succ).cloned().unwrap_or_default());
            }

            let defd = analysis.def.get(&bb).cloned().unwrap_or_default();
            let usd = analysis.use_.get(&bb).cloned().unwrap_or_default();
            let mut cur_in: Set<Variable> = cur_out.difference(&defd).copied().collect();
            cur_in.extend(usd);

            let old_in = analysis.in_.get(&bb).cloned().unwrap_or_default();
            analysis.out.insert(bb, cur_out);
            let changed = old_in != cur_in;
            analysis.in_.insert(bb, cur_in);

            if changed {
                for pred in func.cfg.get_edges_to(bb) {
                    if !queue.contains(&pred) {
                        queue.push_back(pred);
                    }
                }
            }
        }
        trace!(iterations, "liveness: worklist converged");

        analysis
    }

    pub fn live_in(&self, bb: Id) -> Set<Variable> {
        self.in_.get(&bb).cloned().unwrap_or_default()
    }

    pub fn live_out(&self, bb: Id) -> Set<Variable> {
        self.out.get(&bb).cloned().unwrap_or_default()
    }

    /// Statement-level live-out sets for `bb`, derived on demand by
    /// re-walking its statements in reverse from the block's live-out set
    /// (spec.md §4.3).
    pub fn statement_live_out(&self, func: &Function, bb: Id) -> Vec<Set<Variable>> {
        let block = &func.cfg.blocks[&bb];
        let mut result = vec![Set::new(); block.stmts.len()];
        if block.stmts.is_empty() {
            return result;
        }
        *result.last_mut().unwrap() = self.live_out(bb);
        for i in (1..block.stmts.len()).rev() {
            let mut live = result[i].clone();
            let stmt = &block.stmts[i];
            if let Some(defd) = stmt.defines() {
                live.remove(&defd);
            }
            live.extend(stmt.uses());
            result[i - 1] = live;
        }
        result
    }

    fn precompute_block(&mut self, func: &Function, bb: Id) {
        let block = &func.cfg.blocks[&bb];
        for stmt in block.stmts.iter().rev() {
            if let Some(defd) = stmt.defines() {
                self.def.entry(bb).or_default().insert(defd);
                self.use_.entry(bb).or_default().remove(&defd);
            }
            for used in stmt.uses() {
                self.use_.entry(bb).or_default().insert(used);
            }
            if matches!(stmt, Statement::Return) {
                self.use_.entry(bb).or_default().insert(func.retval);
            }
        }
    }
}

/// Convenience wrapper: compute liveness for `func`.
pub fn compute_liveness(func: &Function) -> LivenessAnalysis {
    LivenessAnalysis::compute(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::ir::cfg::FlowEdge;
    use crate::ir::stmt::{BinOp, ComparisonOp};
    use crate::ir::value::{Constant, Variable};
    use crate::types::Types;

    fn retval() -> Variable {
        Variable::scalar(id("_retval"), Types::Int)
    }

    #[test]
    fn condjump_body_example() {
        // if (a == 0) return 1; return 2;  -- three blocks after lowering.
        let mut func = Function::new(id("f"), vec![], retval());
        let a = Variable::scalar(id("a"), Types::Int);

        let entry = func.cfg.new_block();
        let then_b = func.cfg.new_block();
        let else_b = func.cfg.new_block();

        func.cfg.blocks.get_mut(&entry).unwrap().add_stmt(Statement::CondJump {
            true_block: then_b,
            false_block: else_b,
            src_a: a,
            op: ComparisonOp::Equ,
            imm: Constant::int(0, Types::Int),
        });
        let one = Variable::scalar(id("_t0"), Types::Int);
        func.cfg.blocks.get_mut(&then_b).unwrap().add_stmt(Statement::Const { dst: one, imm: Constant::int(1, Types::Int) });
        func.cfg.blocks.get_mut(&then_b).unwrap().add_stmt(Statement::unary(retval(), crate::ir::stmt::UnOp::Identity, one));
        func.cfg.blocks.get_mut(&then_b).unwrap().add_stmt(Statement::Return);

        let two = Variable::scalar(id("_t1"), Types::Int);
        func.cfg.blocks.get_mut(&else_b).unwrap().add_stmt(Statement::Const { dst: two, imm: Constant::int(2, Types::Int) });
        func.cfg.blocks.get_mut(&else_b).unwrap().add_stmt(Statement::unary(retval(), crate::ir::stmt::UnOp::Identity, two));
        func.cfg.blocks.get_mut(&else_b).unwrap().add_stmt(Statement::Return);

        func.cfg.add_edge(FlowEdge::new(entry, then_b));
        func.cfg.add_edge(FlowEdge::new(entry, else_b));

        let live = LivenessAnalysis::compute(&func);
        assert!(live.live_in(entry).contains(&a));
        assert!(live.live_out(then_b).is_empty());
        assert!(live.live_out(else_b).is_empty());
    }

    #[test]
    fn while_loop_back_edge() {
        // while (i < 10) i = i + 1;  -- cond/body/end skeleton, i live across the back edge.
        let mut func = Function::new(id("f"), vec![], retval());
        let i = Variable::scalar(id("i"), Types::Int);

        let cond = func.cfg.new_block();
        let body = func.cfg.new_block();
        let end = func.cfg.new_block();

        func.cfg.blocks.get_mut(&cond).unwrap().add_stmt(Statement::CondJump {
            true_block: body,
            false_block: end,
            src_a: i,
            op: ComparisonOp::Lt,
            imm: Constant::int(10, Types::Int),
        });
        let one = Variable::scalar(id("_t0"), Types::Int);
        func.cfg.blocks.get_mut(&body).unwrap().add_stmt(Statement::Const { dst: one, imm: Constant::int(1, Types::Int) });
        func.cfg.blocks.get_mut(&body).unwrap().add_stmt(Statement::binary(i, BinOp::Add, i, one));
        func.cfg.blocks.get_mut(&body).unwrap().add_stmt(Statement::Goto { target: cond });
        func.cfg.blocks.get_mut(&end).unwrap().add_stmt(Statement::Return);

        func.cfg.add_edge(FlowEdge::new(cond, body));
        func.cfg.add_edge(FlowEdge::new(cond, end));
        func.cfg.add_edge(FlowEdge::new(body, cond));

        let live = LivenessAnalysis::compute(&func);
        assert!(live.live_in(cond).contains(&i));
        assert!(live.live_out(cond).contains(&i));
    }
}
