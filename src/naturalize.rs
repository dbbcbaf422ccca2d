//! Naturalization: CFG cleanup to a fixed point (spec.md §4.2).
//!
//! Grounded on `gwcc/optimization/naturalization_pass.py`'s
//! `NaturalizationPass` line-for-line: the same four rewrites, applied in
//! the same order, restarting the scan from the top whenever one fires.

use tracing::debug;

use crate::error::InternalError;
use crate::ir::cfg::FlowEdge;
use crate::ir::function::Function;
use crate::ir::stmt::Statement;

/// Iteratively applies the four naturalization rewrites of spec.md §4.2 to
/// `func`'s CFG until a full scan produces no change.
pub struct NaturalizationPass<'f> {
    func: &'f mut Function,
}

impl<'f> NaturalizationPass<'f> {
    pub fn new(func: &'f mut Function) -> Self {
        NaturalizationPass { func }
    }

    /// Merge `bb`, which ends in `Goto { target: succ }`, with `succ`.
    fn merge(&mut self, bb: crate::common::Id, succ: crate::common::Id) {
        let cfg = &mut self.func.cfg;
        let succ_stmts = cfg.blocks[&succ].stmts.clone();
        let succ_targets = cfg.get_edges(succ);

        let bb_block = cfg.blocks.get_mut(&bb).expect("bb must exist");
        bb_block.stmts.pop(); // drop the Goto terminator
        bb_block.stmts.extend(succ_stmts);

        for dst in succ_targets {
            cfg.add_edge(FlowEdge::new(bb, dst));
        }
        cfg.remove_block(succ);
        debug!(block = %bb, merged = %succ, "naturalize: merged straight-line chain");
    }

    /// Replace every reference to `bb_to_inline` with `bb_inline_as` in
    /// predecessor terminators, then drop `bb_to_inline`.
    fn inline(&mut self, bb_to_inline: crate::common::Id, bb_inline_as: crate::common::Id) {
        let cfg = &mut self.func.cfg;
        let preds = cfg.get_edges_to(bb_to_inline);
        for pred in preds {
            cfg.add_edge(FlowEdge::new(pred, bb_inline_as));

            let pred_block = cfg.blocks.get_mut(&pred).expect("predecessor must exist");
            let flow_stmt = pred_block.stmts.last_mut().expect("predecessor must end in a terminator");
            match flow_stmt {
                Statement::Goto { target } => {
                    assert_eq!(*target, bb_to_inline);
                    *target = bb_inline_as;
                }
                Statement::CondJump { true_block, false_block, .. } => {
                    assert!(*true_block == bb_to_inline || *false_block == bb_to_inline);
                    if *true_block == bb_to_inline {
                        *true_block = bb_inline_as;
                    }
                    if *false_block == bb_to_inline {
                        *false_block = bb_inline_as;
                    }
                }
                other => panic!("invalid flow statement at end of block: {other}"),
            }
        }
        cfg.remove_block(bb_to_inline);
        debug!(block = %bb_to_inline, inlined_as = %bb_inline_as, "naturalize: inlined single-jump block");
    }

    /// Replace a `CondJump` whose two arms agree with a plain `Goto`.
    fn kill_trivial_conditional(&mut self, bb: crate::common::Id) {
        let block = self.func.cfg.blocks.get_mut(&bb).expect("bb must exist");
        let target = match block.stmts.last() {
            Some(Statement::CondJump { true_block, .. }) => *true_block,
            _ => panic!("kill_trivial_conditional requires a trailing CondJump"),
        };
        *block.stmts.last_mut().unwrap() = Statement::Goto { target };
        debug!(block = %bb, "naturalize: collapsed trivial conditional");
    }

    /// Run every rewrite to a fixed point.
    pub fn process(&mut self) -> Result<(), InternalError> {
        loop {
            let mut applied = false;
            let ids: Vec<_> = self.func.cfg.blocks.keys().copied().collect();

            for bb in ids {
                if !self.func.cfg.blocks.contains_key(&bb) {
                    continue; // removed by an earlier rewrite this scan
                }
                let block = &self.func.cfg.blocks[&bb];

                // 1. Drop empty blocks.
                if block.stmts.is_empty() {
                    if !self.func.cfg.get_edges(bb).is_empty() || !self.func.cfg.get_edges_to(bb).is_empty() {
                        return Err(InternalError(format!("empty block {bb} has incident edges")));
                    }
                    self.func.cfg.remove_block(bb);
                    applied = true;
                    break;
                }

                // 2. Merge straight-line chains.
                let edges = self.func.cfg.get_edges(bb);
                if edges.len() == 1 {
                    let succ = *edges.iter().next().unwrap();
                    let succ_is_goto = matches!(self.func.cfg.blocks[&succ].stmts.last(), Some(Statement::Goto { .. }));
                    if self.func.cfg.get_edges_to(succ).len() == 1 && succ_is_goto {
                        self.merge(bb, succ);
                        applied = true;
                        break;
                    }
                }

                // 3. Inline single-jump blocks.
                if block.stmts.len() == 1 {
                    if let Statement::Goto { target } = block.stmts[0] {
                        if target != bb {
                            self.inline(bb, target);
                            applied = true;
                            break;
                        }
                    }
                }

                // 4. Collapse trivial conditionals.
                if let Some(Statement::CondJump { true_block, false_block, .. }) = block.stmts.last() {
                    if true_block == false_block {
                        self.kill_trivial_conditional(bb);
                        applied = true;
                        break;
                    }
                }
            }

            if !applied {
                return Ok(());
            }
        }
    }
}

/// Naturalize `func`'s CFG in place.
pub fn naturalize(func: &mut Function) -> Result<(), InternalError> {
    NaturalizationPass::new(func).process()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::ir::function::Function;
    use crate::ir::value::{Constant, Variable};
    use crate::types::Types;

    fn retval() -> Variable {
        Variable::scalar(id("_retval"), Types::Int)
    }

    #[test]
    fn merges_straight_line_chain() {
        let mut func = Function::new(id("f"), vec![], retval());
        let a = func.cfg.new_block();
        let b = func.cfg.new_block();
        func.cfg.blocks.get_mut(&a).unwrap().add_stmt(Statement::Goto { target: b });
        func.cfg.blocks.get_mut(&b).unwrap().add_stmt(Statement::Return);
        func.cfg.add_edge(FlowEdge::new(a, b));

        naturalize(&mut func).unwrap();

        assert_eq!(func.cfg.num_blocks(), 1);
        assert!(matches!(func.cfg.blocks[&a].stmts.last(), Some(Statement::Return)));
    }

    #[test]
    fn inlines_single_jump_block_and_skips_self_loop() {
        let mut func = Function::new(id("f"), vec![], retval());
        let entry = func.cfg.new_block();
        let mid = func.cfg.new_block();
        let end = func.cfg.new_block();

        let x = Variable::scalar(id("x"), Types::Int);
        func.cfg
            .blocks
            .get_mut(&entry)
            .unwrap()
            .add_stmt(Statement::Const { dst: x, imm: Constant::int(0, Types::Int) });
        func.cfg.blocks.get_mut(&entry).unwrap().add_stmt(Statement::Goto { target: mid });
        func.cfg.blocks.get_mut(&mid).unwrap().add_stmt(Statement::Goto { target: end });
        func.cfg.blocks.get_mut(&end).unwrap().add_stmt(Statement::Return);
        func.cfg.add_edge(FlowEdge::new(entry, mid));
        func.cfg.add_edge(FlowEdge::new(mid, end));

        naturalize(&mut func).unwrap();

        assert_eq!(func.cfg.num_blocks(), 1);
        assert!(func.cfg.get_edges(entry).is_empty());
    }

    #[test]
    fn collapses_trivial_conditional() {
        let mut func = Function::new(id("f"), vec![], retval());
        let entry = func.cfg.new_block();
        let end = func.cfg.new_block();
        let a = Variable::scalar(id("a"), Types::Int);
        func.cfg.blocks.get_mut(&entry).unwrap().add_stmt(Statement::CondJump {
            true_block: end,
            false_block: end,
            src_a: a,
            op: crate::ir::stmt::ComparisonOp::Equ,
            imm: Constant::int(0, Types::Int),
        });
        func.cfg.blocks.get_mut(&end).unwrap().add_stmt(Statement::Return);
        func.cfg.add_edge(FlowEdge::new(entry, end));

        naturalize(&mut func).unwrap();

        assert!(matches!(
            func.cfg.blocks[&entry].stmts.last(),
            Some(Statement::Goto { target }) if *target == end
        ));
    }

    #[test]
    fn is_idempotent() {
        let mut func = Function::new(id("f"), vec![], retval());
        let a = func.cfg.new_block();
        let b = func.cfg.new_block();
        func.cfg.blocks.get_mut(&a).unwrap().add_stmt(Statement::Goto { target: b });
        func.cfg.blocks.get_mut(&b).unwrap().add_stmt(Statement::Return);
        func.cfg.add_edge(FlowEdge::new(a, b));

        naturalize(&mut func).unwrap();
        let before = func.cfg.num_blocks();
        naturalize(&mut func).unwrap();
        assert_eq!(before, func.cfg.num_blocks());
    }
}
