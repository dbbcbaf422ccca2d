//! Relocations: deferred rewrites of emitted lines once a symbol's
//! address is known (spec.md §4.7).
//!
//! Grounded on `gwcc/backend/lc3.py`'s `Relocation`/`make_reloc`/
//! `_apply_reloc`/`apply_relocations`. The original captures a bound
//! method and argument tuple as the deferred emitter; per spec.md §9's
//! "closures captured by relocations" design note this becomes a small
//! closed `RelocAction` enum instead.

use crate::backend::emitter::Emitter;
use crate::backend::regalloc::Reg;
use crate::common::{Id, Map};
use crate::error::InternalError;

/// The closed set of deferred-emission shapes a relocation may regenerate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocAction {
    /// Re-run the constant-length register load (spec.md §4.6) with the
    /// resolved value.
    LoadConstant(Reg),
    /// Re-run a single `.fill` with the resolved value (spec.md §4.6's
    /// `Goto`/`CondJump` long-jump targets and pointer-constant loads). The
    /// optional name preserves a global initializer's own label on the
    /// same line.
    DumpAddress(Option<Id>),
}

impl RelocAction {
    fn emit(self, emitter: &mut Emitter, value: u16) {
        match self {
            RelocAction::LoadConstant(reg) => crate::backend::lc3::cl_load_reg(emitter, reg, value),
            RelocAction::DumpAddress(name) => {
                let owned = name.map(|n| n.to_string());
                emitter.emit_fill(value, owned.as_deref());
            }
        }
    }
}

/// A deferred rewrite: the line span `[line_idx, line_idx + line_len)` was
/// emitted with a placeholder value of 0 for `symbol`, and must be
/// regenerated once `symbol`'s address is known.
struct Relocation {
    line_idx: usize,
    line_len: usize,
    action: RelocAction,
    symbol: Id,
}

/// The set of relocations recorded during a single backend compilation
/// (spec.md §4.7). Lives only for the duration of assembling one program.
#[derive(Default)]
pub struct RelocationTable {
    pending: Vec<Relocation>,
}

impl RelocationTable {
    pub fn new() -> Self {
        RelocationTable::default()
    }

    /// Emit `action` against `symbol` with a placeholder value of 0, and
    /// record a relocation to regenerate it later.
    pub fn make_reloc(&mut self, emitter: &mut Emitter, symbol: Id, action: RelocAction) {
        let line_idx = emitter.num_lines();
        action.emit(emitter, 0);
        let line_len = emitter.num_lines() - line_idx;
        self.pending.push(Relocation {
            line_idx,
            line_len,
            action,
            symbol,
        });
    }

    /// Re-run every pending relocation's action with its symbol's resolved
    /// address, splicing the regenerated lines in place of the
    /// placeholder. Every regenerated span must have the same line count
    /// as its placeholder; a mismatch is an internal error (spec.md §4.7).
    pub fn apply(&self, emitter: &mut Emitter, symbols: &Map<Id, u16>) -> Result<(), InternalError> {
        for reloc in &self.pending {
            let value = *symbols
                .get(&reloc.symbol)
                .ok_or_else(|| InternalError(format!("unresolved symbol in relocation: {}", reloc.symbol)))?;
            let start_loc = emitter
                .loc_at(reloc.line_idx)
                .ok_or_else(|| InternalError(format!("relocation at line {} has no recorded location", reloc.line_idx)))?;

            let mut scratch = Emitter::scratch(emitter.quiet(), start_loc);
            reloc.action.emit(&mut scratch, value);
            let regenerated = scratch.into_lines();
            if regenerated.len() != reloc.line_len {
                return Err(InternalError(format!(
                    "relocation for {} changed length: was {}, now {}",
                    reloc.symbol,
                    reloc.line_len,
                    regenerated.len()
                )));
            }
            emitter.splice(reloc.line_idx, reloc.line_len, regenerated);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    #[test]
    fn placeholder_and_resolved_load_have_equal_length() {
        let mut emitter = Emitter::new(false);
        let mut table = RelocationTable::new();
        table.make_reloc(&mut emitter, id("main"), RelocAction::LoadConstant(Reg::R0));

        let mut symbols = Map::new();
        symbols.insert(id("main"), 0x3005);
        table.apply(&mut emitter, &symbols).unwrap();
    }

    #[test]
    fn unresolved_symbol_is_an_internal_error() {
        let mut emitter = Emitter::new(false);
        let mut table = RelocationTable::new();
        table.make_reloc(&mut emitter, id("missing"), RelocAction::DumpAddress(None));
        assert!(table.apply(&mut emitter, &Map::new()).is_err());
    }
}
