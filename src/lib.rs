//! lc3cc: a retargetable middle-end IR and LC-3 backend.
//!
//! See `src/bin/lc3cc.rs` for the CLI driver using this library.

pub mod backend;
pub mod common;
pub mod error;
pub mod frontend;
pub mod ir;
pub mod liveness;
pub mod naturalize;
pub mod types;

use tracing::debug;

use crate::backend::Lc3Backend;
use crate::error::CompileError;

/// Run the full pipeline: parse the textual IR surface syntax, lower it,
/// naturalize and verify every function, and assemble LC-3 source
/// (spec.md §6.1-§6.2).
pub fn compile(source: &str, quiet: bool) -> Result<String, CompileError> {
    let mut program = frontend::compile_source(source)?;

    for func in program.functions_mut() {
        debug!(function = %func.name, "naturalizing");
        naturalize::naturalize(func)?;
        func.verify()?;
    }

    let mut backend = Lc3Backend::new(quiet);
    backend.compile(&program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_function_to_assembly() {
        let src = "func main(): int {\nentry:\n_retval = const 0\nreturn\n}\n";
        let asm = compile(src, true).unwrap();
        assert!(asm.contains(".orig x3000"));
        assert!(asm.contains(".end"));
    }

    #[test]
    fn compiles_an_integer_global() {
        let src = "global int x = 7\nfunc main(): int {\nentry:\n_retval = const 0\nreturn\n}\n";
        let asm = compile(src, true).unwrap();
        assert!(asm.contains("_0_x .fill x0007"));
    }

    #[test]
    fn reports_a_parse_error_for_malformed_source() {
        assert!(compile("not valid source", true).is_err());
    }
}
