//! A minimal textual surface syntax for the IR contract (spec.md §6.1).
//!
//! The middle-end's own three-address form has no concrete syntax of its
//! own; this module gives it one so test cases and example programs can be
//! written directly against the IR rather than requiring a full C frontend,
//! which is out of scope. Grounded structurally on
//! `parishoffman-smol/src/front.rs`'s `lex`/`parse`/`ast`/`lower` pipeline
//! shape.

pub mod ast;
pub mod lex;
pub mod lower;
pub mod parse;

use crate::error::CompileError;
use crate::ir::Program;

/// Parse and lower a full program from its textual surface syntax.
pub fn compile_source(text: &str) -> Result<Program, CompileError> {
    let ast = parse::parse(text)?;
    let program = lower::lower(ast)?;
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_source_straight_through_to_ir() {
        let program = compile_source("global int x = 7").unwrap();
        assert_eq!(program.globals.len(), 1);
    }
}
