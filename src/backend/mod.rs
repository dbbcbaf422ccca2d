//! The LC-3 backend (spec.md §4): register allocation, relocations, the
//! assembly emitter, and the code generator itself.

pub mod emitter;
pub mod lc3;
pub mod regalloc;
pub mod reloc;

pub use lc3::Lc3Backend;
