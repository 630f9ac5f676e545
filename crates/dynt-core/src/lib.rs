//! Compiler core for dynt: IR construction, type propagation, storage
//! allocation.
//!
//! The pipeline runs strictly forward over one function at a time:
//!
//! ```text
//! parse tree ──► IR builder ──► type flow ──► storage allocator
//! ```
//!
//! The produced [`ir::Ir`] is a flat instruction sequence in a
//! single-assignment style with explicit unification ([`ir::Op::Unify`])
//! at control-flow joins. After [`storage`] runs, every live instruction
//! has a home in either the data stack or the GC-scanned pointer stack,
//! ready for the native-code emitter.

pub mod interner;
pub mod ir;
pub mod ir_builder;
pub mod printer;
pub mod storage;
pub mod typeflow;

pub use interner::{InternPool, InternedStr};
pub use ir::{Insn, Ir, Op, Storage, ValueKind};
pub use ir_builder::build_ir;
pub use printer::print_ir;
pub use storage::allocate_storage;
pub use typeflow::flow_types;

use dynt_error::Result;
use dynt_syntax::Node;

/// Compile a `FunDecl` parse tree to typed, storage-allocated IR.
///
/// Convenience wrapper running all three core phases.
pub fn compile_ir(func: &Node) -> Result<Ir> {
    let mut ir = build_ir(func)?;
    flow_types(&mut ir);
    allocate_storage(&mut ir);
    Ok(ir)
}
