//! The dynt JIT back end.
//!
//! Walks typed, storage-allocated IR once and appends x86-64 machine
//! code to a byte buffer, then maps it executable. The crate also owns
//! the compile driver (parse tree to cached native function pointer) and
//! the toplevel program executor.
//!
//! [`init`] wires the whole system together: it initialises the runtime
//! and installs the compile trampoline and the `$eval` re-entry hook.

pub mod asm;
pub mod compile;
pub mod emitter;
pub mod exec;
pub mod exec_mem;

pub use compile::compile_function;
pub use emitter::emit;
pub use exec::execute_source;

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise the runtime and install the JIT hooks. Idempotent; must
/// run before any program executes.
pub fn init() {
    INIT.call_once(|| {
        dynt_runtime::init();
        dynt_runtime::set_compile_hook(compile::compile_function);
        dynt_runtime::intrinsics::set_eval_hook(exec::eval_entry);
    });
}
