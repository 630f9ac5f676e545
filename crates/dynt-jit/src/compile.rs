//! The compile driver: parse tree to native function pointer.
//!
//! Compilation is lazy and cached on the function value: the IR is built
//! (and type-flowed and storage-allocated) on first demand, then emitted
//! and mapped executable. Compile-time failures abort the process; by
//! then the source has already parsed, so they indicate a compiler
//! defect rather than bad user input.

use dynt_core::compile_ir;
use dynt_runtime::value::NativeFn;
use dynt_runtime::{FunctionVal, fatal};
use tracing::debug;

use crate::emitter::emit;
use crate::exec_mem::map_executable;

/// Compile a function value to native code. Installed as the runtime's
/// compile trampoline; the runtime caches the result on the value.
pub fn compile_function(func: &'static FunctionVal) -> NativeFn {
    if func.ir.borrow().is_none() {
        let ir = match compile_ir(func.decl) {
            Ok(ir) => ir,
            Err(err) => fatal(&format!("cannot lower {}: {}", func.decl.text(), err)),
        };
        *func.ir.borrow_mut() = Some(Box::new(ir));
    }

    let ir_slot = func.ir.borrow();
    let ir = ir_slot.as_ref().expect("ir was just built");

    let code = match emit(ir) {
        Ok(code) => code,
        Err(err) => fatal(&format!("cannot emit {}: {}", func.decl.text(), err)),
    };

    match map_executable(&code) {
        Ok(native) => {
            debug!(func = func.decl.text(), bytes = code.len(), "compiled");
            native
        }
        Err(err) => fatal(&format!("cannot map code for {}: {}", func.decl.text(), err)),
    }
}
