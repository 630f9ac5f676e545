//! Calling functions, with JIT compilation on demand.
//!
//! The runtime cannot depend on the code generator, so compilation goes
//! through a trampoline hook the JIT installs at startup: the first call
//! to a function compiles it and caches the native entry point on the
//! function value.

use std::cell::{Cell, RefCell};
use std::sync::OnceLock;

use dynt_syntax::Node;
use tracing::debug;

use crate::globals::heap;
use crate::ops::assert_function;
use crate::pstack;
use crate::value::{DESC_FUNCTION, FunctionVal, Header, NativeFn, Value};
use crate::{fatal, intrinsics};

/// Compiles a function value to native code. Installed once by the JIT.
pub type CompileHook = fn(&'static FunctionVal) -> NativeFn;

static COMPILE_HOOK: OnceLock<CompileHook> = OnceLock::new();

/// Install the compile trampoline. Later installs are ignored.
pub fn set_compile_hook(hook: CompileHook) {
    COMPILE_HOOK.set(hook).ok();
}

/// Box a function declaration into a function value. Compilation is
/// deferred to the first call.
pub fn box_function(decl: &'static Node) -> Value {
    let func = heap().alloc(FunctionVal {
        header: Header::new(&DESC_FUNCTION),
        decl,
        ir: RefCell::new(None),
        native: Cell::new(None),
    });
    Value(&func.header)
}

/// The function's native entry point, compiling it first if needed.
pub fn ensure_compiled(func: &'static FunctionVal) -> NativeFn {
    if let Some(native) = func.native.get() {
        return native;
    }

    let Some(hook) = COMPILE_HOOK.get() else {
        fatal("no compiler installed");
    };
    debug!(func = func.decl.text(), "jit compiling");
    let native = hook(func);
    func.native.set(Some(native));
    native
}

/// Call `callee` with the given boxed arguments (argument 0 is the
/// receiver). Asserts the callee is a function, force-compiles it, and
/// invokes the native code with the current pointer-stack top.
pub fn call_value(callee: Value, args: &[Value]) -> Value {
    let func = assert_function(callee);
    let native = ensure_compiled(func);

    let argv = if args.is_empty() { std::ptr::null() } else { args.as_ptr() };
    unsafe { native(pstack::top(), args.len() as u64, argv) }
}

/// Resolve an intrinsic name to its native entry at compile time.
/// Unknown names are fatal, matching the no-error-surface policy.
pub fn resolve_intrinsic(name: &str) -> NativeFn {
    match intrinsics::lookup(name) {
        Some(native) => native,
        None => fatal(&format!("unknown intrinsic {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::init;
    use dynt_core::ValueKind;
    use dynt_syntax::{Node, NodeKind};

    #[test]
    fn boxed_functions_carry_their_declaration() {
        init();
        let decl: &'static Node = Box::leak(Box::new(Node::leaf(
            NodeKind::FunDecl,
            Some("probe".into()),
        )));
        let value = box_function(decl);
        assert_eq!(value.kind(), ValueKind::Function);
        let func = value.as_function().expect("a function");
        assert_eq!(func.decl.text(), "probe");
        assert!(func.native.get().is_none());
        assert!(func.ir.borrow().is_none());
    }
}
