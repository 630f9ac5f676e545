//! Runtime support library for dynt.
//!
//! Everything the emitted native code needs at run time lives here: the
//! boxed value model, the non-moving heap behind the allocator interface,
//! the GC-scanned pointer stack, object shapes, coercions, the generic
//! `add`/`equal` routines, the intrinsic table, and the compile-on-demand
//! call trampoline.
//!
//! The process-wide pieces (the three singletons, the empty shape, the
//! global object, the pointer-stack region) are created once by
//! [`globals::init`] and exposed only through lookup accessors; the
//! emitter additionally gets the fixed addresses of the cells holding
//! them so generated code can load them with two instructions.
//!
//! Execution is single-threaded (generated code, allocator and runtime
//! all share one OS thread); the shared tables still use `parking_lot`
//! locks so the crate holds up under Rust's aliasing rules.

pub mod abi;
pub mod call;
pub mod coerce;
pub mod globals;
pub mod heap;
pub mod intrinsics;
pub mod object;
pub mod ops;
pub mod pstack;
pub mod shape;
pub mod value;

pub use call::{CompileHook, box_function, call_value, ensure_compiled, set_compile_hook};
pub use globals::{boolean, global_object, init, undefined};
pub use heap::Heap;
pub use shape::Shape;
pub use value::{FunctionVal, Header, NativeFn, ObjectVal, TypeDesc, Value};

/// Report an unrecoverable runtime condition and abort the process.
///
/// Runtime errors have no recoverable surface: coercions never fail, and
/// the few fatal cases (calling a non-function, unknown intrinsic) take
/// the whole process down.
pub fn fatal(msg: &str) -> ! {
    eprintln!("dynt: fatal: {}", msg);
    std::process::abort();
}
