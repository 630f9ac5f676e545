//! Intrinsic functions, callable from source as `$name(...)`.
//!
//! The table is fixed and resolved by exact match at compile time.
//! `$print` writes the string coercion of its argument plus a newline;
//! `$eval` re-enters the toplevel on its argument as a fresh source
//! buffer, sharing the global object. The toplevel executor lives above
//! the runtime, so `$eval` goes through an installed hook.

use std::io::Write;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::coerce::to_string;
use crate::globals::undefined;
use crate::pstack;
use crate::value::{NativeFn, Value, box_str};

/// Runs a source buffer at the toplevel. Installed by the executor.
pub type EvalHook = fn(&[u8]);

static EVAL_HOOK: OnceLock<EvalHook> = OnceLock::new();

/// Install the `$eval` re-entry hook. Later installs are ignored.
pub fn set_eval_hook(hook: EvalHook) {
    EVAL_HOOK.set(hook).ok();
}

/// Where `$print` writes: captured during tests, stdout otherwise.
static CAPTURE: Mutex<Option<Vec<u8>>> = Mutex::new(None);

/// Start capturing `$print` output instead of writing to stdout.
pub fn capture_output() {
    *CAPTURE.lock() = Some(Vec::new());
}

/// Stop capturing and return everything captured since `capture_output`.
pub fn take_output() -> Vec<u8> {
    CAPTURE.lock().take().unwrap_or_default()
}

fn print_bytes(bytes: &[u8]) {
    let mut capture = CAPTURE.lock();
    if let Some(buf) = capture.as_mut() {
        buf.extend_from_slice(bytes);
        buf.push(b'\n');
        return;
    }
    drop(capture);

    let mut out = std::io::stdout().lock();
    let _ = out.write_all(bytes);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

/// Look an intrinsic up by its `$`-prefixed name.
pub fn lookup(name: &str) -> Option<NativeFn> {
    match name {
        "$print" => Some(intrinsic_print as NativeFn),
        "$eval" => Some(intrinsic_eval as NativeFn),
        _ => None,
    }
}

/// `$print(v)`: write `to_string(v)` followed by a newline.
unsafe extern "C" fn intrinsic_print(pstack: *mut Value, argc: u64, argv: *const Value) -> Value {
    pstack::publish(pstack);

    if argc < 1 || argv.is_null() {
        return undefined();
    }
    let arg = unsafe { *argv };
    let text = to_string(arg);
    print_bytes(text.as_str_bytes().unwrap_or(&[]));
    undefined()
}

/// `$eval(s)`: execute `s` as a fresh toplevel sharing the global object.
unsafe extern "C" fn intrinsic_eval(pstack: *mut Value, argc: u64, argv: *const Value) -> Value {
    pstack::publish(pstack);

    let source = if argc >= 1 && !argv.is_null() {
        to_string(unsafe { *argv })
    } else {
        box_str("")
    };

    let Some(hook) = EVAL_HOOK.get() else {
        crate::fatal("no toplevel executor installed for $eval");
    };
    hook(source.as_str_bytes().unwrap_or(&[]));
    undefined()
}
