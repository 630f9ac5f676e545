//! The runtime entry points emitted code calls.
//!
//! Every routine takes the pointer-stack top as its first argument and
//! republishes it before doing anything that could allocate, so a
//! collection triggered here sees the caller's full frame. All value
//! arguments and results are boxed. These functions follow the platform
//! C ABI; the emitter materialises their addresses as 64-bit immediates.

use crate::value::{Value, box_bool, box_int};
use crate::{call, coerce, object, ops, pstack};

pub extern "C" fn rt_box_bool(pstack: *mut Value, value: i64) -> Value {
    pstack::publish(pstack);
    box_bool(value != 0)
}

pub extern "C" fn rt_box_int(pstack: *mut Value, value: i64) -> Value {
    pstack::publish(pstack);
    box_int(value)
}

pub extern "C" fn rt_to_bool(pstack: *mut Value, value: Value) -> i64 {
    pstack::publish(pstack);
    coerce::to_bool(value) as i64
}

pub extern "C" fn rt_to_number(pstack: *mut Value, value: Value) -> i64 {
    pstack::publish(pstack);
    coerce::to_number(value)
}

pub extern "C" fn rt_to_string(pstack: *mut Value, value: Value) -> Value {
    pstack::publish(pstack);
    coerce::to_string(value)
}

pub extern "C" fn rt_to_object(pstack: *mut Value, value: Value) -> Value {
    pstack::publish(pstack);
    coerce::to_object(value)
}

pub extern "C" fn rt_add(pstack: *mut Value, left: Value, right: Value) -> Value {
    pstack::publish(pstack);
    ops::add(left, right)
}

pub extern "C" fn rt_equal(pstack: *mut Value, left: Value, right: Value) -> i64 {
    pstack::publish(pstack);
    ops::equal(left, right) as i64
}

pub extern "C" fn rt_typeof(pstack: *mut Value, value: Value) -> Value {
    pstack::publish(pstack);
    ops::typeof_value(value)
}

pub extern "C" fn rt_assert_function(pstack: *mut Value, value: Value) -> Value {
    pstack::publish(pstack);
    ops::assert_function(value);
    value
}

pub extern "C" fn rt_new_object(pstack: *mut Value) -> Value {
    pstack::publish(pstack);
    object::new_object()
}

pub extern "C" fn rt_object_get(pstack: *mut Value, obj: Value, key: Value) -> Value {
    pstack::publish(pstack);
    object::object_get(obj, key)
}

/// Returns the stored value so member assignment has a result.
pub extern "C" fn rt_object_set(pstack: *mut Value, obj: Value, key: Value, value: Value) -> Value {
    pstack::publish(pstack);
    object::object_set(obj, key, value);
    value
}

pub extern "C" fn rt_call(pstack: *mut Value, func: Value, argc: u64, argv: *const Value) -> Value {
    pstack::publish(pstack);
    let args = if argc == 0 || argv.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(argv, argc as usize) }
    };
    call::call_value(func, args)
}

/// Landing routine for failed type speculation. No deoptimiser exists,
/// so this is fatal.
pub extern "C" fn rt_speculate_fail(pstack: *mut Value) -> Value {
    pstack::publish(pstack);
    crate::fatal("type speculation failed with no deoptimiser");
}
