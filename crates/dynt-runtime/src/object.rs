//! Object member access.
//!
//! Member get on a non-object yields `undefined`; member set on a
//! non-object is a no-op. Keys are string values, interned before the
//! shape probe so lookup compares symbols, not bytes.

use std::cell::{Cell, RefCell};

use dynt_core::InternedStr;

use crate::globals::{empty_shape, heap, intern_pool, undefined};
use crate::value::{DESC_OBJECT, Header, ObjectVal, Value};

/// Create an empty object bound to the empty shape.
pub fn new_object() -> Value {
    let obj = heap().alloc(ObjectVal {
        header: Header::new(&DESC_OBJECT),
        shape: Cell::new(empty_shape()),
        members: RefCell::new(Vec::new()),
    });
    Value(&obj.header)
}

fn key_symbol(key: Value) -> InternedStr {
    let bytes = key.as_str_bytes().unwrap_or(&[]);
    intern_pool().intern(String::from_utf8_lossy(bytes))
}

/// Slot index of `key` in `obj`, optionally growing the object.
///
/// With `create`, a missing key extends the member array by one
/// `undefined` slot and moves the object along the shape tree (following
/// an existing transition when one exists).
pub fn member_index(obj: &ObjectVal, key: InternedStr, create: bool) -> Option<usize> {
    let shape = obj.shape.get();
    if let Some(idx) = shape.member_index(key) {
        return Some(idx);
    }
    if !create {
        return None;
    }

    let slot = {
        let mut members = obj.members.borrow_mut();
        members.push(undefined());
        members.len() - 1
    };
    obj.shape.set(shape.transition(key));
    debug_assert_eq!(obj.shape.get().size(), obj.members.borrow().len());
    Some(slot)
}

/// `obj[key]`, or `undefined` when `obj` is not an object or lacks the key.
pub fn object_get(obj: Value, key: Value) -> Value {
    let Some(object) = obj.as_object() else {
        return undefined();
    };
    match member_index(object, key_symbol(key), false) {
        Some(idx) => object.members.borrow()[idx],
        None => undefined(),
    }
}

/// `obj[key] = value`; silently ignored when `obj` is not an object.
pub fn object_set(obj: Value, key: Value, value: Value) {
    let Some(object) = obj.as_object() else {
        return;
    };
    let idx = member_index(object, key_symbol(key), true).expect("create always yields a slot");
    object.members.borrow_mut()[idx] = value;
}

/// `object_set` with a pre-interned key, for runtime-internal callers.
pub fn object_set_interned(obj: Value, key: InternedStr, value: Value) {
    let Some(object) = obj.as_object() else {
        return;
    };
    let idx = member_index(object, key, true).expect("create always yields a slot");
    object.members.borrow_mut()[idx] = value;
}

/// `object_get` with a pre-interned key.
pub fn object_get_interned(obj: Value, key: InternedStr) -> Value {
    let Some(object) = obj.as_object() else {
        return undefined();
    };
    match member_index(object, key, false) {
        Some(idx) => object.members.borrow()[idx],
        None => undefined(),
    }
}
