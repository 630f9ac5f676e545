//! Boxed value layout.
//!
//! Every heap value starts with one word: a pointer to a static, per-kind
//! [`TypeDesc`] whose first 8 bytes are the kind code. Generated code
//! reads a value's kind with two loads (`[[v+0]+0]`), and unboxes the
//! scalar kinds with a single load from offset 8. The runtime and the
//! emitter agree on exactly this layout and nothing else about a value's
//! interior.

use std::cell::{Cell, RefCell};

use dynt_core::{Ir, ValueKind};
use dynt_syntax::Node;

use crate::globals::{boolean, heap};

/// Layout descriptor: the tag every boxed value's first word points to.
///
/// `kind` is a [`ValueKind`] discriminant widened to a word. `ptr_map` is
/// the layout word for a precise collector: bit `i` marks the `i`-th word
/// after the header as a traced reference.
#[repr(C)]
pub struct TypeDesc {
    pub kind: u64,
    pub ptr_map: u64,
}

pub static DESC_UNDEFINED: TypeDesc =
    TypeDesc { kind: ValueKind::BoxedUndefined as u64, ptr_map: 0 };
pub static DESC_BOOL: TypeDesc = TypeDesc { kind: ValueKind::BoxedBool as u64, ptr_map: 0 };
pub static DESC_INT: TypeDesc = TypeDesc { kind: ValueKind::BoxedInt as u64, ptr_map: 0 };
pub static DESC_STRING: TypeDesc = TypeDesc { kind: ValueKind::String as u64, ptr_map: 0 };
pub static DESC_OBJECT: TypeDesc = TypeDesc { kind: ValueKind::Object as u64, ptr_map: 0b11 };
pub static DESC_FUNCTION: TypeDesc = TypeDesc { kind: ValueKind::Function as u64, ptr_map: 0b1 };

/// The leading word of every boxed value.
#[repr(C)]
pub struct Header {
    pub desc: *const TypeDesc,
}

impl Header {
    pub fn new(desc: &'static TypeDesc) -> Self {
        Self { desc }
    }
}

/// Signature of compiled function bodies: `(pointer-stack top, argc, argv)`
/// in the first three argument registers, boxed result in the return
/// register. All values crossing this boundary are boxed.
pub type NativeFn = unsafe extern "C" fn(*mut Value, u64, *const Value) -> Value;

/// A dynamically-typed runtime value: a pointer to a boxed heap value.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct Value(pub *const Header);

impl Value {
    pub fn null() -> Self {
        Value(std::ptr::null())
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// The runtime kind, read through the descriptor.
    pub fn kind(self) -> ValueKind {
        debug_assert!(!self.0.is_null());
        let code = unsafe { (*(*self.0).desc).kind };
        ValueKind::from_repr(code as u8).unwrap_or(ValueKind::Boxed)
    }

    /// Identity comparison.
    pub fn same(self, other: Value) -> bool {
        std::ptr::eq(self.0, other.0)
    }

    pub fn as_int(self) -> Option<i64> {
        (self.kind() == ValueKind::BoxedInt)
            .then(|| unsafe { (*(self.0 as *const IntVal)).value })
    }

    pub fn as_bool(self) -> Option<bool> {
        (self.kind() == ValueKind::BoxedBool)
            .then(|| unsafe { (*(self.0 as *const BoolVal)).value != 0 })
    }

    pub fn as_str_bytes(self) -> Option<&'static [u8]> {
        (self.kind() == ValueKind::String).then(|| {
            let s = unsafe { &*(self.0 as *const StrVal) };
            if s.len == 0 {
                &[]
            } else {
                unsafe { std::slice::from_raw_parts(s.bytes, s.len as usize) }
            }
        })
    }

    pub fn as_object(self) -> Option<&'static ObjectVal> {
        (self.kind() == ValueKind::Object).then(|| unsafe { &*(self.0 as *const ObjectVal) })
    }

    pub fn as_function(self) -> Option<&'static FunctionVal> {
        (self.kind() == ValueKind::Function).then(|| unsafe { &*(self.0 as *const FunctionVal) })
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            return write!(f, "Value(null)");
        }
        write!(f, "Value({}@{:p})", self.kind(), self.0)
    }
}

/// The `undefined` singleton's layout.
#[repr(C)]
pub struct UndefinedVal {
    pub header: Header,
}

/// Boxed boolean; only the two singletons exist.
#[repr(C)]
pub struct BoolVal {
    pub header: Header,
    pub value: i64,
}

/// Boxed 64-bit signed integer.
#[repr(C)]
pub struct IntVal {
    pub header: Header,
    pub value: i64,
}

/// Immutable byte string: length then data pointer.
#[repr(C)]
pub struct StrVal {
    pub header: Header,
    pub len: u64,
    pub bytes: *const u8,
}

/// An object: a shape reference plus the dense member-slot array. The
/// array's length always equals the shape's member count.
#[repr(C)]
pub struct ObjectVal {
    pub header: Header,
    pub shape: Cell<&'static crate::shape::Shape>,
    pub members: RefCell<Vec<Value>>,
}

/// A function value: the source parse tree, the lazily-built IR, and the
/// lazily-emitted native entry point.
#[repr(C)]
pub struct FunctionVal {
    pub header: Header,
    pub decl: &'static Node,
    pub ir: RefCell<Option<Box<Ir>>>,
    pub native: Cell<Option<NativeFn>>,
}

/// Box an integer; heap-allocates.
pub fn box_int(value: i64) -> Value {
    let boxed = heap().alloc(IntVal { header: Header::new(&DESC_INT), value });
    Value(&boxed.header)
}

/// Box a boolean; returns one of the two singletons.
pub fn box_bool(value: bool) -> Value {
    boolean(value)
}

/// Box a byte string; copies the bytes into the heap.
pub fn box_string(bytes: &[u8]) -> Value {
    let data = heap().alloc_bytes(bytes);
    let boxed = heap().alloc(StrVal {
        header: Header::new(&DESC_STRING),
        len: data.len() as u64,
        bytes: data.as_ptr(),
    });
    Value(&boxed.header)
}

/// Convenience for runtime-internal string constants.
pub fn box_str(text: &str) -> Value {
    box_string(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn payloads_sit_at_offset_eight() {
        // the emitter unboxes scalars with a single load from +8
        assert_eq!(offset_of!(IntVal, value), 8);
        assert_eq!(offset_of!(BoolVal, value), 8);
        assert_eq!(offset_of!(StrVal, len), 8);
        assert_eq!(offset_of!(UndefinedVal, header), 0);
        assert_eq!(offset_of!(ObjectVal, header), 0);
        assert_eq!(offset_of!(FunctionVal, header), 0);
    }

    #[test]
    fn descriptor_kind_sits_at_offset_zero() {
        assert_eq!(offset_of!(TypeDesc, kind), 0);
        assert_eq!(offset_of!(Header, desc), 0);
    }

    #[test]
    fn boxed_values_read_their_kind_through_the_descriptor() {
        crate::globals::init();
        let v = box_int(42);
        assert_eq!(v.kind(), ValueKind::BoxedInt);
        assert_eq!(v.as_int(), Some(42));

        let s = box_str("hi");
        assert_eq!(s.kind(), ValueKind::String);
        assert_eq!(s.as_str_bytes(), Some(&b"hi"[..]));

        let t = box_bool(true);
        assert_eq!(t.kind(), ValueKind::BoxedBool);
        assert_eq!(t.as_bool(), Some(true));
    }

    #[test]
    fn bool_boxing_returns_singletons() {
        crate::globals::init();
        assert!(box_bool(true).same(box_bool(true)));
        assert!(box_bool(false).same(box_bool(false)));
        assert!(!box_bool(true).same(box_bool(false)));
    }
}
