//! Generic value operations: `add`, coercive equality, `typeof`,
//! string unquoting, and the function-type assertion.

use dynt_core::ValueKind;

use crate::coerce::{to_number, to_string};
use crate::fatal;
use crate::value::{FunctionVal, Value, box_int, box_str, box_string};

/// The generic `+`: integer addition only when both sides are boxed
/// integers, otherwise coerce both sides to strings and concatenate.
pub fn add(left: Value, right: Value) -> Value {
    if let (Some(l), Some(r)) = (left.as_int(), right.as_int()) {
        return box_int(l.wrapping_add(r));
    }

    let ls = to_string(left);
    let rs = to_string(right);
    let lb = ls.as_str_bytes().unwrap_or(&[]);
    let rb = rs.as_str_bytes().unwrap_or(&[]);
    let mut out = Vec::with_capacity(lb.len() + rb.len());
    out.extend_from_slice(lb);
    out.extend_from_slice(rb);
    box_string(&out)
}

/// Coercive equality.
///
/// Equal kinds compare directly (strings by content, objects and
/// functions by identity). Booleans coerce to numbers; objects and
/// functions coerce to strings against scalars; a number against a
/// string coerces the string to a number.
pub fn equal(left: Value, right: Value) -> bool {
    let mut left = left;
    let mut right = right;

    loop {
        let lk = left.kind();
        let rk = right.kind();

        let same_family = lk == rk
            || (lk == ValueKind::Object && rk == ValueKind::Function)
            || (lk == ValueKind::Function && rk == ValueKind::Object);

        if same_family {
            return match lk {
                ValueKind::BoxedInt => left.as_int() == right.as_int(),
                ValueKind::String => left.as_str_bytes() == right.as_str_bytes(),
                _ => left.same(right),
            };
        }

        if lk == ValueKind::BoxedBool {
            left = box_int(to_number(left));
            continue;
        }
        if rk == ValueKind::BoxedBool {
            right = box_int(to_number(right));
            continue;
        }

        if matches!(lk, ValueKind::Object | ValueKind::Function)
            || matches!(rk, ValueKind::Object | ValueKind::Function)
        {
            left = to_string(left);
            right = to_string(right);
            continue;
        }

        if lk == ValueKind::BoxedInt && rk == ValueKind::String {
            right = box_int(to_number(right));
            continue;
        }
        if lk == ValueKind::String && rk == ValueKind::BoxedInt {
            left = box_int(to_number(left));
            continue;
        }

        return false;
    }
}

/// The `typeof` operator's result string.
pub fn typeof_value(value: Value) -> Value {
    let name = match value.kind() {
        ValueKind::BoxedUndefined => "undefined",
        ValueKind::BoxedBool => "boolean",
        ValueKind::BoxedInt => "number",
        ValueKind::String => "string",
        ValueKind::Object => "object",
        ValueKind::Function => "function",
        _ => "???",
    };
    box_str(name)
}

/// Strip the outer quotes from a string lexeme and process `\n`, `\r`
/// and `\\` escapes; any other escaped character stands for itself.
pub fn unquote(lexeme: Value) -> Value {
    let bytes = lexeme.as_str_bytes().unwrap_or(&[]);
    let inner = if bytes.len() >= 2 { &bytes[1..bytes.len() - 1] } else { &[][..] };

    let mut out = Vec::with_capacity(inner.len());
    let mut iter = inner.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(&other) => out.push(other),
            None => out.push(b'\\'),
        }
    }
    box_string(&out)
}

/// Assert that `value` is a function. Fatal otherwise: there is no
/// recoverable error surface for calling a non-function.
pub fn assert_function(value: Value) -> &'static FunctionVal {
    match value.as_function() {
        Some(func) => func,
        None => fatal(&format!("attempt to call a non-function ({})", value.kind())),
    }
}
