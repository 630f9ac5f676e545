//! Type coercions. Coercion never fails.

use dynt_core::ValueKind;

use crate::value::{Value, box_str, box_string};

/// Truthiness: `undefined`, zero and the empty string are false;
/// booleans are themselves; everything else is true.
pub fn to_bool(value: Value) -> bool {
    match value.kind() {
        ValueKind::BoxedBool => value.as_bool().unwrap_or(false),
        ValueKind::BoxedUndefined => false,
        ValueKind::BoxedInt => value.as_int().unwrap_or(0) != 0,
        ValueKind::String => !value.as_str_bytes().unwrap_or(&[]).is_empty(),
        _ => true,
    }
}

/// Numeric coercion. Strings parse as an optional sign followed by
/// decimal digits, stopping at the first non-digit; there is no leading
/// whitespace handling, so `"  12"` is 0 while `"12x"` is 12.
pub fn to_number(value: Value) -> i64 {
    match value.kind() {
        ValueKind::BoxedInt => value.as_int().unwrap_or(0),
        ValueKind::BoxedUndefined => 0,
        ValueKind::BoxedBool => value.as_bool().unwrap_or(false) as i64,
        ValueKind::String => parse_number(value.as_str_bytes().unwrap_or(&[])),
        _ => 0,
    }
}

fn parse_number(bytes: &[u8]) -> i64 {
    let mut iter = bytes.iter().peekable();
    let sign = match iter.peek() {
        Some(b'-') => {
            iter.next();
            -1
        }
        Some(b'+') => {
            iter.next();
            1
        }
        _ => 1,
    };

    let mut value: i64 = 0;
    for &b in iter {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.wrapping_mul(10).wrapping_add((b - b'0') as i64);
    }
    sign * value
}

/// String coercion.
pub fn to_string(value: Value) -> Value {
    match value.kind() {
        ValueKind::String => value,
        ValueKind::BoxedUndefined => box_str("undefined"),
        ValueKind::BoxedBool => {
            if value.as_bool().unwrap_or(false) {
                box_str("true")
            } else {
                box_str("false")
            }
        }
        ValueKind::BoxedInt => box_string(value.as_int().unwrap_or(0).to_string().as_bytes()),
        ValueKind::Object => box_str("[object Object]"),
        ValueKind::Function => box_str("[function]"),
        _ => box_str("[ERROR!]"),
    }
}

/// Coerce to a string or a number, preferring to leave numbers and
/// strings alone.
pub fn to_value(value: Value) -> Value {
    match value.kind() {
        ValueKind::BoxedInt | ValueKind::String => value,
        _ => to_string(value),
    }
}

/// Object coercion. There are no wrapper objects in this language, so
/// anything that is not an object becomes `undefined`, and member access
/// through the result behaves like member access on a non-object.
pub fn to_object(value: Value) -> Value {
    match value.kind() {
        ValueKind::Object | ValueKind::Function => value,
        _ => crate::globals::undefined(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::{boolean, global_object, init, undefined};
    use crate::value::{box_int, box_str};
    use pretty_assertions::assert_eq;

    fn text(v: Value) -> String {
        String::from_utf8_lossy(v.as_str_bytes().expect("a string")).into_owned()
    }

    #[test]
    fn truthiness_follows_the_contract() {
        init();
        assert!(!to_bool(undefined()));
        assert!(!to_bool(box_int(0)));
        assert!(!to_bool(box_str("")));
        assert!(!to_bool(boolean(false)));
        assert!(to_bool(boolean(true)));
        assert!(to_bool(box_int(-1)));
        assert!(to_bool(box_str("0")));
        assert!(to_bool(global_object()));
    }

    #[test]
    fn numbers_coerce_per_kind() {
        init();
        assert_eq!(to_number(box_int(41)), 41);
        assert_eq!(to_number(undefined()), 0);
        assert_eq!(to_number(boolean(true)), 1);
        assert_eq!(to_number(boolean(false)), 0);
        assert_eq!(to_number(global_object()), 0);
    }

    #[test]
    fn string_parsing_stops_at_the_first_non_digit() {
        init();
        assert_eq!(to_number(box_str("12x")), 12);
        assert_eq!(to_number(box_str("")), 0);
        assert_eq!(to_number(box_str("-7")), -7);
        assert_eq!(to_number(box_str("+8")), 8);
        // no whitespace skipping
        assert_eq!(to_number(box_str("  12x")), 0);
        assert_eq!(to_number(box_str("x12")), 0);
    }

    #[test]
    fn to_string_covers_every_kind() {
        init();
        assert_eq!(text(to_string(undefined())), "undefined");
        assert_eq!(text(to_string(boolean(true))), "true");
        assert_eq!(text(to_string(boolean(false))), "false");
        assert_eq!(text(to_string(box_int(-120))), "-120");
        assert_eq!(text(to_string(box_int(0))), "0");
        assert_eq!(text(to_string(global_object())), "[object Object]");
    }

    #[test]
    fn to_string_is_idempotent() {
        init();
        let s = to_string(box_int(99));
        assert!(to_string(s).same(s));
    }

    #[test]
    fn to_object_rejects_non_objects() {
        init();
        let obj = global_object();
        assert!(to_object(obj).same(obj));
        assert!(to_object(box_int(1)).same(undefined()));
        assert!(to_object(box_str("s")).same(undefined()));
        assert!(to_object(undefined()).same(undefined()));
    }

    #[test]
    fn to_value_prefers_numbers_and_strings() {
        init();
        let n = box_int(5);
        assert!(to_value(n).same(n));
        let s = box_str("s");
        assert!(to_value(s).same(s));
        assert_eq!(text(to_value(undefined())), "undefined");
    }
}
