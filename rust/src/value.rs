//! Structural equality for form data.
//!
//! Used for dirty checks and for deciding whether a reactive validation pass
//! has anything new to look at. Only data participates: validators live on
//! cells, never inside values, so they are never compared.

use serde_json::Value;

/// IEEE 754 comparison: NaN never equals itself and `-0.0 == 0.0`.
fn floats_equal(a: f64, b: f64) -> bool {
    a == b
}

/// Deep structural equality.
///
/// - Numbers compare by numeric value, so `1` and `1.0` are equal.
/// - Objects compare key sets and values; key order is irrelevant.
/// - Arrays compare element-wise.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => floats_equal(x, y),
                _ => false,
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| deep_equal(x, y)))
        }
        _ => false,
    }
}

/// Deep equality where `None` stands for an undefined value.
pub fn deep_equal_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => deep_equal(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn floats_equal_normal_values() {
        assert!(floats_equal(42.0, 42.0));
        assert!(!floats_equal(42.0, 43.0));
    }

    #[test]
    fn floats_equal_nan() {
        assert!(!floats_equal(f64::NAN, f64::NAN));
    }

    #[test]
    fn floats_equal_signed_zero() {
        assert!(floats_equal(0.0, 0.0));
        assert!(floats_equal(0.0, -0.0));
        assert!(deep_equal(&json!({ "n": 0.0 }), &json!({ "n": -0.0 })));
        assert!(deep_equal(&json!(0), &json!(-0.0)));
    }

    #[test]
    fn integer_and_float_forms_are_equal() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(!deep_equal(&json!(1), &json!(2)));
    }

    #[test]
    fn objects_ignore_key_order() {
        let a = json!({ "a": 1, "b": { "c": [1, 2] } });
        let b = json!({ "b": { "c": [1, 2] }, "a": 1 });
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn missing_key_is_not_null() {
        assert!(!deep_equal(&json!({ "a": 1 }), &json!({ "a": 1, "b": null })));
    }

    #[test]
    fn arrays_compare_in_order() {
        assert!(deep_equal(&json!([1, 2, 3]), &json!([1, 2, 3])));
        assert!(!deep_equal(&json!([1, 2, 3]), &json!([3, 2, 1])));
        assert!(!deep_equal(&json!([1, 2]), &json!([1, 2, 3])));
    }

    #[test]
    fn type_mismatch_is_different() {
        assert!(!deep_equal(&json!("1"), &json!(1)));
        assert!(!deep_equal(&json!([]), &json!({})));
        assert!(!deep_equal(&json!(null), &json!(false)));
    }

    #[test]
    fn optional_values() {
        assert!(deep_equal_opt(None, None));
        assert!(!deep_equal_opt(None, Some(&json!(null))));
        assert!(deep_equal_opt(Some(&json!({ "x": 1 })), Some(&json!({ "x": 1.0 }))));
    }
}
