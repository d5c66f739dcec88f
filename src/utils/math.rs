//! Numeric conversions with ECMAScript semantics.
//!
//! Constant folding, type propagation and the bytecode runtime all need the
//! same double-to-integer conversions. They live here so every stage agrees on
//! wraparound, `NaN` and negative-zero handling.

/// Converts a double to a signed 32-bit integer (ECMAScript `ToInt32`).
///
/// `NaN` and infinities become `0`; other values are truncated towards zero
/// and wrapped modulo 2^32.
#[must_use]
pub fn to_int32(value: f64) -> i32 {
    to_uint32(value) as i32
}

/// Converts a double to an unsigned 32-bit integer (ECMAScript `ToUint32`).
#[must_use]
pub fn to_uint32(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    let truncated = value.trunc();
    if truncated >= 0.0 && truncated <= f64::from(u32::MAX) {
        return truncated as u32;
    }
    truncated.rem_euclid(4_294_967_296.0) as u32
}

/// Returns `true` if `value` is exactly representable as an `i32` and is not `-0`.
#[must_use]
pub fn is_exact_int32(value: f64) -> bool {
    value.fract() == 0.0
        && value >= f64::from(i32::MIN)
        && value <= f64::from(i32::MAX)
        && !is_negative_zero(value)
}

/// Returns `true` if `value` is exactly representable as a `u32` and is not `-0`.
#[must_use]
pub fn is_exact_uint32(value: f64) -> bool {
    value.fract() == 0.0 && value >= 0.0 && value <= f64::from(u32::MAX) && !is_negative_zero(value)
}

/// Returns `true` for the double `-0.0`.
#[must_use]
pub fn is_negative_zero(value: f64) -> bool {
    value == 0.0 && value.is_sign_negative()
}

/// ECMAScript `ToBoolean` for numbers.
#[must_use]
pub fn number_to_bool(value: f64) -> bool {
    !(value == 0.0 || value.is_nan())
}

/// Formats a number the way the language prints it (`1`, `1.5`, `NaN`, `-Infinity`).
#[must_use]
pub fn number_to_string(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
