//! Logarithmic derivatives of the gamma function.
//!
//! Both functions shift the argument above 6 with the recurrence relation and
//! then apply the asymptotic expansion, which is accurate to about 1e-11 there.
//! Non-positive and NaN arguments yield NaN.

const SHIFT: f64 = 6.0;

/// First derivative of `ln Γ(x)`.
#[must_use]
pub fn digamma(x: f64) -> f64 {
    if x.is_nan() || x <= 0.0 {
        return f64::NAN;
    }
    if x.is_infinite() {
        return f64::INFINITY;
    }

    let mut x = x;
    let mut result = 0.0;
    while x < SHIFT {
        result -= 1.0 / x;
        x += 1.0;
    }

    let inv = 1.0 / x;
    let inv2 = inv * inv;
    let series = inv2
        * (1.0 / 12.0
            - inv2 * (1.0 / 120.0 - inv2 * (1.0 / 252.0 - inv2 * (1.0 / 240.0 - inv2 * (1.0 / 132.0)))));
    result + x.ln() - 0.5 * inv - series
}

/// Second derivative of `ln Γ(x)`.
#[must_use]
pub fn trigamma(x: f64) -> f64 {
    if x.is_nan() || x <= 0.0 {
        return f64::NAN;
    }
    if x.is_infinite() {
        return 0.0;
    }

    let mut x = x;
    let mut result = 0.0;
    while x < SHIFT {
        result += 1.0 / (x * x);
        x += 1.0;
    }

    let inv = 1.0 / x;
    let inv2 = inv * inv;
    let series = 1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 * (1.0 / 30.0 - inv2 * (5.0 / 66.0))));
    result + inv + 0.5 * inv2 + inv * inv2 * series
}
