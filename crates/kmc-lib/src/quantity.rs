//! Kubernetes resource quantity parsing
//!
//! The cluster reports storage capacity as quantity strings ("10Gi",
//! "1500m", "2e3"). Billing works on whole GiB, derived from the
//! milli-value so that sub-GiB capacities floor to zero the same way the
//! apimachinery conversion does.

pub const GIB: i64 = 1 << 30;

/// Parse a quantity string into its milli-value (value × 1000, rounded up).
///
/// Supported forms: plain and decimal numbers, binary suffixes
/// (Ki..Ei), decimal SI suffixes (n..E) and scientific notation.
pub fn parse_quantity_milli(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    // exponent form has no suffix after the mantissa
    let (number, multiplier): (&str, f64) = match suffix {
        "" => (number, 1.0),
        "Ki" => (number, 1024f64),
        "Mi" => (number, 1024f64.powi(2)),
        "Gi" => (number, 1024f64.powi(3)),
        "Ti" => (number, 1024f64.powi(4)),
        "Pi" => (number, 1024f64.powi(5)),
        "Ei" => (number, 1024f64.powi(6)),
        "n" => (number, 1e-9),
        "u" => (number, 1e-6),
        "m" => (number, 1e-3),
        "k" => (number, 1e3),
        "M" => (number, 1e6),
        "G" => (number, 1e9),
        "T" => (number, 1e12),
        "P" => (number, 1e15),
        "E" => (number, 1e18),
        _ if suffix.starts_with('e') || suffix.starts_with('E') => {
            let exponent: i32 = suffix[1..].parse().ok()?;
            (number, 10f64.powi(exponent))
        }
        _ => return None,
    };

    let mantissa: f64 = number.parse().ok()?;
    let milli = (mantissa * multiplier * 1000.0).ceil();
    if !milli.is_finite() || milli.abs() > i64::MAX as f64 {
        return None;
    }

    Some(milli as i64)
}

/// Convert a milli-value to whole GiB, flooring.
pub fn gib_from_milli(milli: i64) -> i64 {
    ((milli as f64 / GIB as f64) / 1000.0) as i64
}

/// Convert a byte count to whole GiB, flooring.
pub fn gib_from_bytes(bytes: i64) -> i64 {
    (bytes as f64 / GIB as f64) as i64
}
