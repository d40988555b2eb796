//! Kubernetes resource quantity arithmetic
//!
//! Quantities are parsed into nano-units held in an `i128`, which covers the
//! full exa range with nine fractional digits. Conversions to milli-units or
//! whole units round up, matching how the API server reports fractional
//! quantities. Values beyond the `i64` range saturate, so a huge hard quota
//! such as `10E` reads as unbounded rather than failing.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::{Error, Result};

const NANO: i128 = 1_000_000_000;
const NANO_PER_MILLI: i128 = 1_000_000;

/// Parse a quantity string into nano-units
pub fn parse_quantity_nano(raw: &str) -> Result<i128> {
    let s = raw.trim();
    let invalid = || Error::invalid_input(format!("invalid quantity '{}'", raw));

    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        Some(_) => (false, s),
        None => return Err(invalid()),
    };

    let number_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_end);

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
        return Err(invalid());
    }

    let mut mantissa: i128 = 0;
    for d in int_part.bytes().chain(frac_part.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add(i128::from(d - b'0')))
            .ok_or_else(invalid)?;
    }

    let (binary_shift, decimal_exp) = suffix_scale(suffix).ok_or_else(invalid)?;

    let mut value = mantissa
        .checked_mul(1i128 << binary_shift)
        .ok_or_else(invalid)?;

    // nano scaling minus the digits consumed by the fraction
    let exp = 9 + decimal_exp - frac_part.len() as i32;
    if exp >= 0 {
        let factor = 10i128.checked_pow(exp as u32).ok_or_else(invalid)?;
        value = value.checked_mul(factor).ok_or_else(invalid)?;
    } else {
        let divisor = 10i128.checked_pow((-exp) as u32).ok_or_else(invalid)?;
        value = ceil_div(value, divisor);
    }

    Ok(if negative { -value } else { value })
}

/// Returns (power-of-two shift, power-of-ten exponent) for a suffix
fn suffix_scale(suffix: &str) -> Option<(u32, i32)> {
    let scale = match suffix {
        "" => (0, 0),
        "Ki" => (10, 0),
        "Mi" => (20, 0),
        "Gi" => (30, 0),
        "Ti" => (40, 0),
        "Pi" => (50, 0),
        "Ei" => (60, 0),
        "n" => (0, -9),
        "u" => (0, -6),
        "m" => (0, -3),
        "k" => (0, 3),
        "M" => (0, 6),
        "G" => (0, 9),
        "T" => (0, 12),
        "P" => (0, 15),
        "E" => (0, 18),
        _ => {
            let exp = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            let exp: i32 = exp.parse().ok()?;
            if !(-30..=30).contains(&exp) {
                return None;
            }
            (0, exp)
        }
    };
    Some(scale)
}

fn ceil_div(a: i128, b: i128) -> i128 {
    -((-a).div_euclid(b))
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// Parse a quantity into milli-units, rounding up
///
/// `"1500m"` and `"1.5"` both yield 1500.
pub fn parse_quantity_milli(raw: &str) -> Result<i64> {
    let nano = parse_quantity_nano(raw)?;
    Ok(saturate(ceil_div(nano, NANO_PER_MILLI)))
}

/// Parse a quantity into whole units, rounding up
///
/// `"2Gi"` yields 2147483648.
pub fn parse_quantity_value(raw: &str) -> Result<i64> {
    let nano = parse_quantity_nano(raw)?;
    Ok(saturate(ceil_div(nano, NANO)))
}

/// Milli-units of a typed quantity
pub fn milli(q: &Quantity) -> Result<i64> {
    parse_quantity_milli(&q.0)
}

/// Whole units of a typed quantity
pub fn value(q: &Quantity) -> Result<i64> {
    parse_quantity_value(&q.0)
}

/// Format milli-units the way the API server would: whole when possible
pub fn format_milli(m: i64) -> String {
    if m % 1000 == 0 {
        format!("{}", m / 1000)
    } else {
        format!("{}m", m)
    }
}

/// Integer mebibytes of a byte count (`2^31` → `2048`)
pub fn bytes_to_mebibytes(bytes: i64) -> i64 {
    bytes / 1024 / 1024
}

/// Format a mebibyte count with its unit suffix
pub fn format_mebibytes(mib: i64) -> String {
    format!("{}Mi", mib)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpu_forms() {
        assert_eq!(parse_quantity_milli("4").unwrap(), 4000);
        assert_eq!(parse_quantity_milli("1500m").unwrap(), 1500);
        assert_eq!(parse_quantity_milli("1.5").unwrap(), 1500);
        assert_eq!(parse_quantity_milli("0.25").unwrap(), 250);
        assert_eq!(parse_quantity_milli("100m").unwrap(), 100);
    }

    #[test]
    fn sub_milli_rounds_up() {
        assert_eq!(parse_quantity_milli("1u").unwrap(), 1);
        assert_eq!(parse_quantity_milli("250n").unwrap(), 1);
        assert_eq!(parse_quantity_milli("0.0001").unwrap(), 1);
    }

    #[test]
    fn parses_binary_and_decimal_memory() {
        assert_eq!(parse_quantity_value("2Gi").unwrap(), 1 << 31);
        assert_eq!(parse_quantity_value("512Mi").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_quantity_value("16318412Ki").unwrap(), 16318412 * 1024);
        assert_eq!(parse_quantity_value("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_quantity_value("1.5Gi").unwrap(), 3 * (1 << 29));
        assert_eq!(parse_quantity_value("128974848").unwrap(), 128974848);
    }

    #[test]
    fn parses_exponent_and_sign() {
        assert_eq!(parse_quantity_value("1e3").unwrap(), 1000);
        assert_eq!(parse_quantity_value("12E2").unwrap(), 1200);
        assert_eq!(parse_quantity_value("1E").unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(parse_quantity_milli("-2").unwrap(), -2000);
        assert_eq!(parse_quantity_milli("+2").unwrap(), 2000);
    }

    #[test]
    fn rejects_malformed() {
        for q in ["", "abc", "1Qi", "1.2.3", "-", "1e", "Gi", "1 Gi"] {
            assert!(parse_quantity_nano(q).is_err(), "{q} should be rejected");
        }
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_quantity_value("99999999999999999999E").is_err());
    }

    #[test]
    fn oversize_quantities_saturate() {
        assert_eq!(parse_quantity_value("10E").unwrap(), i64::MAX);
        assert_eq!(parse_quantity_milli("10E").unwrap(), i64::MAX);
        assert_eq!(parse_quantity_milli("9223372036854776").unwrap(), i64::MAX);
        assert_eq!(parse_quantity_milli("-10E").unwrap(), i64::MIN);
    }

    #[test]
    fn typed_quantity_helpers() {
        assert_eq!(milli(&Quantity("250m".to_string())).unwrap(), 250);
        assert_eq!(value(&Quantity("1Ki".to_string())).unwrap(), 1024);
    }

    #[test]
    fn formats_milli() {
        assert_eq!(format_milli(12_000), "12");
        assert_eq!(format_milli(1500), "1500m");
        assert_eq!(format_milli(0), "0");
    }

    #[test]
    fn two_gibibytes_is_2048_mebibytes() {
        assert_eq!(bytes_to_mebibytes(1 << 31), 2048);
        assert_eq!(bytes_to_mebibytes(1024 * 1024 - 1), 0);
        assert_eq!(format_mebibytes(2048), "2048Mi");
    }
}
