//! Fixed-point helpers shared by `Money` (2 places) and `Quantity` (3 places).

use crate::error::ValidationError;

/// Longest digit string accepted; keeps every intermediate inside i128.
const MAX_DIGITS: usize = 30;

/// Divides `n` by a positive `d`, rounding half-to-even.
pub(crate) fn div_round_half_even(n: i128, d: i128) -> i128 {
    let q = n / d;
    let r = n % d;
    let twice = r.abs() * 2;
    if twice > d || (twice == d && q % 2 != 0) {
        q + n.signum()
    } else {
        q
    }
}

/// Parses `[-+]digits[.digits]` into an integer scaled by `10^scale`.
pub(crate) fn parse_fixed_point(
    text: &str,
    scale: u32,
    field: &str,
) -> Result<i64, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: format!("{reason}: {text:?}"),
    };

    let trimmed = text.trim();
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid("no digits"));
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    if int_part.len() + frac_part.len() > MAX_DIGITS {
        return Err(invalid("too many digits"));
    }

    let digits = format!("{int_part}{frac_part}");
    let raw: i128 = if digits.is_empty() {
        0
    } else {
        digits.parse().map_err(|_| invalid("not a decimal number"))?
    };

    let frac_len = frac_part.len() as u32;
    let scaled = if frac_len <= scale {
        raw * 10i128.pow(scale - frac_len)
    } else {
        div_round_half_even(raw, 10i128.pow(frac_len - scale))
    };

    let signed = if negative { -scaled } else { scaled };
    i64::try_from(signed).map_err(|_| invalid("out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_even_division() {
        assert_eq!(div_round_half_even(25, 10), 2);
        assert_eq!(div_round_half_even(35, 10), 4);
        assert_eq!(div_round_half_even(-25, 10), -2);
        assert_eq!(div_round_half_even(-26, 10), -3);
        assert_eq!(div_round_half_even(24, 10), 2);
    }

    #[test]
    fn test_parse_scales() {
        assert_eq!(parse_fixed_point("1.5", 3, "q").unwrap(), 1500);
        assert_eq!(parse_fixed_point("-0.0005", 3, "q").unwrap(), 0);
        assert_eq!(parse_fixed_point("+2", 2, "q").unwrap(), 200);
        assert!(parse_fixed_point("-", 2, "q").is_err());
    }
}
