//! Permissive numeric parsing for frame ids and command parameters.
//!
//! Bus masters in the field send parameters such as `12`, ` 12`, `12.5kg`
//! or nothing at all. These helpers read the longest numeric prefix of the
//! text and fall back to zero when there is none. A malformed parameter therefore becomes a zero-valued setting
//! instead of an error; callers that need a range check must apply it
//! themselves.

/// Parses the leading decimal integer of `text`.
///
/// Leading ASCII whitespace is skipped and a single `+` or `-` sign is
/// accepted. Parsing stops at the first non-digit. Text without digits
/// yields `0`; values outside the `i32` range saturate.
pub fn parse_int(text: &str) -> i32 {
    let bytes = text.trim_start().as_bytes();
    let (negative, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };

    let mut value: i32 = 0;
    for &b in digits.iter().take_while(|b| b.is_ascii_digit()) {
        let digit = i32::from(b - b'0');
        value = if negative {
            value.saturating_mul(10).saturating_sub(digit)
        } else {
            value.saturating_mul(10).saturating_add(digit)
        };
    }
    value
}

/// Parses the leading decimal floating-point number of `text`.
///
/// Accepts an optional sign, digits with an optional fractional part and
/// an optional exponent (`1e3`, `-2.5E-1`). An exponent marker that is not
/// followed by digits is left out of the number. Text without a mantissa
/// digit yields `0.0`.
pub fn parse_float(text: &str) -> f32 {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    let int_digits = count_digits(&bytes[end..]);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = count_digits(&bytes[end + 1..]);
        end += 1 + frac_digits;
    }
    if int_digits + frac_digits == 0 {
        return 0.0;
    }

    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits = count_digits(&bytes[exp_end..]);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    trimmed[..end].parse().unwrap_or(0.0)
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
