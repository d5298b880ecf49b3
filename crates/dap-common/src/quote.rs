//! DAP name quoting and literal encoding.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left unescaped in DAP identifiers. `.` is always escaped so a
/// quoted component can be joined into a dotted id unambiguously.
const DAP_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'-')
    .remove(b'"')
    .remove(b'/')
    .remove(b'%');

/// Quote a name for use in a constraint expression.
///
/// `"White space"` becomes `"White%20space"` and `"Period."` becomes
/// `"Period%2E"`.
pub fn quote(name: &str) -> String {
    utf8_percent_encode(name, DAP_NAME).to_string()
}

/// Reverse [`quote`]. Invalid UTF-8 sequences are replaced.
pub fn unquote(name: &str) -> String {
    percent_decode_str(name).decode_utf8_lossy().into_owned()
}

/// Quote every component of a dotted id and join them with `.`.
pub fn quote_id<'a>(components: impl IntoIterator<Item = &'a str>) -> String {
    components.into_iter().map(quote).collect::<Vec<_>>().join(".")
}

/// Format a float like C's `%.6g`.
pub fn format_g(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    // Scientific form gives the exponent after rounding to 6 digits.
    let sci = format!("{:.5e}", value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => (sci.clone(), 0),
    };

    if !(-4..6).contains(&exp) {
        let mantissa = trim_fraction(&mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = (5 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value))
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

/// Encode a number as a constraint-expression literal.
pub fn encode_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        format_g(value)
    }
}

/// Encode a string as a quoted constraint-expression literal.
pub fn encode_str(value: &str) -> String {
    format!("\"{}\"", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_examples() {
        assert_eq!(quote("White space"), "White%20space");
        assert_eq!(quote("Period."), "Period%2E");
        assert_eq!(quote("a_b-c/d~e"), "a_b-c/d~e");
    }

    #[test]
    fn test_unquote_reverses_quote() {
        for name in ["White space", "Period.", "temp[0]", "plain"] {
            assert_eq!(unquote(&quote(name)), name);
        }
    }

    #[test]
    fn test_quote_id_escapes_components() {
        assert_eq!(quote_id(["a.b", "c"]), "a%2Eb.c");
    }

    #[test]
    fn test_format_g() {
        assert_eq!(format_g(1.0), "1");
        assert_eq!(format_g(0.5), "0.5");
        assert_eq!(format_g(1234567.0), "1.23457e+06");
        assert_eq!(format_g(0.0001), "0.0001");
        assert_eq!(format_g(0.00001), "1e-05");
        assert_eq!(format_g(-17.25), "-17.25");
        assert_eq!(format_g(100000.0), "100000");
    }

    #[test]
    fn test_encode_literals() {
        assert_eq!(encode_number(f64::NAN), "NaN");
        assert_eq!(encode_number(10.0), "10");
        assert_eq!(encode_str("text"), "\"text\"");
    }
}
