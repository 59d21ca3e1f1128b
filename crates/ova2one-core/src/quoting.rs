//! Quoting of template values.

/// Quote a template value, escaping backslashes and double quotes.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Whether a value is a plain unsigned decimal number.
pub fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_newline_stays_inside_quotes() {
        assert_eq!(quote("a\nb"), "\"a\nb\"");
    }

    #[test]
    fn test_is_decimal() {
        assert!(is_decimal("2"));
        assert!(is_decimal("1024"));
        assert!(!is_decimal(""));
        assert!(!is_decimal("-1"));
        assert!(!is_decimal("2\nDISK=[IMAGE_ID=\"666\"]"));
        assert!(!is_decimal("1 GB"));
    }
}
