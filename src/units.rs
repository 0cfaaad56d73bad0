/*!
 * Shared byte-unit parsing for the copier's human-formatted output.
 *
 * Both the Profiler (list-only mode totals) and the Copier Driver (summary
 * block / progress lines) need to turn a "k/m/g/t"-suffixed token into a
 * byte count. The parser is deliberately tolerant: the log is a best-effort
 * progress surface, not a contract (spec.md §9 design note), so anything it
 * can't parse falls back to zero rather than propagating an error.
 */

/// Parse a bare integer or a `<number><k|m|g|t>` token (case-insensitive,
/// scaled by 1024) into a byte count. Returns `None` if the token has no
/// recognizable leading digits.
pub fn parse_size_token(token: &str) -> Option<i64> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    let last = token.chars().last()?;
    let (digits, multiplier) = match last.to_ascii_lowercase() {
        'k' => (&token[..token.len() - 1], 1024_i64),
        'm' => (&token[..token.len() - 1], 1024_i64 * 1024),
        'g' => (&token[..token.len() - 1], 1024_i64 * 1024 * 1024),
        't' => (&token[..token.len() - 1], 1024_i64 * 1024 * 1024 * 1024),
        _ => (token, 1_i64),
    };

    // The copier emits fractional values for scaled units (e.g. "1.5g").
    let value: f64 = digits.trim().parse().ok()?;
    Some((value * multiplier as f64).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_integers() {
        assert_eq!(parse_size_token("1024"), Some(1024));
        assert_eq!(parse_size_token("0"), Some(0));
    }

    #[test]
    fn parses_kilobyte_suffix_case_insensitive() {
        assert_eq!(parse_size_token("2k"), Some(2048));
        assert_eq!(parse_size_token("2K"), Some(2048));
    }

    #[test]
    fn parses_larger_suffixes() {
        assert_eq!(parse_size_token("1m"), Some(1024 * 1024));
        assert_eq!(parse_size_token("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size_token("1t"), Some(1024_i64.pow(4)));
    }

    #[test]
    fn parses_fractional_values() {
        assert_eq!(parse_size_token("1.5k"), Some(1536));
    }

    #[test]
    fn unparseable_token_yields_none() {
        assert_eq!(parse_size_token(""), None);
        assert_eq!(parse_size_token("abc"), None);
    }
}
