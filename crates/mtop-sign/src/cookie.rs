//! Cookie header helpers.
//!
//! Credentials travel as a `name=value; name=value` header and are persisted
//! in the same shape.

/// Parse a cookie header into ordered `(name, value)` pairs.
///
/// Fragments without `=` or with an empty name are skipped. A later duplicate
/// name replaces the earlier value in place.
///
/// # Example
/// ```
/// use mtop_sign::cookie::parse_cookie_header;
///
/// let pairs = parse_cookie_header("cna=abc; t=42");
/// assert_eq!(pairs, vec![("cna".to_string(), "abc".to_string()), ("t".to_string(), "42".to_string())]);
/// ```
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for fragment in header.split(';') {
        let Some((name, value)) = fragment.trim().split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().to_string();

        match pairs.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = value,
            None => pairs.push((name.to_string(), value)),
        }
    }

    pairs
}

/// Render `(name, value)` pairs as a cookie header.
pub fn format_cookie_header<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}
