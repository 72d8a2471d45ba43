/// Splits `key=value` arguments. A bare key maps to an empty value so flags like
/// `__count` work without `=`.
#[must_use]
pub fn parse_pairs<S: AsRef<str>>(args: &[S]) -> Vec<(String, String)> {
    args.iter()
        .map(|a| match a.as_ref().split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.to_string()),
            None => (a.as_ref().trim().to_string(), String::new()),
        })
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
