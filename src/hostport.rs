//! Host/port and request-target parsing.
//!
//! These helpers never fail: input that does not look like `host[:port]`
//! is taken whole as the host and paired with the caller's default port.

/// Splits a `Host`-style string into `(host, port)`.
///
/// Accepted forms are `host`, `host:port`, `[v6addr]` and `[v6addr]:port`.
/// Only the first colon separates host from port, so `a:1:2` does not
/// match and is returned whole. Bracketed IPv6 literals are returned
/// without their brackets. A bare unbracketed IPv6 address contains
/// colons and therefore falls back to the whole-string form, which is
/// still a valid connect target.
pub fn parse_host_port(input: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = input.strip_prefix('[') {
        if let Some((addr, tail)) = rest.split_once(']') {
            if !addr.is_empty() {
                if tail.is_empty() {
                    return (addr.to_string(), default_port);
                }
                if let Some(port) = tail.strip_prefix(':').and_then(parse_port) {
                    return (addr.to_string(), port);
                }
            }
        }
        return (input.to_string(), default_port);
    }

    match input.split_once(':') {
        None if !input.is_empty() => (input.to_string(), default_port),
        Some((host, port)) if !host.is_empty() => match parse_port(port) {
            Some(port) => (host.to_string(), port),
            None => (input.to_string(), default_port),
        },
        _ => (input.to_string(), default_port),
    }
}

fn parse_port(digits: &str) -> Option<u16> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Returns the path to send upstream for a request target.
///
/// An absolute URI (`scheme://authority[/path]`) is reduced to its path,
/// with an empty path normalized to `/`. Any other target is used as-is.
pub fn request_path(target: &str) -> String {
    if let Some((scheme, rest)) = target.split_once("://") {
        if !scheme.is_empty() && scheme.bytes().all(|b| b.is_ascii_alphabetic()) {
            let (authority, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            if !authority.is_empty() {
                return if path.is_empty() {
                    "/".to_string()
                } else {
                    path.to_string()
                };
            }
        }
    }
    target.to_string()
}
