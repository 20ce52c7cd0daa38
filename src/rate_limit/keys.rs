//! Rate limit key derivation.
//!
//! Identity resolution order: authenticated caller id, then the first IP
//! found among the proxy origin headers, then `"unknown"`. The identity is
//! combined with the request path so limits apply per endpoint, not globally
//! per caller.

use http::HeaderMap;

/// Origin headers checked for the caller's network address, in priority
/// order. Each may carry a comma-separated chain; the first entry is the
/// original client.
pub const ORIGIN_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Authenticated caller identity, inserted as a request extension by the
/// session layer upstream of the rate limit middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

/// Resolve the caller identity for rate limiting purposes.
pub fn client_identity(authenticated: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(id) = authenticated {
        return format!("user:{}", id);
    }
    for name in ORIGIN_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        if let Some(ip) = value.split(',').map(str::trim).find(|part| !part.is_empty()) {
            return format!("ip:{}", ip);
        }
    }
    "unknown".to_string()
}

/// Combine identity and path into the store key, sanitized so arbitrary
/// header content cannot produce hostile store keys.
pub fn rate_limit_key(identity: &str, path: &str) -> String {
    sanitize(&format!("{}:{}", identity, path))
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '/' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn authenticated_identity_wins_over_headers() {
        let headers = headers(&[("x-forwarded-for", "203.0.113.7")]);
        assert_eq!(client_identity(Some("42"), &headers), "user:42");
    }

    #[test]
    fn first_forwarded_entry_is_the_client() {
        let headers = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1, 10.0.0.2")]);
        assert_eq!(client_identity(None, &headers), "ip:203.0.113.7");
    }

    #[test]
    fn origin_headers_are_checked_in_priority_order() {
        let headers = headers(&[
            ("x-real-ip", "198.51.100.9"),
            ("cf-connecting-ip", "192.0.2.1"),
        ]);
        assert_eq!(client_identity(None, &headers), "ip:198.51.100.9");
    }

    #[test]
    fn missing_headers_resolve_to_unknown() {
        assert_eq!(client_identity(None, &HeaderMap::new()), "unknown");
    }

    #[test]
    fn empty_forwarded_entries_are_skipped() {
        let headers = headers(&[("x-forwarded-for", " , 203.0.113.7")]);
        assert_eq!(client_identity(None, &headers), "ip:203.0.113.7");
    }

    #[test]
    fn key_combines_identity_and_path() {
        assert_eq!(rate_limit_key("user:42", "/api/widgets"), "user:42:/api/widgets");
    }

    #[test]
    fn key_is_sanitized() {
        assert_eq!(
            rate_limit_key("ip:203.0.113.7", "/api/search?q=a b"),
            "ip:203.0.113.7:/api/search_q_a_b"
        );
    }
}
