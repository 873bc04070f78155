//! Origin validation for mesh-facing WebSocket upgrades
//!
//! The frontend may be hosted by any machine in the tailnet, so an upgrade
//! is allowed when the Origin host equals the request's Host, or when it
//! names this node or any visible peer (DNS name, short name or IP). Ports
//! are ignored throughout.

use std::collections::HashSet;

use axum::http::Uri;

/// Decide whether an upgrade with these headers may proceed
///
/// `valid_hosts` must come from a fresh status query. A missing or
/// unparsable Origin never matches; `dev` accepts everything.
pub fn origin_allowed(
    host_header: Option<&str>,
    origin_header: Option<&str>,
    valid_hosts: &HashSet<String>,
    dev: bool,
) -> bool {
    if dev {
        return true;
    }

    let Some(origin) = origin_header.and_then(origin_host) else {
        return false;
    };

    if let Some(host) = host_header.map(strip_port) {
        if host.eq_ignore_ascii_case(&origin) {
            return true;
        }
    }

    valid_hosts.contains(&origin) || valid_hosts.contains(&origin.to_ascii_lowercase())
}

/// Host part of an Origin header value, without brackets or port
pub fn origin_host(origin: &str) -> Option<String> {
    let uri: Uri = origin.trim().parse().ok()?;
    uri.scheme()?;
    let host = uri.host()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Same-origin check for the setup socket
///
/// A request without an Origin header is allowed; otherwise the Origin
/// authority must equal the Host header, port included.
pub fn same_origin(host_header: Option<&str>, origin_header: Option<&str>) -> bool {
    let Some(origin) = origin_header else {
        return true;
    };

    let Ok(uri) = origin.trim().parse::<Uri>() else {
        return false;
    };

    match (uri.scheme(), uri.authority(), host_header) {
        (Some(_), Some(authority), Some(host)) => authority.as_str().eq_ignore_ascii_case(host.trim()),
        _ => false,
    }
}

/// Whether the Origin header asks for a TLS listener
pub fn origin_is_https(origin: Option<&str>) -> bool {
    origin
        .map(|o| o.trim_start().to_ascii_lowercase().starts_with("https:"))
        .unwrap_or(false)
}

/// Host header value without port or IPv6 brackets
fn strip_port(host: &str) -> &str {
    let host = host.trim();

    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }

    match host.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 address
        Some((name, _)) if !name.contains(':') => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tailnet() -> HashSet<String> {
        [
            "node-abc.tailnet.ts.net",
            "node-abc",
            "100.64.0.1",
            "fd7a:115c:a1e0::1",
            "lab-server.tailnet.ts.net",
            "lab-server",
            "100.64.0.5",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn test_peer_addresses_accepted() {
        let hosts = tailnet();
        for origin in [
            "http://100.64.0.5:3000",
            "https://lab-server.tailnet.ts.net",
            "http://lab-server:5173",
            "http://node-abc",
            "http://[fd7a:115c:a1e0::1]:3000",
        ] {
            assert!(
                origin_allowed(Some("100.64.0.1"), Some(origin), &hosts, false),
                "{} should be allowed",
                origin
            );
        }
    }

    #[test]
    fn test_unknown_hosts_rejected() {
        let hosts = tailnet();
        for origin in [
            "http://100.64.0.6:3000",
            "https://evil.example.com",
            "http://lab-server.evil.com",
        ] {
            assert!(
                !origin_allowed(Some("100.64.0.1"), Some(origin), &hosts, false),
                "{} should be rejected",
                origin
            );
        }
    }

    #[test]
    fn test_same_host_ignores_port() {
        let hosts = HashSet::new();
        assert!(origin_allowed(
            Some("somewhere.local:80"),
            Some("http://somewhere.local:3000"),
            &hosts,
            false
        ));
        assert!(origin_allowed(
            Some("[::1]:80"),
            Some("http://[::1]:3000"),
            &hosts,
            false
        ));
    }

    #[test]
    fn test_missing_or_garbage_origin_rejected() {
        let hosts = tailnet();
        assert!(!origin_allowed(Some("100.64.0.1"), None, &hosts, false));
        assert!(!origin_allowed(Some("100.64.0.1"), Some("null"), &hosts, false));
        assert!(!origin_allowed(Some("100.64.0.1"), Some(""), &hosts, false));
    }

    #[test]
    fn test_dev_accepts_anything() {
        assert!(origin_allowed(None, None, &HashSet::new(), true));
        assert!(origin_allowed(
            Some("x"),
            Some("https://evil.example.com"),
            &HashSet::new(),
            true
        ));
    }

    #[test]
    fn test_same_origin() {
        assert!(same_origin(Some("localhost:3000"), None));
        assert!(same_origin(Some("localhost:3000"), Some("http://localhost:3000")));
        assert!(same_origin(Some("Box.local:3000"), Some("https://box.local:3000")));
        assert!(!same_origin(Some("localhost:3000"), Some("http://localhost:5173")));
        assert!(!same_origin(Some("localhost:3000"), Some("https://evil.example.com")));
        assert!(!same_origin(None, Some("http://localhost:3000")));
    }

    #[test]
    fn test_origin_is_https() {
        assert!(origin_is_https(Some("https://box.tailnet.ts.net")));
        assert!(!origin_is_https(Some("http://localhost:3000")));
        assert!(!origin_is_https(None));
    }
}
