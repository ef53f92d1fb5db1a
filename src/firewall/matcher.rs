//! Per-rule request matching.
//!
//! # Responsibilities
//! - Evaluate one rule against one request, no side effects
//! - AND semantics: every declared matcher must hold
//! - Host matching strips the port and compares case-insensitively
//!   (hostnames are case-insensitive; this also covers IPv6 literals)
//! - Path matching is a byte-for-byte prefix check

use crate::firewall::rule::Rule;
use crate::http::HttpRequest;

/// Returns true iff the request satisfies every matcher the rule declares.
/// An absent matcher is vacuously true; a rule with no matchers matches
/// every request.
pub fn rule_matches(rule: &Rule, request: &HttpRequest) -> bool {
    if let Some(ip) = &rule.ip {
        if !ip.contains(&request.client.ip()) {
            return false;
        }
    }

    if let Some(method) = &rule.method {
        if !method.eq_ignore_ascii_case(&request.method) {
            return false;
        }
    }

    if let Some(host) = &rule.host {
        match request.header("host") {
            Some(header) => {
                if !strip_port(header).eq_ignore_ascii_case(host) {
                    return false;
                }
            }
            None => return false,
        }
    }

    if let Some(path) = &rule.path {
        if !request.path().starts_with(path.as_str()) {
            return false;
        }
    }

    true
}

/// Strip a trailing `:port` from a Host header value.
///
/// Bracketed IPv6 literals (`[2001:db8::1]:8080`) keep the address inside
/// the brackets; a bare IPv6 address (more than one colon, no brackets) is
/// returned whole.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, _)) if !name.contains(':') => name,
        _ => host,
    }
}
