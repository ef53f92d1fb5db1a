//! Parsed request representation.

use std::net::SocketAddr;

/// Ordered collection of header name/value pairs.
///
/// Arrival order and original name case are preserved, duplicates included;
/// lookup by name is case-insensitive and returns the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parsed HTTP/1.1 request.
///
/// Immutable once parsed; plugins observe it but do not mutate it. The
/// client address comes from the socket layer, never from headers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method token as received (e.g. `GET`, `CONNECT`).
    pub method: String,
    /// Request target as received: origin-form path, absolute URI, or
    /// `host:port` for CONNECT.
    pub target: String,
    /// Protocol version string (e.g. `HTTP/1.1`).
    pub version: String,
    /// Headers in arrival order.
    pub headers: HeaderMap,
    /// Decoded body bytes; empty when the request declared no body.
    pub body: Vec<u8>,
    /// Socket-layer address of the client.
    pub client: SocketAddr,
}

impl HttpRequest {
    /// First value of the named header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The request path used for matching and upstream forwarding.
    ///
    /// Absolute URIs (`http://host/p`) are reduced to origin form (`/p`);
    /// any other target (including a CONNECT authority) is returned as-is.
    pub fn path(&self) -> &str {
        strip_absolute_form(&self.target)
    }

    /// True if the request asks for a WebSocket protocol upgrade.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("websocket")))
            .unwrap_or(false)
    }
}

/// Reduce an absolute URI to origin form; pass anything else through.
fn strip_absolute_form(target: &str) -> &str {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = target.strip_prefix(scheme) {
            return match rest.find('/') {
                Some(idx) => &rest[idx..],
                None => "/",
            };
        }
    }
    target
}
