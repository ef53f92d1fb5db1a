//! Locally synthesized responses.
//!
//! Upstream responses are relayed as raw bytes; this type only exists for
//! responses the proxy itself produces (policy denials, parse failures,
//! gateway errors, CONNECT establishment).

/// A response built by the proxy, serialized with `to_bytes`.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    reason: &'static str,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// 403 sent when a plugin denies a request.
    pub fn forbidden() -> Self {
        Self::new(403, "Forbidden")
    }

    /// 400 sent for requests the codec could not parse.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 502 sent when the upstream or tunnel target is unreachable.
    pub fn bad_gateway() -> Self {
        Self::new(502, "Bad Gateway")
    }

    /// 200 sent to the client once a CONNECT tunnel is open.
    pub fn connection_established() -> Self {
        Self::new(200, "Connection Established")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Canonical serialization: status line, headers, Content-Length, body.
    ///
    /// CONNECT establishment responses carry no Content-Length: the bytes
    /// that follow belong to the tunnel, not to a body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        if self.status != 200 || !self.body.is_empty() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}
