//! Rule schema and validation.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error type for rule construction and list edits.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid ip pattern {0:?}: expected an address or CIDR network")]
    InvalidIp(String),

    #[error("index {index} out of range (rule list has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// What a matching rule does to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Allow => write!(f, "allow"),
            Action::Deny => write!(f, "deny"),
        }
    }
}

/// A client-address pattern: a single address or a CIDR network.
///
/// Parsed eagerly so a malformed pattern is rejected when the rule is
/// built, not when traffic arrives. The original text is kept so saved
/// rules round-trip exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPattern {
    net: IpNet,
    raw: String,
}

impl IpPattern {
    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.net.contains(addr)
    }

    pub fn network(&self) -> &IpNet {
        &self.net
    }
}

impl FromStr for IpPattern {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        // A bare address is a host-length network (/32 or /128).
        let net = if let Ok(addr) = text.parse::<IpAddr>() {
            let prefix = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            IpNet::new(addr, prefix).map_err(|_| RuleError::InvalidIp(s.to_string()))?
        } else {
            text.parse::<IpNet>()
                .map_err(|_| RuleError::InvalidIp(s.to_string()))?
        };
        Ok(Self {
            net,
            raw: text.to_string(),
        })
    }
}

impl fmt::Display for IpPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Serialize for IpPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for IpPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// One firewall rule: a required action plus optional matchers.
///
/// A rule matches a request iff every declared matcher matches; an absent
/// matcher is vacuously true (see `matcher::rule_matches`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub action: Action,

    /// Client address, single or CIDR.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpPattern>,

    /// HTTP method, compared case-insensitively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Hostname (no port), compared case-insensitively against the Host
    /// header with any port suffix stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Path prefix, compared byte-for-byte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Rule {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            ip: None,
            method: None,
            host: None,
            path: None,
        }
    }

    pub fn allow() -> Self {
        Self::new(Action::Allow)
    }

    pub fn deny() -> Self {
        Self::new(Action::Deny)
    }

    pub fn with_ip(mut self, pattern: &str) -> Result<Self, RuleError> {
        self.ip = Some(pattern.parse()?);
        Ok(self)
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action={}", self.action)?;
        if let Some(ip) = &self.ip {
            write!(f, ", ip={ip}")?;
        }
        if let Some(method) = &self.method {
            write!(f, ", method={method}")?;
        }
        if let Some(host) = &self.host {
            write!(f, ", host={host}")?;
        }
        if let Some(path) = &self.path {
            write!(f, ", path={path}")?;
        }
        Ok(())
    }
}
