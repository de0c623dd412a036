//! Network endpoints.
//!
//! An [`Endpoint`] is a host plus a port. Its identity is the `host:port`
//! string used for dialing, with IPv6 literals bracketed (`[::1]:22`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ConnectionError, ConnectionResult};

/// A `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    /// DNS name or IP literal (IPv6 without brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse an endpoint specification.
    ///
    /// Supports formats:
    /// - `host:port`
    /// - `[v6addr]:port`
    pub fn parse(spec: &str) -> ConnectionResult<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ConnectionError::InvalidConfig(
                "Empty endpoint specification".to_string(),
            ));
        }

        let invalid_port = || {
            ConnectionError::InvalidConfig(format!("Invalid port in endpoint: {}", spec))
        };

        if let Some(rest) = spec.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(|| {
                ConnectionError::InvalidConfig(format!("Invalid IPv6 address in endpoint: {}", spec))
            })?;
            let port = after
                .strip_prefix(':')
                .ok_or_else(invalid_port)?
                .parse()
                .map_err(|_| invalid_port())?;
            return Ok(Self::new(host, port));
        }

        match spec.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Err(ConnectionError::InvalidConfig(format!(
                "IPv6 endpoints must be bracketed: {}",
                spec
            ))),
            Some((host, port)) if !host.is_empty() => {
                Ok(Self::new(host, port.parse().map_err(|_| invalid_port())?))
            }
            _ => Err(ConnectionError::InvalidConfig(format!(
                "Endpoint must be host:port: {}",
                spec
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ConnectionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}
