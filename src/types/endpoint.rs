//! Typed channel endpoints
//!
//! Endpoints are parsed once at configuration time into `(scheme, host,
//! port)`; the ±1 port convention that derives the ingest and replay
//! endpoints from the broadcast endpoint is integer arithmetic on the port
//! field, not string manipulation.

use std::fmt;
use std::str::FromStr;

/// Errors raised while parsing an endpoint string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    Invalid(String),
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::Invalid(input) => {
                write!(f, "invalid endpoint '{}': expected scheme://host:port", input)
            }
        }
    }
}

impl std::error::Error for EndpointError {}

/// A channel endpoint, e.g. `tcp://127.0.0.1:5557`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create a TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: "tcp".to_string(),
            host: host.into(),
            port,
        }
    }

    /// The same endpoint with its port shifted by `offset`. Out-of-range
    /// results clamp to the valid port range.
    pub fn with_port_offset(&self, offset: i32) -> Self {
        let port = (i32::from(self.port) + offset).clamp(0, i32::from(u16::MAX)) as u16;
        self.with_port(port)
    }

    /// The same endpoint with its port replaced (used to resolve port-0
    /// binds to the actually bound port).
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port,
        }
    }

    /// `host:port` form for socket bind/connect calls.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EndpointError::Invalid(s.to_string());

        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if scheme.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_round_trip() {
        let endpoint: Endpoint = "tcp://127.0.0.1:5557".parse().unwrap();
        assert_eq!(endpoint.scheme, "tcp");
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 5557);
        assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:5557");
    }

    #[test]
    fn test_port_offset_down() {
        let endpoint: Endpoint = "tcp://127.0.0.1:5557".parse().unwrap();
        assert_eq!(
            endpoint.with_port_offset(-1).to_string(),
            "tcp://127.0.0.1:5556"
        );
    }

    #[test]
    fn test_port_offset_up() {
        let endpoint: Endpoint = "tcp://127.0.0.1:5557".parse().unwrap();
        assert_eq!(
            endpoint.with_port_offset(1).to_string(),
            "tcp://127.0.0.1:5558"
        );
    }

    #[test]
    fn test_addr_form() {
        let endpoint = Endpoint::tcp("127.0.0.1", 5556);
        assert_eq!(endpoint.addr(), "127.0.0.1:5556");
    }

    #[test]
    fn test_invalid_endpoints() {
        assert!("127.0.0.1:5557".parse::<Endpoint>().is_err());
        assert!("tcp://127.0.0.1".parse::<Endpoint>().is_err());
        assert!("tcp://127.0.0.1:notaport".parse::<Endpoint>().is_err());
        assert!("tcp://:5557".parse::<Endpoint>().is_err());
    }
}
