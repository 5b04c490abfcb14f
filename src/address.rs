//! Parse/format `scheme://host:port` endpoints (C1).
//!
//! Accepted forms: `scheme://host:port`, bare `host:port`, `host:` (port
//! defaults to 0, meaning "let the OS choose"), and bare `host`. A bare
//! numeric host with no port is treated as ambiguous and rejected rather
//! than guessed at, per the tolerance note in §6.

use crate::error::WorkerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

const DEFAULT_SCHEME: &str = "tcp";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(DEFAULT_SCHEME, host, port)
    }

    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = match s.find("://") {
            Some(idx) => (&s[..idx], &s[idx + 3..]),
            None => (DEFAULT_SCHEME, s),
        };

        if rest.is_empty() {
            return Err(WorkerError::AddressParse(format!(
                "empty host in address {:?}",
                s
            )));
        }

        // bare numeric with no colon at all: ambiguous, reject rather than
        // guess whether it's a port or a packed IP.
        if !rest.contains(':') && rest.chars().all(|c| c.is_ascii_digit()) {
            return Err(WorkerError::AddressParse(format!(
                "ambiguous bare-numeric address {:?}: specify host:port explicitly",
                s
            )));
        }

        let (host, port) = match rest.rfind(':') {
            Some(idx) => {
                let host_part = &rest[..idx];
                let port_part = &rest[idx + 1..];
                let host = if host_part.is_empty() {
                    Ipv4Addr::UNSPECIFIED.to_string()
                } else {
                    host_part.to_string()
                };
                let port = if port_part.is_empty() {
                    0
                } else {
                    port_part.parse::<u16>().map_err(|e| {
                        WorkerError::AddressParse(format!(
                            "invalid port {:?} in {:?}: {}",
                            port_part, s, e
                        ))
                    })?
                };
                (host, port)
            }
            // bare host, no port: default to 0, meaning "unspecified"
            None => (rest.to_string(), 0),
        };

        Ok(Address {
            scheme: scheme.to_string(),
            host,
            port,
        })
    }
}

impl From<(IpAddr, u16)> for Address {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Address::tcp(ip.to_string(), port)
    }
}

// Addresses travel on the wire as their `scheme://host:port` string form.
impl Serialize for Address {
    fn serialize<T>(&self, serializer: T) -> Result<T::Ok, T::Error>
    where
        T: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_form() {
        let addr: Address = "tcp://10.0.0.1:8786".parse().unwrap();
        assert_eq!(addr.scheme, "tcp");
        assert_eq!(addr.host, "10.0.0.1");
        assert_eq!(addr.port, 8786);
    }

    #[test]
    fn default_scheme() {
        let addr: Address = "10.0.0.1:8786".parse().unwrap();
        assert_eq!(addr.scheme, "tcp");
        assert_eq!(addr.port, 8786);
    }

    #[test]
    fn host_colon_defaults_port_zero() {
        let addr: Address = "10.0.0.1:".parse().unwrap();
        assert_eq!(addr.port, 0);
    }

    #[test]
    fn bare_host_defaults_port_zero() {
        let addr: Address = "workerhost".parse().unwrap();
        assert_eq!(addr.host, "workerhost");
        assert_eq!(addr.port, 0);
    }

    #[test]
    fn bare_numeric_rejected() {
        assert!("12345".parse::<Address>().is_err());
    }

    #[test]
    fn colon_host_defaults_to_unspecified() {
        let addr: Address = ":8786".parse().unwrap();
        assert_eq!(addr.host, "0.0.0.0");
        assert_eq!(addr.port, 8786);
    }

    #[test]
    fn display_round_trips_through_parse() {
        let addr = Address::tcp("10.0.0.1", 1234);
        let text = addr.to_string();
        let parsed: Address = text.parse().unwrap();
        assert_eq!(addr, parsed);
    }
}
