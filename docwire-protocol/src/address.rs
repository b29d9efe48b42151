//! Logical server endpoints.

use crate::error::ProtocolError;
use crate::DEFAULT_PORT;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// A logical server endpoint.
///
/// One address resolves to an ordered list of socket addresses (for example all
/// IPs behind a hostname). The order is the order connections are attempted in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    host: String,
    port: u16,
    /// Candidates fixed up front instead of resolved on demand.
    candidates: Option<Vec<SocketAddr>>,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            candidates: None,
        }
    }

    /// Pins the candidate list, bypassing name resolution.
    pub fn with_candidates(mut self, candidates: Vec<SocketAddr>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the candidate socket addresses in attempt order.
    pub fn socket_addresses(&self) -> io::Result<Vec<SocketAddr>> {
        if let Some(ref candidates) = self.candidates {
            return Ok(candidates.clone());
        }
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        Ok((host, self.port).to_socket_addrs()?.collect())
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl From<SocketAddr> for ServerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port()).with_candidates(vec![addr])
    }
}

impl FromStr for ServerAddress {
    type Err = ProtocolError;

    /// Parses `host`, `host:port`, `[v6]` or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidAddress(s.to_string());
        if s.is_empty() {
            return Err(invalid());
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| invalid())?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(invalid()),
            };
            return Ok(Self::new(host, port));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                if host.is_empty() {
                    return Err(invalid());
                }
                let port = port.parse().map_err(|_| invalid())?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(invalid()),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_port() {
        let addr: ServerAddress = "db1.example.com:27018".parse().unwrap();
        assert_eq!(addr.host(), "db1.example.com");
        assert_eq!(addr.port(), 27018);

        let addr: ServerAddress = "db1".parse().unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);

        let addr: ServerAddress = "[::1]:4000".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.port(), 4000);
        assert_eq!(addr.to_string(), "[::1]:4000");
    }

    #[test]
    fn test_parse_invalid() {
        assert!("".parse::<ServerAddress>().is_err());
        assert!(":27017".parse::<ServerAddress>().is_err());
        assert!("host:notaport".parse::<ServerAddress>().is_err());
        assert!("[::1".parse::<ServerAddress>().is_err());
    }

    #[test]
    fn test_pinned_candidates_keep_order() {
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.2:2".parse().unwrap();
        let c: SocketAddr = "[::1]:3".parse().unwrap();
        let addr = ServerAddress::new("cluster", 27017).with_candidates(vec![c, a, b]);
        assert_eq!(addr.socket_addresses().unwrap(), vec![c, a, b]);
    }

    #[test]
    fn test_resolve_ip_literal() {
        let addr = ServerAddress::new("127.0.0.1", 27017);
        let resolved = addr.socket_addresses().unwrap();
        assert_eq!(resolved, vec!["127.0.0.1:27017".parse().unwrap()]);
    }

    #[test]
    fn test_from_socket_addr() {
        let sa: SocketAddr = "10.0.0.5:7000".parse().unwrap();
        let addr = ServerAddress::from(sa);
        assert_eq!(addr.to_string(), "10.0.0.5:7000");
        assert_eq!(addr.socket_addresses().unwrap(), vec![sa]);
    }
}
