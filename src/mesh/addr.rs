//! 6-byte hardware addresses and the scan/receive value types built on them

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest payload the mesh transport accepts for a single unicast
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Hardware (MAC/BSSID) address of a mesh node
///
/// Formats as lowercase colon-separated hex, which is also the routing key
/// the root bridge publishes under.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeshAddr([u8; 6]);

impl MeshAddr {
    /// The all-zero address, used for "not configured"
    pub const UNSET: MeshAddr = MeshAddr([0; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_unset(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Topic key for traffic originating at this address (pure function)
    pub fn routing_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MeshAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MeshAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshAddr({self})")
    }
}

/// Address parse failures
#[derive(Debug, Error, PartialEq)]
pub enum AddrParseError {
    #[error("expected 6 octets, found {0}")]
    WrongLength(usize),
    #[error("invalid octet '{0}'")]
    InvalidOctet(String),
}

impl FromStr for MeshAddr {
    type Err = AddrParseError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `AA-BB-CC-DD-EE-FF`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(AddrParseError::WrongLength(parts.len()));
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(AddrParseError::InvalidOctet(part.to_string()));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| AddrParseError::InvalidOctet(part.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MeshAddr {
    type Error = AddrParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MeshAddr> for String {
    fn from(addr: MeshAddr) -> Self {
        addr.to_string()
    }
}

impl From<[u8; 6]> for MeshAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

/// One visible upstream access point from a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub addr: MeshAddr,
    pub name: String,
    pub channel: u8,
    /// Signal strength in dBm
    pub rssi: i8,
}

impl Candidate {
    pub fn new(addr: MeshAddr, name: impl Into<String>, channel: u8, rssi: i8) -> Self {
        Self {
            addr,
            name: name.into(),
            channel,
            rssi,
        }
    }
}

/// A unicast payload handed up by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RelayedMessage {
    pub from: MeshAddr,
    pub payload: Bytes,
}

impl RelayedMessage {
    pub fn new(from: MeshAddr, payload: impl Into<Bytes>) -> Self {
        Self {
            from,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as text for log lines; invalid UTF-8 is replaced, not rejected
    pub fn lossy_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display_is_lowercase_colon_hex() {
        let addr = MeshAddr::new([0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33]);
        assert_eq!(addr.to_string(), "aa:bb:cc:11:22:33");
    }

    #[test]
    fn test_routing_key_from_uppercase_input() {
        let addr: MeshAddr = "AA:BB:CC:11:22:33".parse().unwrap();
        assert_eq!(addr.routing_key(), "aa:bb:cc:11:22:33");
    }

    #[test]
    fn test_parse_accepts_dashes() {
        let addr: MeshAddr = "88-57-21-b3-56-f5".parse().unwrap();
        assert_eq!(addr.octets(), [0x88, 0x57, 0x21, 0xb3, 0x56, 0xf5]);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            "aa:bb:cc".parse::<MeshAddr>(),
            Err(AddrParseError::WrongLength(3))
        );
        assert!(matches!(
            "aa:bb:cc:dd:ee:zz".parse::<MeshAddr>(),
            Err(AddrParseError::InvalidOctet(_))
        ));
        assert!(matches!(
            "aa:bb:cc:dd:ee:fff".parse::<MeshAddr>(),
            Err(AddrParseError::InvalidOctet(_))
        ));
    }

    #[test]
    fn test_unset_address() {
        assert!(MeshAddr::UNSET.is_unset());
        assert!(MeshAddr::default().is_unset());
        assert!(!MeshAddr::new([0, 0, 0, 0, 0, 1]).is_unset());
    }

    #[test]
    fn test_serde_as_string() {
        let addr = MeshAddr::new([0x7a, 0x10, 0x20, 0x30, 0x40, 0x50]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"7a:10:20:30:40:50\"");
        let back: MeshAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_lossy_text() {
        let msg = RelayedMessage::new(MeshAddr::UNSET, &b"ok\xff"[..]);
        assert_eq!(msg.len(), 3);
        assert_eq!(msg.lossy_text(), "ok\u{fffd}");
    }

    proptest! {
        #[test]
        fn routing_key_depends_only_on_address(octets in any::<[u8; 6]>(), a in ".*", b in ".*") {
            let addr = MeshAddr::new(octets);
            let first = RelayedMessage::new(addr, a.into_bytes());
            let second = RelayedMessage::new(addr, b.into_bytes());
            prop_assert_eq!(first.from.routing_key(), second.from.routing_key());
        }

        #[test]
        fn routing_key_parses_back(octets in any::<[u8; 6]>()) {
            let addr = MeshAddr::new(octets);
            let key = addr.routing_key();
            prop_assert_eq!(key.len(), 17);
            prop_assert_eq!(key.to_lowercase(), key.clone());
            prop_assert_eq!(key.parse::<MeshAddr>().unwrap(), addr);
        }
    }
}
