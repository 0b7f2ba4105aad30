// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core wire-level value types: peer identity, resource IDs, and
//! sequence numbers.

use core::fmt;

use crate::error::{Error, Result};

/// Maximum length, in bytes, of a peer ID.
pub const PEER_ID_MAX_LEN: usize = 16;

/// A peer's identity: 1-16 opaque bytes, chosen at startup (see
/// [`crate::entropy`]) or supplied on the command line.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PeerId(heapless::Vec<u8, PEER_ID_MAX_LEN>);

impl PeerId {
    /// Build a peer ID from a byte slice of length 1-16.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > PEER_ID_MAX_LEN {
            return Err(Error::InvalidParameter);
        }
        let mut v = heapless::Vec::new();
        v.extend_from_slice(bytes)
            .map_err(|_| Error::InvalidParameter)?;
        Ok(Self(v))
    }

    /// Borrow the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes in this ID.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this ID holds any bytes (always true for a valid
    /// `PeerId`; present for API symmetry).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId(")?;
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// A resource ID: the numeric name under which publications and
/// subscriptions are matched. Encoded on the wire as a varint, bounded
/// by [`crate::config::ZHE_MAX_RID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Reserved ID meaning "no resource" / unset.
    pub const NONE: Self = Self(0);

    /// Construct a resource ID, rejecting values beyond the configured
    /// maximum.
    pub fn new(value: u64) -> Result<Self> {
        if value == 0 || value > crate::config::ZHE_MAX_RID {
            return Err(Error::InvalidParameter);
        }
        Ok(Self(value))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one of the engine's outgoing reliable conduits (unicast)
/// or mconduits (multi-destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConduitId(pub u8);

/// A declaration transaction identifier, used to correlate
/// DECL-COMMIT/DECL-RESULT with the DECL-PUB/DECL-SUB/DECL-RES
/// messages that preceded it in the same packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub u8);

/// Subscription mode carried in DECL-SUB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubMode {
    /// Best-effort: no retransmission, no ordering guarantee beyond
    /// the sender's emit order.
    BestEffort,
    /// Reliable: delivered in order, gaps trigger NACK/retransmit.
    Reliable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_rejects_empty_and_oversized() {
        assert_eq!(PeerId::from_slice(&[]), Err(Error::InvalidParameter));
        let big = [0u8; PEER_ID_MAX_LEN + 1];
        assert_eq!(PeerId::from_slice(&big), Err(Error::InvalidParameter));
    }

    #[test]
    fn peer_id_roundtrips_bytes() {
        let id = PeerId::from_slice(&[1, 2, 3]).unwrap();
        assert_eq!(id.as_bytes(), &[1, 2, 3]);
        assert_eq!(id.len(), 3);
    }

    #[test]
    fn resource_id_rejects_zero() {
        assert_eq!(ResourceId::new(0), Err(Error::InvalidParameter));
        assert!(ResourceId::new(1).is_ok());
    }
}
