// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The one-byte message kind that opens every wire message.

use crate::error::{Error, Result};

/// Discriminator for every message kind the engine exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Discovery: "is anyone listening".
    Scout = 0x01,
    /// Discovery: "I am here", advertises a peer ID.
    Hello = 0x02,
    /// Session establishment request.
    Open = 0x03,
    /// Session establishment response.
    Accept = 0x04,
    /// Graceful or forced session teardown.
    Close = 0x05,
    /// Reliability: announce transmit tail.
    Synch = 0x06,
    /// Reliability: acknowledge/negative-acknowledge.
    AckNack = 0x07,
    /// Declaration: bind a URI to a resource ID.
    DeclRes = 0x08,
    /// Declaration: announce a publication.
    DeclPub = 0x09,
    /// Declaration: announce a subscription.
    DeclSub = 0x0A,
    /// Declaration: commit a transaction.
    DeclCommit = 0x0B,
    /// Declaration: result of a committed transaction.
    DeclResult = 0x0C,
    /// Best-effort data on a resource ID.
    Data = 0x0D,
    /// Reliable data on a conduit, with a sequence number.
    MData = 0x0E,
    /// Reliable data for a URI-named resource not yet bound to a RID.
    WData = 0x0F,
    /// Idle-peer lease refresh.
    KeepAlive = 0x10,
}

impl MessageKind {
    /// Parse a kind byte, rejecting unknown values.
    pub fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0x01 => Self::Scout,
            0x02 => Self::Hello,
            0x03 => Self::Open,
            0x04 => Self::Accept,
            0x05 => Self::Close,
            0x06 => Self::Synch,
            0x07 => Self::AckNack,
            0x08 => Self::DeclRes,
            0x09 => Self::DeclPub,
            0x0A => Self::DeclSub,
            0x0B => Self::DeclCommit,
            0x0C => Self::DeclResult,
            0x0D => Self::Data,
            0x0E => Self::MData,
            0x0F => Self::WData,
            0x10 => Self::KeepAlive,
            _ => return Err(Error::MalformedPacket),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_malformed() {
        assert_eq!(MessageKind::from_byte(0x00), Err(Error::MalformedPacket));
        assert_eq!(MessageKind::from_byte(0xFF), Err(Error::MalformedPacket));
    }

    #[test]
    fn known_kinds_roundtrip() {
        assert_eq!(MessageKind::from_byte(0x01).unwrap(), MessageKind::Scout);
        assert_eq!(MessageKind::from_byte(0x10).unwrap(), MessageKind::KeepAlive);
    }
}
