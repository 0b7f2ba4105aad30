// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Entropy capability: sourcing a random local peer ID.
//!
//! Mirrors the reference driver, which reads a handful of bytes from
//! `/dev/urandom` at startup unless a peer ID is supplied on the
//! command line. Abstracted as a trait so embedded targets can plug in
//! a hardware RNG, and so tests can supply a fixed ID deterministically.

use crate::error::Result;
use crate::wire::types::PeerId;

/// A source of random bytes used to mint a local peer ID when none is
/// configured explicitly.
pub trait Entropy {
    /// Fill `len` random bytes and return them as a [`PeerId`].
    /// `len` must be in `1..=16`.
    fn random_peer_id(&mut self, len: usize) -> Result<PeerId>;
}

/// `std`-backed entropy source using the `fastrand` global generator,
/// the same dependency the reference driver's drop-rate simulation
/// uses, so the demo binaries pull in a single randomness crate.
#[cfg(feature = "std")]
#[derive(Debug, Default)]
pub struct StdEntropy;

#[cfg(feature = "std")]
impl Entropy for StdEntropy {
    fn random_peer_id(&mut self, len: usize) -> Result<PeerId> {
        let mut buf = [0u8; crate::wire::types::PEER_ID_MAX_LEN];
        let len = len.min(buf.len());
        for b in &mut buf[..len] {
            *b = fastrand::u8(..);
        }
        PeerId::from_slice(&buf[..len])
    }
}

/// Deterministic entropy source for tests: always returns the same
/// fixed byte pattern.
#[derive(Debug, Clone, Copy)]
pub struct FixedEntropy(pub u8);

impl Entropy for FixedEntropy {
    fn random_peer_id(&mut self, len: usize) -> Result<PeerId> {
        let buf = [self.0; crate::wire::types::PEER_ID_MAX_LEN];
        PeerId::from_slice(&buf[..len.min(buf.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_entropy_is_deterministic() {
        let mut e = FixedEntropy(0xAB);
        let id = e.random_peer_id(4).unwrap();
        assert_eq!(id.as_bytes(), &[0xAB, 0xAB, 0xAB, 0xAB]);
    }

    #[cfg(feature = "std")]
    #[test]
    fn std_entropy_produces_requested_length() {
        let mut e = StdEntropy;
        let id = e.random_peer_id(8).unwrap();
        assert_eq!(id.len(), 8);
    }
}
