// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Peer state machine and peer table.
//!
//! Each entry cycles `Free -> Discovering -> Operational -> Draining ->
//! Free`. `Free` slots are available for reuse; the table is a dense
//! fixed-size array indexed by `peeridx`, the same indexing scheme the
//! min-sequence heap ([`crate::heap::MinSeqHeap`]) and transmit windows
//! key off of.

use crate::config::MAX_PEERS;
use crate::error::{Error, Result};
use crate::time::Millis;
use crate::wire::types::PeerId;

/// Lifecycle state of one peer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Slot unused.
    Free,
    /// SCOUT/HELLO exchanged, OPEN/ACCEPT not yet complete.
    Discovering,
    /// Session established; reliable data/declarations may flow.
    Operational,
    /// CLOSE sent or lease expired; slot will be freed once drained.
    Draining,
}

/// One tracked peer.
pub struct Peer<A> {
    state: PeerState,
    id: Option<PeerId>,
    addr: Option<A>,
    last_heard_ms: Millis,
    lease_duration_ms: u32,
}

impl<A: Clone> Default for Peer<A> {
    fn default() -> Self {
        Self {
            state: PeerState::Free,
            id: None,
            addr: None,
            last_heard_ms: 0,
            lease_duration_ms: crate::config::LEASE_DURATION_MS,
        }
    }
}

impl<A: Clone + PartialEq> Peer<A> {
    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Peer ID, once known (from HELLO/OPEN onward).
    pub fn id(&self) -> Option<&PeerId> {
        self.id.as_ref()
    }

    /// Transport address, once known.
    pub fn addr(&self) -> Option<&A> {
        self.addr.as_ref()
    }

    /// Whether `now` is past this peer's lease.
    pub fn is_expired(&self, now: Millis) -> bool {
        self.state != PeerState::Free
            && now.wrapping_sub(self.last_heard_ms) > self.lease_duration_ms
    }

    fn touch(&mut self, now: Millis) {
        self.last_heard_ms = now;
    }
}

/// Fixed-capacity table of peers, indexed by `peeridx: u8`.
pub struct PeerTable<A> {
    peers: [Peer<A>; MAX_PEERS],
}

impl<A: Clone + PartialEq> Default for PeerTable<A> {
    fn default() -> Self {
        Self {
            peers: core::array::from_fn(|_| Peer::default()),
        }
    }
}

impl<A: Clone + PartialEq> PeerTable<A> {
    /// Build an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a peer slot by index.
    pub fn get(&self, peeridx: u8) -> Option<&Peer<A>> {
        self.peers.get(peeridx as usize)
    }

    /// Find the peer index matching transport address `addr`, if any
    /// non-`Free` slot has it.
    pub fn find_by_addr(&self, addr: &A) -> Option<u8> {
        self.peers.iter().enumerate().find_map(|(i, p)| {
            if p.state != PeerState::Free && p.addr.as_ref() == Some(addr) {
                Some(i as u8)
            } else {
                None
            }
        })
    }

    /// Find the peer index matching peer ID `id`, if any.
    pub fn find_by_id(&self, id: &PeerId) -> Option<u8> {
        self.peers.iter().enumerate().find_map(|(i, p)| {
            if p.state != PeerState::Free && p.id.as_ref() == Some(id) {
                Some(i as u8)
            } else {
                None
            }
        })
    }

    /// Allocate a `Free` slot for a newly discovered peer at `addr`,
    /// moving it to `Discovering`. Fails with
    /// [`Error::ResourceExhausted`] if the table is full.
    pub fn allocate(&mut self, addr: A, now: Millis) -> Result<u8> {
        let idx = self
            .peers
            .iter()
            .position(|p| p.state == PeerState::Free)
            .ok_or(Error::ResourceExhausted)?;
        let slot = &mut self.peers[idx];
        slot.state = PeerState::Discovering;
        slot.addr = Some(addr);
        slot.id = None;
        slot.last_heard_ms = now;
        Ok(idx as u8)
    }

    /// Record that a HELLO/OPEN carried `id` for this peer, and refresh
    /// its last-heard time.
    pub fn set_id(&mut self, peeridx: u8, id: PeerId, now: Millis) -> Result<()> {
        let slot = self.peers.get_mut(peeridx as usize).ok_or(Error::NotFound)?;
        slot.id = Some(id);
        slot.touch(now);
        Ok(())
    }

    /// Promote a peer to `Operational` after ACCEPT, recording the
    /// granted lease duration.
    pub fn mark_operational(&mut self, peeridx: u8, lease_duration_ms: u32, now: Millis) -> Result<()> {
        let slot = self.peers.get_mut(peeridx as usize).ok_or(Error::NotFound)?;
        slot.state = PeerState::Operational;
        slot.lease_duration_ms = lease_duration_ms;
        slot.touch(now);
        Ok(())
    }

    /// Refresh the last-heard time without a state transition
    /// (keepalive, SYNCH/ACKNACK, any inbound traffic).
    pub fn touch(&mut self, peeridx: u8, now: Millis) -> Result<()> {
        let slot = self.peers.get_mut(peeridx as usize).ok_or(Error::NotFound)?;
        slot.touch(now);
        Ok(())
    }

    /// Move a peer to `Draining` (CLOSE received/sent, or about to be).
    pub fn begin_drain(&mut self, peeridx: u8, now: Millis) -> Result<()> {
        let slot = self.peers.get_mut(peeridx as usize).ok_or(Error::NotFound)?;
        slot.state = PeerState::Draining;
        slot.touch(now);
        Ok(())
    }

    /// Free a peer's slot unconditionally.
    pub fn free(&mut self, peeridx: u8) {
        if let Some(slot) = self.peers.get_mut(peeridx as usize) {
            *slot = Peer::default();
        }
    }

    /// Every non-`Free` peer index whose lease has expired as of `now`.
    pub fn expired(&self, now: Millis) -> impl Iterator<Item = u8> + '_ {
        self.peers.iter().enumerate().filter_map(move |(i, p)| {
            if p.is_expired(now) {
                Some(i as u8)
            } else {
                None
            }
        })
    }

    /// Iterate every `Operational` peer index.
    pub fn operational(&self) -> impl Iterator<Item = u8> + '_ {
        self.peers.iter().enumerate().filter_map(|(i, p)| {
            if p.state == PeerState::Operational {
                Some(i as u8)
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(b: u8) -> PeerId {
        PeerId::from_slice(&[b]).unwrap()
    }

    #[test]
    fn allocate_moves_to_discovering() {
        let mut t: PeerTable<u32> = PeerTable::new();
        let idx = t.allocate(1, 0).unwrap();
        assert_eq!(t.get(idx).unwrap().state(), PeerState::Discovering);
    }

    #[test]
    fn table_exhaustion_is_reported() {
        let mut t: PeerTable<u32> = PeerTable::new();
        for i in 0..MAX_PEERS as u32 {
            t.allocate(i, 0).unwrap();
        }
        assert_eq!(t.allocate(999, 0), Err(Error::ResourceExhausted));
    }

    #[test]
    fn lease_expiry_is_detected() {
        let mut t: PeerTable<u32> = PeerTable::new();
        let idx = t.allocate(1, 0).unwrap();
        t.mark_operational(idx, 1000, 0).unwrap();
        assert!(!t.get(idx).unwrap().is_expired(500));
        assert!(t.get(idx).unwrap().is_expired(1500));
        let expired: heapless::Vec<u8, 8> = t.expired(1500).collect();
        assert_eq!(expired.as_slice(), &[idx]);
    }

    #[test]
    fn free_resets_slot_and_lookup() {
        let mut t: PeerTable<u32> = PeerTable::new();
        let idx = t.allocate(7, 0).unwrap();
        t.set_id(idx, pid(1), 0).unwrap();
        assert_eq!(t.find_by_id(&pid(1)), Some(idx));
        t.free(idx);
        assert_eq!(t.find_by_id(&pid(1)), None);
        assert_eq!(t.get(idx).unwrap().state(), PeerState::Free);
    }
}
