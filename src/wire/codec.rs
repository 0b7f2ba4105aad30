// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Encoding and decoding of [`Message`] to and from wire bytes.
//!
//! Every message opens with a one-byte [`MessageKind`], followed by
//! kind-specific fields. Resource IDs, sequence numbers, commit IDs
//! used as varints, and conduit/commit bytes are single bytes.
//! Variable-length fields (peer IDs, URIs, payloads) are length
//! prefixed: a varint length followed by that many raw bytes.

use super::header::MessageKind;
use super::types::{CommitId, ConduitId, PeerId, ResourceId, SubMode};
use super::varint;
use super::Message;
use crate::error::{Error, Result};
use crate::seq::Seq;

fn put_u8(buf: &mut [u8], at: &mut usize, b: u8) -> Result<()> {
    if *at >= buf.len() {
        return Err(Error::BufferTooSmall);
    }
    buf[*at] = b;
    *at += 1;
    Ok(())
}

fn get_u8(buf: &[u8], at: &mut usize) -> Result<u8> {
    let b = *buf.get(*at).ok_or(Error::MalformedPacket)?;
    *at += 1;
    Ok(b)
}

fn put_varint(buf: &mut [u8], at: &mut usize, v: u64) -> Result<()> {
    let n = varint::encode(v, &mut buf[*at..])?;
    *at += n;
    Ok(())
}

fn get_varint(buf: &[u8], at: &mut usize) -> Result<u64> {
    let (v, n) = varint::decode(&buf[*at..])?;
    *at += n;
    Ok(v)
}

fn put_bytes(buf: &mut [u8], at: &mut usize, bytes: &[u8]) -> Result<()> {
    put_varint(buf, at, bytes.len() as u64)?;
    let end = *at + bytes.len();
    if end > buf.len() {
        return Err(Error::BufferTooSmall);
    }
    buf[*at..end].copy_from_slice(bytes);
    *at = end;
    Ok(())
}

fn get_bytes<'a>(buf: &'a [u8], at: &mut usize) -> Result<&'a [u8]> {
    let len = get_varint(buf, at)? as usize;
    let end = at.checked_add(len).ok_or(Error::MalformedPacket)?;
    let slice = buf.get(*at..end).ok_or(Error::MalformedPacket)?;
    *at = end;
    Ok(slice)
}

fn put_peer_id(buf: &mut [u8], at: &mut usize, id: &PeerId) -> Result<()> {
    put_bytes(buf, at, id.as_bytes())
}

fn get_peer_id(buf: &[u8], at: &mut usize) -> Result<PeerId> {
    let bytes = get_bytes(buf, at)?;
    PeerId::from_slice(bytes).map_err(|_| Error::MalformedPacket)
}

fn put_rid(buf: &mut [u8], at: &mut usize, rid: ResourceId) -> Result<()> {
    put_varint(buf, at, rid.0)
}

fn get_rid(buf: &[u8], at: &mut usize) -> Result<ResourceId> {
    ResourceId::new(get_varint(buf, at)?).map_err(|_| Error::MalformedPacket)
}

impl<'a> Message<'a> {
    /// Encode this message into `buf`, returning the number of bytes
    /// written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut at = 0usize;
        match self {
            Message::Scout => put_u8(buf, &mut at, MessageKind::Scout as u8)?,
            Message::Hello { peer_id } => {
                put_u8(buf, &mut at, MessageKind::Hello as u8)?;
                put_peer_id(buf, &mut at, peer_id)?;
            }
            Message::Open {
                peer_id,
                lease_duration_ms,
            } => {
                put_u8(buf, &mut at, MessageKind::Open as u8)?;
                put_peer_id(buf, &mut at, peer_id)?;
                put_varint(buf, &mut at, *lease_duration_ms as u64)?;
            }
            Message::Accept {
                peer_id,
                opener_id,
                lease_duration_ms,
            } => {
                put_u8(buf, &mut at, MessageKind::Accept as u8)?;
                put_peer_id(buf, &mut at, peer_id)?;
                put_peer_id(buf, &mut at, opener_id)?;
                put_varint(buf, &mut at, *lease_duration_ms as u64)?;
            }
            Message::Close { peer_id, reason } => {
                put_u8(buf, &mut at, MessageKind::Close as u8)?;
                put_peer_id(buf, &mut at, peer_id)?;
                put_u8(buf, &mut at, *reason)?;
            }
            Message::Synch { conduit, seqbase } => {
                put_u8(buf, &mut at, MessageKind::Synch as u8)?;
                put_u8(buf, &mut at, conduit.0)?;
                put_varint(buf, &mut at, *seqbase as u64)?;
            }
            Message::AckNack {
                conduit,
                seqbase,
                mask,
            } => {
                put_u8(buf, &mut at, MessageKind::AckNack as u8)?;
                put_u8(buf, &mut at, conduit.0)?;
                put_varint(buf, &mut at, *seqbase as u64)?;
                put_varint(buf, &mut at, *mask as u64)?;
            }
            Message::DeclRes { commit, rid, uri } => {
                put_u8(buf, &mut at, MessageKind::DeclRes as u8)?;
                put_u8(buf, &mut at, commit.0)?;
                put_rid(buf, &mut at, *rid)?;
                put_bytes(buf, &mut at, uri)?;
            }
            Message::DeclPub { commit, rid } => {
                put_u8(buf, &mut at, MessageKind::DeclPub as u8)?;
                put_u8(buf, &mut at, commit.0)?;
                put_rid(buf, &mut at, *rid)?;
            }
            Message::DeclSub { commit, rid, mode } => {
                put_u8(buf, &mut at, MessageKind::DeclSub as u8)?;
                put_u8(buf, &mut at, commit.0)?;
                put_rid(buf, &mut at, *rid)?;
                put_u8(
                    buf,
                    &mut at,
                    match mode {
                        SubMode::BestEffort => 0,
                        SubMode::Reliable => 1,
                    },
                )?;
            }
            Message::DeclCommit { commit } => {
                put_u8(buf, &mut at, MessageKind::DeclCommit as u8)?;
                put_u8(buf, &mut at, commit.0)?;
            }
            Message::DeclResult {
                commit,
                status,
                rid,
            } => {
                put_u8(buf, &mut at, MessageKind::DeclResult as u8)?;
                put_u8(buf, &mut at, commit.0)?;
                put_u8(buf, &mut at, *status)?;
                put_rid(buf, &mut at, *rid)?;
            }
            Message::Data { rid, payload } => {
                put_u8(buf, &mut at, MessageKind::Data as u8)?;
                put_rid(buf, &mut at, *rid)?;
                put_bytes(buf, &mut at, payload)?;
            }
            Message::MData {
                conduit,
                seq,
                rid,
                payload,
            } => {
                put_u8(buf, &mut at, MessageKind::MData as u8)?;
                put_u8(buf, &mut at, conduit.0)?;
                put_varint(buf, &mut at, *seq as u64)?;
                put_rid(buf, &mut at, *rid)?;
                put_bytes(buf, &mut at, payload)?;
            }
            Message::WData {
                conduit,
                seq,
                uri,
                payload,
            } => {
                put_u8(buf, &mut at, MessageKind::WData as u8)?;
                put_u8(buf, &mut at, conduit.0)?;
                put_varint(buf, &mut at, *seq as u64)?;
                put_bytes(buf, &mut at, uri)?;
                put_bytes(buf, &mut at, payload)?;
            }
            Message::KeepAlive => put_u8(buf, &mut at, MessageKind::KeepAlive as u8)?,
        }
        Ok(at)
    }

    /// Iterate every message framed back-to-back inside one datagram.
    /// A datagram need not carry exactly one message: declaration
    /// batches in particular pack several `DECL-*` messages plus a
    /// trailing `DECL-COMMIT` into a single send. Iteration stops (and
    /// yields one final `Err`) at the first malformed message, per the
    /// codec's contract of aborting the current packet without any
    /// effect on peer state for messages already yielded.
    pub fn iter_packet(buf: &'a [u8]) -> PacketIter<'a> {
        PacketIter { buf, pos: 0, done: false }
    }

    /// Decode one message from the front of `buf`, returning the
    /// message (borrowing from `buf`) and the number of bytes
    /// consumed.
    pub fn decode(buf: &'a [u8]) -> Result<(Self, usize)> {
        let mut at = 0usize;
        let kind = MessageKind::from_byte(get_u8(buf, &mut at)?)?;
        let msg = match kind {
            MessageKind::Scout => Message::Scout,
            MessageKind::Hello => Message::Hello {
                peer_id: get_peer_id(buf, &mut at)?,
            },
            MessageKind::Open => Message::Open {
                peer_id: get_peer_id(buf, &mut at)?,
                lease_duration_ms: get_varint(buf, &mut at)? as u32,
            },
            MessageKind::Accept => Message::Accept {
                peer_id: get_peer_id(buf, &mut at)?,
                opener_id: get_peer_id(buf, &mut at)?,
                lease_duration_ms: get_varint(buf, &mut at)? as u32,
            },
            MessageKind::Close => Message::Close {
                peer_id: get_peer_id(buf, &mut at)?,
                reason: get_u8(buf, &mut at)?,
            },
            MessageKind::Synch => Message::Synch {
                conduit: ConduitId(get_u8(buf, &mut at)?),
                seqbase: get_varint(buf, &mut at)? as Seq,
            },
            MessageKind::AckNack => Message::AckNack {
                conduit: ConduitId(get_u8(buf, &mut at)?),
                seqbase: get_varint(buf, &mut at)? as Seq,
                mask: get_varint(buf, &mut at)? as u32,
            },
            MessageKind::DeclRes => Message::DeclRes {
                commit: CommitId(get_u8(buf, &mut at)?),
                rid: get_rid(buf, &mut at)?,
                uri: get_bytes(buf, &mut at)?,
            },
            MessageKind::DeclPub => Message::DeclPub {
                commit: CommitId(get_u8(buf, &mut at)?),
                rid: get_rid(buf, &mut at)?,
            },
            MessageKind::DeclSub => Message::DeclSub {
                commit: CommitId(get_u8(buf, &mut at)?),
                rid: get_rid(buf, &mut at)?,
                mode: match get_u8(buf, &mut at)? {
                    0 => SubMode::BestEffort,
                    1 => SubMode::Reliable,
                    _ => return Err(Error::MalformedPacket),
                },
            },
            MessageKind::DeclCommit => Message::DeclCommit {
                commit: CommitId(get_u8(buf, &mut at)?),
            },
            MessageKind::DeclResult => Message::DeclResult {
                commit: CommitId(get_u8(buf, &mut at)?),
                status: get_u8(buf, &mut at)?,
                rid: get_rid(buf, &mut at)?,
            },
            MessageKind::Data => Message::Data {
                rid: get_rid(buf, &mut at)?,
                payload: get_bytes(buf, &mut at)?,
            },
            MessageKind::MData => Message::MData {
                conduit: ConduitId(get_u8(buf, &mut at)?),
                seq: get_varint(buf, &mut at)? as Seq,
                rid: get_rid(buf, &mut at)?,
                payload: get_bytes(buf, &mut at)?,
            },
            MessageKind::WData => Message::WData {
                conduit: ConduitId(get_u8(buf, &mut at)?),
                seq: get_varint(buf, &mut at)? as Seq,
                uri: get_bytes(buf, &mut at)?,
                payload: get_bytes(buf, &mut at)?,
            },
            MessageKind::KeepAlive => Message::KeepAlive,
        };
        Ok((msg, at))
    }
}

/// Lazy iterator over the messages framed inside one datagram buffer.
/// See [`Message::iter_packet`].
pub struct PacketIter<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Iterator for PacketIter<'a> {
    type Item = Result<Message<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.buf.len() {
            return None;
        }
        match Message::decode(&self.buf[self.pos..]) {
            Ok((msg, consumed)) => {
                self.pos += consumed;
                Some(Ok(msg))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(bytes: &[u8]) -> PeerId {
        PeerId::from_slice(bytes).unwrap()
    }

    fn roundtrip(msg: &Message) {
        let mut buf = [0u8; 256];
        let n = msg.encode(&mut buf).unwrap();
        let (decoded, consumed) = Message::decode(&buf[..n]).unwrap();
        assert_eq!(consumed, n);
        assert_eq!(&decoded, msg);
    }

    #[test]
    fn roundtrips_discovery_messages() {
        roundtrip(&Message::Scout);
        roundtrip(&Message::Hello {
            peer_id: pid(&[1, 2, 3]),
        });
        roundtrip(&Message::Open {
            peer_id: pid(&[9]),
            lease_duration_ms: 10_000,
        });
        roundtrip(&Message::Accept {
            peer_id: pid(&[9]),
            opener_id: pid(&[1, 2, 3]),
            lease_duration_ms: 10_000,
        });
        roundtrip(&Message::Close {
            peer_id: pid(&[9]),
            reason: 1,
        });
    }

    #[test]
    fn roundtrips_reliability_messages() {
        roundtrip(&Message::Synch {
            conduit: ConduitId(0),
            seqbase: 42,
        });
        roundtrip(&Message::AckNack {
            conduit: ConduitId(0),
            seqbase: 42,
            mask: 0b1011,
        });
    }

    #[test]
    fn roundtrips_declaration_messages() {
        roundtrip(&Message::DeclRes {
            commit: CommitId(7),
            rid: ResourceId::new(5).unwrap(),
            uri: b"temp/outside",
        });
        roundtrip(&Message::DeclPub {
            commit: CommitId(7),
            rid: ResourceId::new(5).unwrap(),
        });
        roundtrip(&Message::DeclSub {
            commit: CommitId(7),
            rid: ResourceId::new(5).unwrap(),
            mode: SubMode::Reliable,
        });
        roundtrip(&Message::DeclCommit { commit: CommitId(7) });
        roundtrip(&Message::DeclResult {
            commit: CommitId(7),
            status: 0,
            rid: ResourceId::new(5).unwrap(),
        });
    }

    #[test]
    fn roundtrips_data_messages() {
        roundtrip(&Message::Data {
            rid: ResourceId::new(1).unwrap(),
            payload: b"hello",
        });
        roundtrip(&Message::MData {
            conduit: ConduitId(0),
            seq: 123,
            rid: ResourceId::new(1).unwrap(),
            payload: b"hello",
        });
        roundtrip(&Message::WData {
            conduit: ConduitId(0),
            seq: 123,
            uri: b"temp/outside",
            payload: b"hello",
        });
        roundtrip(&Message::KeepAlive);
    }

    #[test]
    fn truncated_buffer_is_malformed() {
        let msg = Message::Hello {
            peer_id: pid(&[1, 2, 3]),
        };
        let mut buf = [0u8; 256];
        let n = msg.encode(&mut buf).unwrap();
        assert_eq!(
            Message::decode(&buf[..n - 1]),
            Err(Error::MalformedPacket)
        );
    }

    #[test]
    fn iter_packet_yields_every_framed_message_in_order() {
        let mut buf = [0u8; 256];
        let mut at = 0;
        let msgs = [
            Message::DeclPub {
                commit: CommitId(3),
                rid: ResourceId::new(1).unwrap(),
            },
            Message::DeclSub {
                commit: CommitId(3),
                rid: ResourceId::new(2).unwrap(),
                mode: SubMode::Reliable,
            },
            Message::DeclCommit { commit: CommitId(3) },
        ];
        for m in &msgs {
            at += m.encode(&mut buf[at..]).unwrap();
        }
        let mut decoded: heapless::Vec<Message, 4> = heapless::Vec::new();
        for m in Message::iter_packet(&buf[..at]) {
            decoded.push(m.unwrap()).unwrap();
        }
        assert_eq!(decoded.as_slice(), &msgs);
    }

    #[test]
    fn iter_packet_stops_at_first_malformed_message_but_keeps_prior() {
        let mut buf = [0u8; 256];
        let n = Message::Scout.encode(&mut buf).unwrap();
        // Truncated second message: a Hello header byte with no body.
        buf[n] = MessageKind::Hello as u8;
        let total = n + 1;
        let mut it = Message::iter_packet(&buf[..total]);
        assert_eq!(it.next(), Some(Ok(Message::Scout)));
        assert_eq!(it.next(), Some(Err(Error::MalformedPacket)));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn buffer_too_small_on_encode_is_reported() {
        let msg = Message::Data {
            rid: ResourceId::new(1).unwrap(),
            payload: b"this payload is longer than four bytes",
        };
        let mut buf = [0u8; 4];
        assert_eq!(msg.encode(&mut buf), Err(Error::BufferTooSmall));
    }
}
