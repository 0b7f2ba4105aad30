// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire format: message types and their codec.

mod codec;
pub mod header;
pub mod messages;
pub mod types;
pub mod varint;

pub use codec::PacketIter;
pub use header::MessageKind;
pub use messages::Message;
pub use types::{CommitId, ConduitId, PeerId, ResourceId, SubMode};
