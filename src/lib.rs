// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # pico-pubsub
//!
//! A compact, single-threaded peer-to-peer publish/subscribe protocol
//! engine for embedded and host targets.
//!
//! ## Design constraints
//!
//! - No heap allocations in the core (`heapless` fixed-capacity
//!   collections throughout).
//! - Cooperative, run-to-completion: [`Engine::poll`] and
//!   [`Engine::housekeeping`] are the only entry points, driven from a
//!   caller's own loop. No locks, no async, no background threads.
//! - `no_std` compatible.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------+
//! |  Application (publish/subscribe calls)   |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  Engine: peer state machine, declare,    |
//! |  pub/sub routing, housekeeping           |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  Wire codec (messages, varints)          |
//! +-----------------------------------------+
//!           v                    ^
//! +-----------------------------------------+
//! |  Transport (UDP / radio / serial)        |
//! +-----------------------------------------+
//! ```
//!
//! ## Feature flags
//!
//! - `std` -- enable `std`, the `log` crate, and the UDP transport
//!   (for host testing and the reference driver/demos).
//! - `alloc` -- enable a heap allocator for targets with `alloc` but no
//!   full `std`.
//! - `trace` -- compile-time-gated tracing of engine internals; a
//!   no-op unless also built with `std`.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(feature = "alloc")]
extern crate alloc;

/// Compile-time limits and runtime [`config::Config`].
pub mod config;

/// Declaration engine: stage/precommit/commit for DECL-RES/DECL-PUB/DECL-SUB.
pub mod declare;

/// The central engine type applications drive.
pub mod engine;

/// Entropy capability: sourcing a random local peer ID.
pub mod entropy;

/// Error types.
pub mod error;

/// Min-sequence heap tracking the slowest acknowledger per mconduit.
pub mod heap;

/// Periodic housekeeping timers and decisions.
pub mod housekeeping;

/// Compile-time-gated tracing.
pub mod logging;

/// Peer state machine and peer table.
pub mod peer;

/// Local publication/subscription tables and inbound routing.
pub mod pubsub;

/// Receive-side sequence tracking and gap detection for reliable conduits.
pub mod rx;

/// Wrap-aware sequence number arithmetic.
pub mod seq;

/// Read-only activity counters.
pub mod telemetry;

/// Monotonic time capability.
pub mod time;

/// Transport abstraction.
pub mod transport;

/// Per-conduit transmit window.
pub mod window;

/// Wire message types and codec.
pub mod wire;

pub use crate::engine::Engine;
pub use crate::error::{Error, Result};
pub use crate::transport::Transport;
pub use crate::wire::types::{PeerId, ResourceId};

/// Crate version, as set in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
