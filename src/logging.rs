// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compile-time-gated tracing.
//!
//! [`trace!`] compiles to nothing unless the `trace` feature is
//! enabled, so a release embedded build pays zero cost for it. When
//! `trace` and `std` are both enabled it forwards to [`log::trace!`],
//! giving a host driver ordinary structured log lines tagged with a
//! [`Category`].

/// Which subsystem emitted a trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Peer discovery and session lifecycle (SCOUT/HELLO/OPEN/ACCEPT/CLOSE).
    PeerDisc,
    /// Reliability layer (SYNCH/ACKNACK, retransmission, window reclaim).
    Reliability,
    /// Pub/sub routing and delivery.
    PubSub,
    /// Declaration engine (stage/precommit/commit/abort).
    Declare,
}

impl Category {
    /// Short tag used as a `log` target suffix.
    pub const fn tag(self) -> &'static str {
        match self {
            Category::PeerDisc => "peerdisc",
            Category::Reliability => "reliability",
            Category::PubSub => "pubsub",
            Category::Declare => "declare",
        }
    }
}

#[cfg(all(feature = "trace", feature = "std"))]
#[doc(hidden)]
pub fn emit(cat: Category, args: core::fmt::Arguments) {
    log::trace!(target: "pico_pubsub", "[{}] {}", cat.tag(), args);
}

/// Emit a trace line tagged with a [`Category`]. A no-op unless the
/// `trace` feature is enabled.
#[cfg(all(feature = "trace", feature = "std"))]
#[macro_export]
macro_rules! trace {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::emit($cat, format_args!($($arg)*))
    };
}

/// Emit a trace line tagged with a [`Category`]. A no-op unless the
/// `trace` feature is enabled.
#[cfg(not(all(feature = "trace", feature = "std")))]
#[macro_export]
macro_rules! trace {
    ($cat:expr, $($arg:tt)*) => {
        let _ = &$cat;
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_tags_are_stable() {
        assert_eq!(Category::PeerDisc.tag(), "peerdisc");
        assert_eq!(Category::Declare.tag(), "declare");
    }

    #[test]
    fn trace_macro_compiles_in_both_configurations() {
        crate::trace!(Category::PubSub, "test {}", 1);
    }
}
