// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transport abstraction.
//!
//! The engine is transport-agnostic: it drives any [`Transport`]
//! implementation over a single address type `A` (an IPv4 socket
//! address for [`StdUdpTransport`], but just as easily a LoRa node ID
//! or a serial port handle on an embedded target). This mirrors the
//! grounding repo's own `Transport` trait, generalized from a fixed
//! RTPS `Locator` to a type parameter so the engine carries no
//! assumption about the underlying medium.
//!
//! ## Design principles
//!
//! - No heap allocations in the trait itself - implementations own
//!   their buffers.
//! - Blocking `recv`, non-blocking `try_recv`.
//! - Zero-copy: `recv`/`try_recv` write into a caller-provided buffer.

use crate::error::{Error, Result};

/// A capability the engine drives to exchange packets with peers.
///
/// Exactly one `Transport` instance backs an [`crate::engine::Engine`];
/// the engine never fans out across multiple transports (see the
/// single-transport-instance restriction).
pub trait Transport {
    /// The address type this transport's peers are named by.
    type Address: Clone + PartialEq;

    /// Initialize the transport. Called once during
    /// [`crate::engine::Engine::init`].
    fn init(&mut self) -> Result<()>;

    /// Send `data` to `dest`, returning the number of bytes written.
    fn send(&mut self, data: &[u8], dest: &Self::Address) -> Result<usize>;

    /// Receive a packet, blocking until one arrives.
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, Self::Address)>;

    /// Receive a packet without blocking.
    ///
    /// Returns `Err(Error::ResourceExhausted)` if none is available.
    fn try_recv(&mut self, buf: &mut [u8]) -> Result<(usize, Self::Address)>;

    /// This transport's own address, as peers would address it.
    fn local_locator(&self) -> Self::Address;

    /// Maximum transmission unit in bytes.
    fn mtu(&self) -> usize;

    /// Last received packet's RSSI, if the medium reports one.
    fn last_rssi(&self) -> Option<i16> {
        None
    }

    /// Join a multicast group, if the medium has a notion of one.
    /// Defaults to a no-op for transports without multicast (point-to-point
    /// links, loopback test fakes).
    fn join_multicast(&mut self, group: &Self::Address) -> Result<()> {
        let _ = group;
        Ok(())
    }

    /// Release any transport-level resources.
    fn shutdown(&mut self) -> Result<()>;
}

/// An address type that never matches and a transport that never
/// produces or accepts traffic; used in tests and as a placeholder
/// before a real transport is wired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NullAddress;

/// Discards everything sent to it and never receives anything.
#[derive(Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    type Address = NullAddress;

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn send(&mut self, data: &[u8], _dest: &Self::Address) -> Result<usize> {
        Ok(data.len())
    }

    fn recv(&mut self, _buf: &mut [u8]) -> Result<(usize, Self::Address)> {
        Err(Error::TransportError)
    }

    fn try_recv(&mut self, _buf: &mut [u8]) -> Result<(usize, Self::Address)> {
        Err(Error::ResourceExhausted)
    }

    fn local_locator(&self) -> Self::Address {
        NullAddress
    }

    fn mtu(&self) -> usize {
        crate::config::TRANSPORT_MTU
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A UDP socket address: IPv4 octets plus port. Kept as a plain value
/// type (rather than `std::net::SocketAddr`) so it is available even
/// without the `std` feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpAddr {
    /// IPv4 address octets.
    pub ip: [u8; 4],
    /// UDP port.
    pub port: u16,
}

impl UdpAddr {
    /// Build an address from octets and a port.
    pub const fn new(ip: [u8; 4], port: u16) -> Self {
        Self { ip, port }
    }
}

/// Standard library UDP transport, used by the host demos and
/// reference driver.
#[cfg(feature = "std")]
pub struct StdUdpTransport {
    socket: std::net::UdpSocket,
}

#[cfg(feature = "std")]
impl StdUdpTransport {
    /// Bind to `port` on all interfaces (0 lets the OS assign one).
    pub fn bind(port: u16) -> Result<Self> {
        let socket = std::net::UdpSocket::bind(("0.0.0.0", port)).map_err(|_| Error::TransportError)?;
        socket
            .set_nonblocking(false)
            .map_err(|_| Error::TransportError)?;
        Ok(Self { socket })
    }

}

#[cfg(feature = "std")]
impl Transport for StdUdpTransport {
    type Address = UdpAddr;

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn send(&mut self, data: &[u8], dest: &Self::Address) -> Result<usize> {
        let addr = std::net::SocketAddrV4::new(dest.ip.into(), dest.port);
        self.socket
            .send_to(data, addr)
            .map_err(|_| Error::TransportError)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, Self::Address)> {
        let (n, addr) = self
            .socket
            .recv_from(buf)
            .map_err(|_| Error::TransportError)?;
        to_udp_addr(n, addr)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> Result<(usize, Self::Address)> {
        self.socket
            .set_nonblocking(true)
            .map_err(|_| Error::TransportError)?;
        let result = match self.socket.recv_from(buf) {
            Ok((n, addr)) => to_udp_addr(n, addr),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(Error::ResourceExhausted)
            }
            Err(_) => Err(Error::TransportError),
        };
        self.socket
            .set_nonblocking(false)
            .map_err(|_| Error::TransportError)?;
        result
    }

    fn local_locator(&self) -> Self::Address {
        match self.socket.local_addr() {
            Ok(std::net::SocketAddr::V4(v4)) => UdpAddr::new(v4.ip().octets(), v4.port()),
            _ => UdpAddr::new([0, 0, 0, 0], 0),
        }
    }

    fn mtu(&self) -> usize {
        crate::config::TRANSPORT_MTU
    }

    /// Joins the IPv4 multicast group named by `group.ip` on the
    /// all-interfaces address; `group.port` is ignored since multicast
    /// group membership has no port component.
    fn join_multicast(&mut self, group: &Self::Address) -> Result<()> {
        self.socket
            .join_multicast_v4(&group.ip.into(), &[0, 0, 0, 0].into())
            .map_err(|_| Error::TransportError)
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "std")]
fn to_udp_addr(n: usize, addr: std::net::SocketAddr) -> Result<(usize, UdpAddr)> {
    match addr {
        std::net::SocketAddr::V4(v4) => Ok((n, UdpAddr::new(v4.ip().octets(), v4.port()))),
        std::net::SocketAddr::V6(_) => Err(Error::TransportError),
    }
}

/// Decorator that randomly discards outbound packets, simulating a
/// lossy link. Supplements the reference driver's `-X <pct>` artificial
/// drop rate; used only by tests and demos, never by the engine
/// itself, which assumes a single well-behaved transport instance.
#[cfg(feature = "std")]
pub struct DroppingTransport<T> {
    inner: T,
    /// Probability, 0.0-1.0, that an outbound `send` is silently
    /// dropped.
    pub drop_rate: f64,
}

#[cfg(feature = "std")]
impl<T: Transport> DroppingTransport<T> {
    /// Wrap `inner`, dropping outbound sends with probability
    /// `drop_rate` (0.0-1.0).
    pub fn new(inner: T, drop_rate: f64) -> Self {
        Self { inner, drop_rate }
    }
}

#[cfg(feature = "std")]
impl<T: Transport> Transport for DroppingTransport<T> {
    type Address = T::Address;

    fn init(&mut self) -> Result<()> {
        self.inner.init()
    }

    fn send(&mut self, data: &[u8], dest: &Self::Address) -> Result<usize> {
        if fastrand::f64() < self.drop_rate {
            return Ok(data.len());
        }
        self.inner.send(data, dest)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, Self::Address)> {
        self.inner.recv(buf)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> Result<(usize, Self::Address)> {
        self.inner.try_recv(buf)
    }

    fn local_locator(&self) -> Self::Address {
        self.inner.local_locator()
    }

    fn mtu(&self) -> usize {
        self.inner.mtu()
    }

    fn last_rssi(&self) -> Option<i16> {
        self.inner.last_rssi()
    }

    fn join_multicast(&mut self, group: &Self::Address) -> Result<()> {
        self.inner.join_multicast(group)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_transport_discards_and_never_receives() {
        let mut t = NullTransport;
        t.init().unwrap();
        let sent = t.send(b"hello", &NullAddress).unwrap();
        assert_eq!(sent, 5);
        let mut buf = [0u8; 16];
        assert_eq!(t.try_recv(&mut buf), Err(Error::ResourceExhausted));
    }

    #[cfg(feature = "std")]
    #[test]
    fn std_udp_transport_roundtrips_locally() {
        let mut a = StdUdpTransport::bind(0).unwrap();
        let mut b = StdUdpTransport::bind(0).unwrap();
        let dest = a.local_locator();
        b.send(b"ping", &dest).unwrap();
        let mut buf = [0u8; 16];
        let (n, _src) = a.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[cfg(feature = "std")]
    #[test]
    fn dropping_transport_always_drops_at_rate_one() {
        let inner = StdUdpTransport::bind(0).unwrap();
        let dest = UdpAddr::new([127, 0, 0, 1], 9); // discard port
        let mut t = DroppingTransport::new(inner, 1.0);
        let n = t.send(b"gone", &dest).unwrap();
        assert_eq!(n, 4);
    }
}
