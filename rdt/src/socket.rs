//! UDP implementation of [`Transport`].
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves raw
//! datagrams.  All protocol logic lives elsewhere; this module owns only byte
//! I/O and the mapping of OS conditions onto [`RecvOutcome`].
//!
//! A listening socket does not know its peer up front.  The first datagram it
//! receives fixes the peer: the socket connects to the sender's address, so
//! later sends and receives are bound to that one remote endpoint.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};

use crate::transport::{within, RecvOutcome, Transport};

/// A datagram socket that starts unbound and is released by [`Transport::close`].
#[derive(Debug, Default)]
pub struct Socket {
    inner: Option<UdpSocket>,
    connected: bool,
    timeout: Option<Duration>,
}

impl Socket {
    /// An unbound socket.  [`Transport::bind`] or [`Transport::connect`]
    /// creates the OS socket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address this socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.open()?.local_addr()
    }

    /// Remote address, once connected.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.open()?.peer_addr()
    }

    fn open(&self) -> io::Result<&UdpSocket> {
        self.inner
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is not open"))
    }
}

impl Transport for Socket {
    async fn bind(&mut self, port: u16) -> io::Result<()> {
        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        log::debug!("[udp] bound {}", sock.local_addr()?);
        self.inner = Some(sock);
        self.connected = false;
        Ok(())
    }

    async fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        let addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
        let remote = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{host}:{port} did not resolve"),
                )
            })?;

        if self.inner.is_none() {
            let sock = if remote.is_ipv4() {
                UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?
            } else {
                UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).await?
            };
            self.inner = Some(sock);
        }

        self.open()?.connect(remote).await?;
        self.connected = true;
        log::debug!("[udp] connected to {remote}");
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.connected {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "cannot send before a peer is known",
            ));
        }
        log::trace!("[udp] send {} bytes", bytes.len());
        self.open()?.send(bytes).await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<RecvOutcome> {
        let limit = self.timeout;
        let sock = self.open()?;

        let received = if self.connected {
            match within(limit, sock.recv(buf)).await {
                Some(result) => result.map(|n| (n, None)),
                None => return Ok(RecvOutcome::Timeout),
            }
        } else {
            match within(limit, sock.recv_from(buf)).await {
                Some(result) => result.map(|(n, from)| (n, Some(from))),
                None => return Ok(RecvOutcome::Timeout),
            }
        };

        match received {
            Ok((0, _)) => Ok(RecvOutcome::Closed),
            Ok((n, Some(from))) => {
                sock.connect(from).await?;
                self.connected = true;
                log::debug!("[udp] first datagram from {from}; connected");
                Ok(RecvOutcome::Data(n))
            }
            Ok((n, None)) => Ok(RecvOutcome::Data(n)),
            // ICMP port-unreachable surfaces on connected UDP sockets.
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                ) =>
            {
                Ok(RecvOutcome::Closed)
            }
            Err(e) => Err(e),
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner = None;
        self.connected = false;
        Ok(())
    }
}
