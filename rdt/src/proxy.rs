//! Lossy, delaying UDP relay for exercising the protocol on a real network.
//!
//! The proxy sits between one client and one fixed destination:
//!
//! ```text
//!  client ──▶ proxy(src) ──▶ dst
//!  client ◀── proxy(src) ◀── dst
//! ```
//!
//! The first datagram from anywhere other than `dst` fixes the client.  A
//! datagram from a different address later on replaces it (a new client).
//! Every datagram is dropped with probability `loss`; survivors wait for the
//! median delay ±10% before being forwarded.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;

use crate::segment::{Segment, MAX_SEG_SIZE};

/// Relay parameters.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local port the client talks to.
    pub src: u16,
    /// Where client datagrams are forwarded.
    pub dst: SocketAddr,
    /// Drop probability in `[0, 1]`.
    pub loss: f64,
    /// Median one-way delay added to forwarded datagrams.
    pub median_delay: Duration,
    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

/// What happened to one relayed datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Delivered { to: SocketAddr, len: usize },
    Dropped { len: usize },
}

pub struct Proxy {
    socket: UdpSocket,
    config: ProxyConfig,
    client: Option<SocketAddr>,
    rng: StdRng,
}

impl Proxy {
    pub async fn bind(config: ProxyConfig) -> io::Result<Self> {
        if !(0.0..=1.0).contains(&config.loss) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("loss rate {} is outside [0, 1]", config.loss),
            ));
        }
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.src)).await?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        log::info!(
            "[proxy] relaying {} -> {} (loss={}, delay={:?})",
            socket.local_addr()?,
            config.dst,
            config.loss,
            config.median_delay
        );
        Ok(Self {
            socket,
            config,
            client: None,
            rng,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Relay datagrams until an I/O error occurs.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            self.forward_one().await?;
        }
    }

    /// Receive one datagram and relay or drop it.
    pub async fn forward_one(&mut self) -> io::Result<Forwarded> {
        let mut buf = [0u8; MAX_SEG_SIZE];
        let (n, from) = self.socket.recv_from(&mut buf).await?;
        let datagram = &buf[..n];

        let to = if from == self.config.dst {
            match self.client {
                Some(client) => client,
                None => {
                    log::warn!("[proxy] {n} bytes from {from} before any client; dropping");
                    return Ok(Forwarded::Dropped { len: n });
                }
            }
        } else {
            match self.client {
                Some(client) if client == from => {}
                Some(client) => {
                    log::warn!("[proxy] new client {from} replaces {client}");
                    self.client = Some(from);
                }
                None => {
                    log::info!("[proxy] client is {from}");
                    self.client = Some(from);
                }
            }
            self.config.dst
        };

        let what = match Segment::decode(datagram) {
            Ok(seg) => seg.to_string(),
            Err(_) => format!("{n} opaque bytes"),
        };

        if self.rng.gen::<f64>() < self.config.loss {
            log::debug!("[proxy] drop {from} -> {to}: {what}");
            return Ok(Forwarded::Dropped { len: n });
        }

        let delay = self.jittered_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.socket.send_to(datagram, to).await?;
        log::debug!("[proxy] {from} -> {to} after {delay:?}: {what}");
        Ok(Forwarded::Delivered { to, len: n })
    }

    fn jittered_delay(&mut self) -> Duration {
        let median = self.config.median_delay;
        if median.is_zero() {
            return median;
        }
        median.mul_f64(self.rng.gen_range(0.9..=1.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentKind;

    async fn local() -> (UdpSocket, SocketAddr) {
        let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = sock.local_addr().unwrap();
        (sock, addr)
    }

    async fn proxy_to(dst: SocketAddr, loss: f64) -> (Proxy, SocketAddr) {
        let proxy = Proxy::bind(ProxyConfig {
            src: 0,
            dst,
            loss,
            median_delay: Duration::ZERO,
            seed: Some(1),
        })
        .await
        .unwrap();
        let port = proxy.local_addr().unwrap().port();
        (proxy, SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    #[tokio::test]
    async fn lossless_proxy_relays_both_ways() {
        let (server, server_addr) = local().await;
        let (mut proxy, proxy_addr) = proxy_to(server_addr, 0.0).await;
        let (client, client_addr) = local().await;

        let conn = Segment::control(SegmentKind::Conn, 0, 0).encode().unwrap();
        client.send_to(&conn, proxy_addr).await.unwrap();
        assert_eq!(
            proxy.forward_one().await.unwrap(),
            Forwarded::Delivered { to: server_addr, len: conn.len() }
        );

        let mut buf = [0u8; 64];
        let (n, via) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &conn[..]);
        assert_eq!(via.port(), proxy_addr.port());

        let ack = Segment::ack(2).encode().unwrap();
        server.send_to(&ack, via).await.unwrap();
        assert_eq!(
            proxy.forward_one().await.unwrap(),
            Forwarded::Delivered { to: client_addr, len: ack.len() }
        );
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &ack[..]);
    }

    #[tokio::test]
    async fn total_loss_drops_everything() {
        let (_server, server_addr) = local().await;
        let (mut proxy, proxy_addr) = proxy_to(server_addr, 1.0).await;
        let (client, _) = local().await;

        for _ in 0..3 {
            client.send_to(b"lost", proxy_addr).await.unwrap();
            assert_eq!(
                proxy.forward_one().await.unwrap(),
                Forwarded::Dropped { len: 4 }
            );
        }
    }

    #[tokio::test]
    async fn loss_rate_out_of_range_is_rejected() {
        let (_server, server_addr) = local().await;
        let err = Proxy::bind(ProxyConfig {
            src: 0,
            dst: server_addr,
            loss: 1.5,
            median_delay: Duration::ZERO,
            seed: None,
        })
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
