//! In-process links and fault injection for deterministic testing.
//!
//! Real networks drop packets.  To exercise the reliability mechanisms without
//! depending on actual network conditions, this module provides:
//!
//! - [`link`] — two connected [`MemoryTransport`] endpoints backed by tokio
//!   channels.  Closing (or dropping) one endpoint makes the other's receive
//!   report [`RecvOutcome::Closed`] once the queued datagrams are drained.
//! - [`Simulator`] — wraps any [`Transport`] and silently drops outbound
//!   datagrams according to a [`LossModel`].
//!
//! | Model                | Drops                                           |
//! |----------------------|-------------------------------------------------|
//! | `None`               | nothing                                         |
//! | `EveryNth(n)`        | the n-th, 2n-th, … datagram sent                |
//! | `Scripted(set)`      | the datagrams whose 1-based send index is listed|
//! | `Random{rate, seed}` | each datagram with probability `rate`           |
//!
//! Random loss uses a seeded RNG so failures are reproducible.

use std::collections::BTreeSet;
use std::io;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::transport::{within, RecvOutcome, Transport};

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

/// One end of an in-process datagram link.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    timeout: Option<Duration>,
}

/// Create two connected endpoints.
pub fn link() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: Some(a_tx),
            rx: a_rx,
            timeout: None,
        },
        MemoryTransport {
            tx: Some(b_tx),
            rx: b_rx,
            timeout: None,
        },
    )
}

impl Transport for MemoryTransport {
    async fn bind(&mut self, _port: u16) -> io::Result<()> {
        Ok(())
    }

    async fn connect(&mut self, _host: &str, _port: u16) -> io::Result<()> {
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "link end closed"))?;
        // A vanished peer just means the datagram is lost.
        let _ = tx.send(bytes.to_vec());
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<RecvOutcome> {
        match within(self.timeout, self.rx.recv()).await {
            None => Ok(RecvOutcome::Timeout),
            Some(None) => Ok(RecvOutcome::Closed),
            Some(Some(datagram)) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(RecvOutcome::Data(n))
            }
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn close(&mut self) -> io::Result<()> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Which outbound datagrams a [`Simulator`] drops.
#[derive(Debug, Clone, Default)]
pub enum LossModel {
    #[default]
    None,
    EveryNth(u64),
    Scripted(BTreeSet<u64>),
    Random { rate: f64, seed: u64 },
}

impl LossModel {
    /// Drop exactly the listed 1-based send indices.
    pub fn scripted(indices: impl IntoIterator<Item = u64>) -> Self {
        Self::Scripted(indices.into_iter().collect())
    }
}

/// A fault-injecting wrapper around another transport.
#[derive(Debug)]
pub struct Simulator<T> {
    inner: T,
    model: LossModel,
    rng: StdRng,
    sent: u64,
    dropped: u64,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, model: LossModel) -> Self {
        let seed = match &model {
            LossModel::Random { seed, .. } => *seed,
            _ => 0,
        };
        Self {
            inner,
            model,
            rng: StdRng::seed_from_u64(seed),
            sent: 0,
            dropped: 0,
        }
    }

    /// Datagrams handed to this simulator, dropped or not.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Datagrams the loss model discarded.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Count one send and decide its fate.
    fn should_drop(&mut self) -> bool {
        self.sent += 1;
        let n = self.sent;
        let drop = match &self.model {
            LossModel::None => false,
            LossModel::EveryNth(k) => *k > 0 && n % *k == 0,
            LossModel::Scripted(indices) => indices.contains(&n),
            LossModel::Random { rate, .. } => self.rng.gen::<f64>() < *rate,
        };
        if drop {
            self.dropped += 1;
        }
        drop
    }
}

impl<T: Transport> Transport for Simulator<T> {
    async fn bind(&mut self, port: u16) -> io::Result<()> {
        self.inner.bind(port).await
    }

    async fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        self.inner.connect(host, port).await
    }

    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.should_drop() {
            log::debug!("[sim] dropping datagram #{} ({} bytes)", self.sent, bytes.len());
            return Ok(());
        }
        self.inner.send(bytes).await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<RecvOutcome> {
        self.inner.recv(buf).await
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_timeout(timeout);
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}
