//! Entry point for `rdt`.
//!
//! Parses CLI arguments and dispatches into **send**, **recv** or **proxy**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing, file I/O and the summary
//! line).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use rdt::proxy::{Proxy, ProxyConfig};
use rdt::segment::MAX_PAYLOAD;
use rdt::{Connection, Socket, TimerConfig};

/// Reliable stop-and-wait file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Print protocol events (debug logging).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Connect to a receiver and stream a file (or stdin) to it.
    Send {
        /// Receiver host name or address.
        host: String,
        /// Receiver port.
        port: u16,
        /// File to send, or `-` for stdin.
        input: PathBuf,
    },
    /// Accept one connection and write everything received to a file (or stdout).
    Recv {
        /// Local port to listen on.
        port: u16,
        /// Output file, or `-` for stdout.
        output: PathBuf,
        /// How long to keep answering the peer's CLOSE after end-of-stream.
        #[arg(long, default_value_t = 2000)]
        linger_ms: u64,
    },
    /// Relay datagrams between one client and a receiver, losing and delaying some.
    Proxy {
        /// Local port clients connect to.
        #[arg(long)]
        src: u16,
        /// Receiver address, e.g. 127.0.0.1:9000.
        #[arg(long)]
        dst: String,
        /// Drop probability in [0, 1].
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        /// Median one-way delay in milliseconds.
        #[arg(long, default_value_t = 0)]
        delay: u64,
        /// Seed for reproducible loss.
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG still wins over the flag.
    let default_level = if cli.verbose { "debug" } else { "error" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let outcome = match cli.mode {
        Mode::Send { host, port, input } => run_send(&host, port, &input).await,
        Mode::Recv {
            port,
            output,
            linger_ms,
        } => run_recv(port, &output, config(linger_ms)).await,
        Mode::Proxy {
            src,
            dst,
            loss,
            delay,
            seed,
        } => run_proxy(src, &dst, loss, delay, seed).await,
    };

    if let Err(e) = outcome {
        log::error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn config(linger_ms: u64) -> TimerConfig {
    TimerConfig {
        linger: Duration::from_millis(linger_ms),
        ..TimerConfig::default()
    }
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

async fn run_send(host: &str, port: u16, input: &Path) -> Result<()> {
    let mut reader: Box<dyn AsyncRead + Unpin + Send> = if is_stdio(input) {
        Box::new(tokio::io::stdin())
    } else {
        let file = tokio::fs::File::open(input)
            .await
            .with_context(|| format!("opening {}", input.display()))?;
        Box::new(file)
    };

    let mut conn = Connection::new(Socket::new());
    conn.initiate(host, port)
        .await
        .with_context(|| format!("connecting to {host}:{port}"))?;

    let started = Instant::now();
    let mut total = 0usize;
    let mut chunk = vec![0u8; MAX_PAYLOAD];
    loop {
        let n = fill_chunk(&mut reader, &mut chunk).await.context("reading input")?;
        if n == 0 {
            break;
        }
        conn.send(&chunk[..n]).await.context("sending data")?;
        total += n;
    }
    conn.close().await.context("closing connection")?;

    report(total, started.elapsed(), &conn);
    eprintln!("retransmissions: {}", conn.retransmissions());
    Ok(())
}

async fn run_recv(port: u16, output: &Path, timers: TimerConfig) -> Result<()> {
    let mut writer: Box<dyn AsyncWrite + Unpin + Send> = if is_stdio(output) {
        Box::new(tokio::io::stdout())
    } else {
        let file = tokio::fs::File::create(output)
            .await
            .with_context(|| format!("creating {}", output.display()))?;
        Box::new(file)
    };

    let mut conn = Connection::with_config(Socket::new(), timers);
    conn.accept(port)
        .await
        .with_context(|| format!("accepting on port {port}"))?;

    let started = Instant::now();
    let mut total = 0usize;
    while let Some(payload) = conn.recv().await.context("receiving data")? {
        writer.write_all(&payload).await.context("writing output")?;
        total += payload.len();
    }
    writer.flush().await.context("flushing output")?;
    let elapsed = started.elapsed();
    conn.close().await.context("closing connection")?;

    report(total, elapsed, &conn);
    eprintln!(
        "segments: {} delivered, {} duplicates discarded",
        conn.receiver().delivered(),
        conn.receiver().duplicates()
    );
    Ok(())
}

async fn run_proxy(src: u16, dst: &str, loss: f64, delay_ms: u64, seed: Option<u64>) -> Result<()> {
    let Some(dst) = tokio::net::lookup_host(dst)
        .await
        .with_context(|| format!("resolving {dst}"))?
        .find(|a| a.is_ipv4())
    else {
        bail!("{dst} has no IPv4 address");
    };

    let proxy = Proxy::bind(ProxyConfig {
        src,
        dst,
        loss,
        median_delay: Duration::from_millis(delay_ms),
        seed,
    })
    .await
    .with_context(|| format!("binding proxy port {src}"))?;
    proxy.run().await.context("relaying datagrams")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read until `chunk` is full or the input ends.  Returns the bytes read.
async fn fill_chunk<R: AsyncRead + Unpin>(reader: &mut R, chunk: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        let n = reader.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn report<T: rdt::transport::Transport>(bytes: usize, elapsed: Duration, conn: &Connection<T>) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };
    eprintln!("{bytes} bytes in {secs:.3} s ({rate:.0} B/s), estimated RTT {:.3} ms", conn.estimated_rtt());
}
