//! Line sources.
//!
//! Every source runs on its own thread and feeds a [`Funnel`]; the single
//! ingestion loop consumes the funnel. Sources never touch the log.

use std::io::{self, BufRead};
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::framing::Framing;

/// Largest syslog datagram accepted.
pub const MAX_DATAGRAM: usize = 4096;

/// Pause after a transient receive error.
pub const RECV_BACKOFF: Duration = Duration::from_millis(100);

/// Default funnel capacity, in lines.
pub const DEFAULT_FUNNEL_CAPACITY: usize = 1024;

/// One line as received from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub framing: Framing,
}

impl Line {
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            framing: Framing::Raw,
        }
    }

    pub fn syslog(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            framing: Framing::Syslog,
        }
    }
}

impl From<String> for Line {
    fn from(text: String) -> Self {
        Line::raw(text)
    }
}

impl From<&str> for Line {
    fn from(text: &str) -> Self {
        Line::raw(text)
    }
}

/// Bounded many-producer, single-consumer queue of lines.
pub struct Funnel {
    tx: SyncSender<Line>,
    rx: Receiver<Line>,
}

impl Default for Funnel {
    fn default() -> Self {
        Self::new(DEFAULT_FUNNEL_CAPACITY)
    }
}

impl Funnel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity);
        Self { tx, rx }
    }

    /// A producer handle for one more source.
    pub fn sender(&self) -> SyncSender<Line> {
        self.tx.clone()
    }

    /// Consume the funnel. Iteration ends once every sender is gone.
    pub fn into_lines(self) -> impl Iterator<Item = Line> {
        let Funnel { tx, rx } = self;
        drop(tx);
        rx.into_iter()
    }
}

/// Feed stdin lines into `tx` until end of input.
pub fn spawn_stdin(tx: SyncSender<Line>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("source-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let count = forward_lines(stdin.lock(), &tx);
            info!(lines = count, "stdin closed");
        })
}

/// Forward every line of `reader` as a raw line. Returns the count sent.
pub fn forward_lines<R: BufRead>(reader: R, tx: &SyncSender<Line>) -> u64 {
    let mut count = 0;
    for line in reader.lines() {
        let text = match line {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "read failed, closing source");
                break;
            }
        };
        if tx.send(Line::raw(text)).is_err() {
            break;
        }
        count += 1;
    }
    count
}

/// Bind a UDP socket and feed syslog datagrams into `tx`.
///
/// Binding happens on the calling thread so address errors surface here.
pub fn spawn_syslog(addr: SocketAddr, tx: SyncSender<Line>) -> io::Result<JoinHandle<()>> {
    let socket = UdpSocket::bind(addr)?;
    info!(%addr, "listening for syslog datagrams");

    thread::Builder::new()
        .name(format!("source-udp-{}", addr.port()))
        .spawn(move || receive_datagrams(|buf| socket.recv_from(buf), &tx))
}

/// Errors after which the socket is still usable.
fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

fn receive_datagrams<F>(mut recv: F, tx: &SyncSender<Line>)
where
    F: FnMut(&mut [u8]) -> io::Result<(usize, SocketAddr)>,
{
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match recv(&mut buf) {
            Ok(received) => received,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_transient(e.kind()) => {
                debug!(error = %e, "recv failed, retrying");
                thread::sleep(RECV_BACKOFF);
                continue;
            }
            Err(e) => {
                warn!(error = %e, "recv failed, closing source");
                break;
            }
        };

        let text = match std::str::from_utf8(&buf[..len]) {
            Ok(text) => text,
            Err(e) => {
                debug!(%peer, error = %e, "dropping non-UTF-8 datagram");
                continue;
            }
        };

        if tx.send(Line::syslog(text)).is_err() {
            break;
        }
    }
}
