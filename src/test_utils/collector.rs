//! In-process forward-protocol collector.
//!
//! [`FakeCollector`] listens on an ephemeral TCP port or a Unix socket path,
//! decodes every record it receives and hands it to the test through a
//! channel. Records carrying a chunk id are answered according to the
//! configured [`AckMode`]. A collector can also hang up after a fixed number
//! of records per connection, as a collector restarting would.

use std::{
    collections::BTreeMap,
    io::{self, BufRead, BufReader, Read, Write},
    net::{SocketAddr, TcpListener},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

#[cfg(unix)]
use std::{os::unix::net::UnixListener, path::Path};

use serde::Serialize;

use crate::{
    event_time::{EVENT_TIME_EXT_TYPE, EVENT_TIME_PACKED_LEN, EventTime},
    packet::WireTime,
};

/// MessagePack `fixext 8` marker.
const FIXEXT8: u8 = 0xd7;

/// How the collector answers records that request an acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckMode {
    /// Echo the record's chunk id.
    Correct,
    /// Answer with a chunk id that never matches.
    Wrong,
    /// Never answer.
    Silent,
    /// Echo the chunk id after a pause.
    Delayed(Duration),
    /// Echo the chunk id twice.
    Duplicate,
}

/// Chunk id sent back in [`AckMode::Wrong`].
pub const WRONG_ACK: &str = "not-the-chunk-you-sent";

/// One decoded record.
#[derive(Clone, Debug)]
pub struct ReceivedRecord {
    pub tag: String,
    pub time: WireTime,
    pub record: serde_json::Value,
    pub chunk: Option<String>,
}

#[derive(Serialize)]
struct Ack<'a> {
    ack: &'a str,
}

/// Listener that records everything a sender writes to it.
pub struct FakeCollector {
    addr: Option<SocketAddr>,
    records: mpsc::Receiver<ReceivedRecord>,
    connections: Arc<AtomicUsize>,
}

impl FakeCollector {
    /// Listen on `127.0.0.1` with an ephemeral port.
    pub fn tcp(mode: AckMode) -> io::Result<Self> {
        Self::tcp_with_limit(mode, None)
    }

    /// Listen like [`tcp`](Self::tcp), closing each connection once it has
    /// delivered `records` records.
    pub fn tcp_closing_after(mode: AckMode, records: usize) -> io::Result<Self> {
        Self::tcp_with_limit(mode, Some(records))
    }

    fn tcp_with_limit(mode: AckMode, limit: Option<usize>) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let addr = listener.local_addr()?;
        let (tx, records) = mpsc::channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                accepted.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                thread::spawn(move || serve(stream, mode, limit, &tx));
            }
        });
        Ok(Self {
            addr: Some(addr),
            records,
            connections,
        })
    }

    /// Listen on the Unix socket at `path`.
    #[cfg(unix)]
    pub fn unix(path: impl AsRef<Path>, mode: AckMode) -> io::Result<Self> {
        let listener = UnixListener::bind(path)?;
        let (tx, records) = mpsc::channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                accepted.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                thread::spawn(move || serve(stream, mode, None, &tx));
            }
        });
        Ok(Self {
            addr: None,
            records,
            connections,
        })
    }

    /// TCP address of the listener, if it is a TCP collector.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// TCP port of the listener; `0` for Unix collectors.
    pub fn port(&self) -> u16 {
        self.addr.map_or(0, |addr| addr.port())
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for the next record.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ReceivedRecord> {
        self.records.recv_timeout(timeout).ok()
    }

    /// Collect `count` records, failing if any of them takes longer than
    /// `timeout` to arrive.
    pub fn recv_many(&self, count: usize, timeout: Duration) -> Option<Vec<ReceivedRecord>> {
        (0..count).map(|_| self.recv_timeout(timeout)).collect()
    }
}

fn serve<S: Read + Write>(
    stream: S,
    mode: AckMode,
    limit: Option<usize>,
    tx: &mpsc::Sender<ReceivedRecord>,
) {
    let mut reader = BufReader::new(stream);
    let mut served = 0;
    while let Ok(record) = read_record(&mut reader) {
        if let Some(chunk) = &record.chunk
            && respond(reader.get_mut(), mode, chunk).is_err()
        {
            return;
        }
        if tx.send(record).is_err() {
            return;
        }
        served += 1;
        if limit.is_some_and(|limit| served >= limit) {
            return;
        }
    }
}

fn respond<W: Write>(stream: &mut W, mode: AckMode, chunk: &str) -> io::Result<()> {
    let (ack, copies) = match mode {
        AckMode::Correct => (chunk, 1),
        AckMode::Wrong => (WRONG_ACK, 1),
        AckMode::Silent => return Ok(()),
        AckMode::Delayed(pause) => {
            thread::sleep(pause);
            (chunk, 1)
        }
        AckMode::Duplicate => (chunk, 2),
    };
    for _ in 0..copies {
        rmp_serde::encode::write_named(stream, &Ack { ack }).map_err(io::Error::other)?;
    }
    stream.flush()
}

/// Decode one `[tag, time, record, options?]` array.
pub fn read_record<R: BufRead>(reader: &mut R) -> io::Result<ReceivedRecord> {
    let len = rmp::decode::read_array_len(reader).map_err(|e| io::Error::other(e.to_string()))?;
    if !(3..=4).contains(&len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record array has {len} elements"),
        ));
    }
    let tag: String = rmp_serde::from_read(&mut *reader).map_err(io::Error::other)?;
    let time = read_time(reader)?;
    let record: serde_json::Value = rmp_serde::from_read(&mut *reader).map_err(io::Error::other)?;
    let chunk = if len == 4 {
        let mut options: BTreeMap<String, String> =
            rmp_serde::from_read(&mut *reader).map_err(io::Error::other)?;
        options.remove("chunk")
    } else {
        None
    };
    Ok(ReceivedRecord {
        tag,
        time,
        record,
        chunk,
    })
}

fn read_time<R: BufRead>(reader: &mut R) -> io::Result<WireTime> {
    if reader.fill_buf()?.first() != Some(&FIXEXT8) {
        let value: i64 = rmp_serde::from_read(&mut *reader).map_err(io::Error::other)?;
        return Ok(WireTime::Integer(value));
    }
    let mut ext = [0u8; 2 + EVENT_TIME_PACKED_LEN];
    reader.read_exact(&mut ext)?;
    if ext[1] as i8 != EVENT_TIME_EXT_TYPE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected ext type {}", ext[1] as i8),
        ));
    }
    let mut packed = [0u8; EVENT_TIME_PACKED_LEN];
    packed.copy_from_slice(&ext[2..]);
    Ok(WireTime::Event(EventTime::unpack(packed)))
}
