//! Acknowledgement responses from the collector.
//!
//! Inbound bytes are buffered across reads and decoded one MessagePack value at
//! a time. Unconsumed responses stay buffered, so an acknowledgement that
//! arrives after its record timed out is read by the next wait instead.

use std::{
    io::{self, Cursor, Read},
    time::{Duration, Instant},
};

use serde::Deserialize;

use super::transport::ActiveConnection;

const READ_CHUNK: usize = 4096;

/// Response map sent by the collector.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct AckResponse {
    #[serde(default)]
    pub ack: Option<String>,
}

/// Outcome of waiting for one acknowledgement.
#[derive(Debug)]
pub enum AckOutcome {
    /// A response was decoded.
    Received(AckResponse),
    /// Bytes arrived but did not form a response map.
    Malformed(String),
    /// The deadline passed first.
    TimedOut,
    /// The connection failed or was closed by the collector.
    Failed(io::Error),
}

/// Buffers partial responses between waits.
#[derive(Debug, Default)]
pub struct AckReader {
    buf: Vec<u8>,
}

impl AckReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget buffered bytes, used when the connection is replaced.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Block until a response is decoded or `timeout` elapses.
    pub fn await_response<R: Read + ?Sized>(
        &mut self,
        conn: &mut R,
        timeout: Duration,
        set_timeout: impl Fn(&R, Duration) -> io::Result<()>,
    ) -> AckOutcome {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(outcome) = self.take_response() {
                return outcome;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return AckOutcome::TimedOut;
            }
            if let Err(err) = set_timeout(&*conn, remaining) {
                return AckOutcome::Failed(err);
            }
            match conn.read(&mut chunk) {
                Ok(0) => {
                    return AckOutcome::Failed(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "collector closed the connection while an ack was pending",
                    ));
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) => return AckOutcome::Failed(err),
            }
        }
    }

    /// Wait on a live connection using its socket read timeout.
    pub fn await_on(&mut self, conn: &mut ActiveConnection, timeout: Duration) -> AckOutcome {
        self.await_response(conn, timeout, ActiveConnection::set_read_timeout)
    }

    /// Buffer whatever the collector already sent without blocking.
    ///
    /// Fails with `UnexpectedEof` once the collector has closed its side.
    pub fn poll_on(&mut self, conn: &mut ActiveConnection) -> io::Result<()> {
        conn.set_nonblocking(true)?;
        let polled = self.read_available(conn);
        conn.set_nonblocking(false)?;
        polled
    }

    /// Read until the source would block. The reader must be non-blocking.
    pub fn read_available<R: Read + ?Sized>(&mut self, conn: &mut R) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match conn.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "collector closed the connection",
                    ));
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn take_response(&mut self) -> Option<AckOutcome> {
        if self.buf.is_empty() {
            return None;
        }
        let mut cursor = Cursor::new(self.buf.as_slice());
        let decoded = AckResponse::deserialize(&mut rmp_serde::Deserializer::new(&mut cursor));
        match decoded {
            Ok(response) => {
                let used = cursor.position() as usize;
                self.buf.drain(..used);
                Some(AckOutcome::Received(response))
            }
            Err(err) if is_incomplete(&err) => None,
            Err(err) => {
                self.buf.clear();
                Some(AckOutcome::Malformed(err.to_string()))
            }
        }
    }
}

fn is_incomplete(err: &rmp_serde::decode::Error) -> bool {
    use rmp_serde::decode::Error;
    match err {
        Error::InvalidMarkerRead(e) | Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}
