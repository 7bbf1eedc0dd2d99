//! Ownership of the single outbound connection.
//!
//! The manager moves between three implicit states: no socket, connecting
//! (inside [`ConnectionManager::ensure_connected`]) and connected. Any transport
//! failure drops the socket and raises an `error` event; retrying is left to
//! the caller or to the reconnect supervisor.
//!
//! Inbound acknowledgement bytes belong to the socket they arrived on, so the
//! manager also owns the [`AckReader`] and clears it whenever a new socket is
//! opened.

use std::{io, sync::Arc, time::Duration};

use log::{debug, warn};

use crate::{error::ForwardError, events::EventHub};

use super::{
    ack::{AckOutcome, AckReader},
    transport::{ActiveConnection, SocketTransport, connect_transport},
};

pub struct ConnectionManager {
    transport: SocketTransport,
    connect_timeout: Duration,
    write_timeout: Duration,
    connection: Option<ActiveConnection>,
    acks: AckReader,
    events: Arc<EventHub>,
}

impl ConnectionManager {
    pub fn new(
        transport: SocketTransport,
        connect_timeout: Duration,
        write_timeout: Duration,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            transport,
            connect_timeout,
            write_timeout,
            connection: None,
            acks: AckReader::new(),
            events,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection_mut(&mut self) -> Option<&mut ActiveConnection> {
        self.connection.as_mut()
    }

    /// Make sure a writable connection exists. Returns `true` when ready.
    ///
    /// A connection with a pending socket error, or one the collector has
    /// closed, is discarded and replaced. A failed connect raises an `error`
    /// event and leaves the manager unconnected.
    pub fn ensure_connected(&mut self) -> bool {
        if let Some(conn) = self.connection.as_mut() {
            match check_writable(conn, &mut self.acks) {
                Ok(()) => return true,
                Err(err) => {
                    debug!(
                        "fluent sender discarding unwritable connection to {}: {err}",
                        self.transport
                    );
                    self.connection = None;
                }
            }
        }
        match self.open() {
            Ok(conn) => {
                debug!("fluent sender connected to {}", self.transport);
                self.connection = Some(conn);
                self.acks.reset();
                self.events.emit_connect();
                true
            }
            Err(err) => {
                warn!("fluent sender failed to connect to {}: {err}", self.transport);
                self.events.dispatch_error(ForwardError::from(err), None);
                false
            }
        }
    }

    fn open(&self) -> io::Result<ActiveConnection> {
        let conn = connect_transport(&self.transport, self.connect_timeout)?;
        conn.set_write_timeout(self.write_timeout)?;
        Ok(conn)
    }

    /// Wait up to `timeout` for the next acknowledgement on the live socket.
    pub fn await_ack(&mut self, timeout: Duration) -> AckOutcome {
        match self.connection.as_mut() {
            Some(conn) => self.acks.await_on(conn, timeout),
            None => AckOutcome::Failed(io::Error::new(
                io::ErrorKind::NotConnected,
                "no connection to await an ack on",
            )),
        }
    }

    /// Drop the connection after a transport failure without raising events.
    ///
    /// Callers report the failure themselves so the item's callback can be
    /// delivered together with the broadcast.
    pub fn discard(&mut self) {
        self.connection = None;
    }

    /// Shut the connection down gracefully. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut conn) = self.connection.take()
            && let Err(err) = conn.shutdown()
        {
            debug!("fluent sender shutdown of {} failed: {err}", self.transport);
        }
    }
}

/// A socket is writable while it has no pending error and has not seen end
/// of stream. Bytes already received are kept for the next ack wait.
fn check_writable(conn: &mut ActiveConnection, acks: &mut AckReader) -> io::Result<()> {
    if let Some(err) = conn.take_error()? {
        return Err(err);
    }
    acks.poll_on(conn)
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.transport)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}
