//! Worker thread driving the send queue.
//!
//! The worker owns the connection, the FIFO queue and the flush guard. Items
//! are written one at a time; with acknowledgements enabled the next item is
//! not written until the previous one was acknowledged or timed out.
//!
//! Once the sender starts closing it publishes a deadline. Past it the worker
//! writes nothing further, and an ack wait is cut short at the deadline.

use std::{
    collections::VecDeque,
    io::Write,
    sync::{Arc, OnceLock},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info, warn};

use crate::{
    error::ForwardError,
    events::EventHub,
    packet::PendingItem,
};

use super::{ack::AckOutcome, config::SenderConfig, connection::ConnectionManager};

/// Instant after which a closing worker stops writing.
pub type CloseDeadline = Arc<OnceLock<Instant>>;

/// Commands processed by the worker thread.
pub enum SenderCommand {
    Emit(PendingItem),
    /// Connect if needed, drain the queue, then acknowledge.
    Flush(Sender<()>),
    /// Arm the reconnect timer, or reconnect right away when `None`.
    Reconnect(Option<Duration>),
    Shutdown(Sender<()>),
}

impl std::fmt::Debug for SenderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderCommand::Emit(item) => f.debug_tuple("Emit").field(item).finish(),
            SenderCommand::Flush(_) => f.write_str("Flush"),
            SenderCommand::Reconnect(delay) => f.debug_tuple("Reconnect").field(delay).finish(),
            SenderCommand::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

pub fn spawn_worker(
    config: SenderConfig,
    events: Arc<EventHub>,
    close_deadline: CloseDeadline,
) -> std::io::Result<(Sender<SenderCommand>, thread::JoinHandle<()>)> {
    let (tx, rx) = unbounded();
    let handle = thread::Builder::new()
        .name("fluent-sender".into())
        .spawn(move || Worker::new(config, events, close_deadline).run(rx))?;
    Ok((tx, handle))
}

struct Worker {
    connection: ConnectionManager,
    queue: VecDeque<PendingItem>,
    flushing: bool,
    require_ack: bool,
    ack_timeout: Duration,
    reconnect_at: Option<Instant>,
    close_deadline: CloseDeadline,
    events: Arc<EventHub>,
}

impl Worker {
    fn new(config: SenderConfig, events: Arc<EventHub>, close_deadline: CloseDeadline) -> Self {
        Self {
            connection: ConnectionManager::new(
                config.transport,
                config.connect_timeout,
                config.write_timeout,
                Arc::clone(&events),
            ),
            queue: VecDeque::new(),
            flushing: false,
            require_ack: config.require_ack_response,
            ack_timeout: config.ack_response_timeout,
            reconnect_at: None,
            close_deadline,
            events,
        }
    }

    fn run(mut self, rx: Receiver<SenderCommand>) {
        loop {
            let command = match self.reconnect_at {
                Some(at) => match rx.recv_deadline(at) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        self.reconnect_at = None;
                        self.reconnect();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };
            match command {
                SenderCommand::Emit(item) => self.handle_emit(item),
                SenderCommand::Flush(ack) => {
                    self.connect_and_flush();
                    let _ = ack.send(());
                }
                SenderCommand::Reconnect(delay) => self.schedule_reconnect(delay),
                SenderCommand::Shutdown(ack) => {
                    self.shutdown(&rx);
                    let _ = ack.send(());
                    return;
                }
            }
        }
        self.shutdown(&rx);
    }

    fn handle_emit(&mut self, item: PendingItem) {
        self.queue.push_back(item);
        self.connect_and_flush();
    }

    /// Returns `false` when no connection could be made or the sender is
    /// past its close deadline.
    fn connect_and_flush(&mut self) -> bool {
        if self.past_close_deadline() || !self.connection.ensure_connected() {
            return false;
        }
        self.flush();
        true
    }

    fn past_close_deadline(&self) -> bool {
        self.close_deadline
            .get()
            .is_some_and(|deadline| Instant::now() >= *deadline)
    }

    /// Ack wait for the next item, and whether the close deadline shortened it.
    fn ack_wait(&self) -> (Duration, bool) {
        match self.close_deadline.get() {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left < self.ack_timeout {
                    (left, true)
                } else {
                    (self.ack_timeout, false)
                }
            }
            None => (self.ack_timeout, false),
        }
    }

    fn schedule_reconnect(&mut self, delay: Option<Duration>) {
        let at = Instant::now() + delay.unwrap_or_default();
        self.reconnect_at = Some(match self.reconnect_at {
            Some(pending) => pending.min(at),
            None => at,
        });
    }

    fn reconnect(&mut self) {
        info!("fluent sender is reconnecting...");
        self.flushing = false;
        if self.connect_and_flush() {
            info!("fluent sender reconnection finished");
        }
    }

    /// Drain the queue onto the connection, one item at a time.
    fn flush(&mut self) {
        if self.flushing {
            return;
        }
        self.flushing = true;
        while self.flush_next() {}
        self.flushing = false;
    }

    /// Send the head of the queue. Returns `false` when the pass should stop.
    fn flush_next(&mut self) -> bool {
        if self.queue.is_empty() || !self.connection.is_connected() || self.past_close_deadline()
        {
            return false;
        }
        // Half-closed or errored sockets are replaced before the write.
        if !self.connection.ensure_connected() {
            return false;
        }
        let Some(item) = self.queue.pop_front() else {
            return false;
        };
        self.send_item(item)
    }

    fn send_item(&mut self, item: PendingItem) -> bool {
        let written = match self.connection.connection_mut() {
            Some(conn) => conn.write_all(&item.packet.bytes).and_then(|()| conn.flush()),
            None => {
                self.queue.push_front(item);
                return false;
            }
        };
        if let Err(err) = written {
            warn!("fluent sender write failed for {}: {err}", item.packet.tag);
            self.connection.discard();
            self.events
                .dispatch_error(ForwardError::from(err), item.callback);
            return false;
        }
        if !self.require_ack {
            item.complete(Ok(()));
            return true;
        }
        let expected = item.packet.options.chunk.clone().unwrap_or_default();
        let (wait, cut_short) = self.ack_wait();
        match self.connection.await_ack(wait) {
            AckOutcome::Received(response) if response.ack.as_deref() == Some(expected.as_str()) => {
                item.complete(Ok(()));
                true
            }
            AckOutcome::Received(response) => {
                let err = ForwardError::Response {
                    expected,
                    actual: response.ack,
                };
                warn!("fluent sender received mismatched ack: {err}");
                self.events.dispatch_error(err, item.callback);
                true
            }
            AckOutcome::Malformed(reason) => {
                warn!("fluent sender could not decode ack response: {reason}");
                let err = ForwardError::Response {
                    expected,
                    actual: None,
                };
                self.events.dispatch_error(err, item.callback);
                true
            }
            AckOutcome::TimedOut if cut_short => {
                debug!("fluent sender stopped waiting for {} ack at close", item.packet.tag);
                item.complete(Err(ForwardError::Closed));
                false
            }
            AckOutcome::TimedOut => {
                // The unread response, if it ever arrives, stays buffered and
                // is consumed by the next item's wait.
                warn!(
                    "fluent sender ack for {} timed out after {:?}",
                    item.packet.tag, self.ack_timeout
                );
                self.events
                    .dispatch_error(ForwardError::ResponseTimeout(self.ack_timeout), item.callback);
                true
            }
            AckOutcome::Failed(err) => {
                warn!("fluent sender lost connection awaiting ack: {err}");
                self.connection.discard();
                self.events
                    .dispatch_error(ForwardError::from(err), item.callback);
                false
            }
        }
    }

    /// Deliver what can still be delivered before the close deadline, then
    /// close the connection.
    fn shutdown(&mut self, rx: &Receiver<SenderCommand>) {
        while let Ok(command) = rx.try_recv() {
            match command {
                SenderCommand::Emit(item) => self.queue.push_back(item),
                SenderCommand::Flush(ack) | SenderCommand::Shutdown(ack) => {
                    let _ = ack.send(());
                }
                SenderCommand::Reconnect(_) => {}
            }
        }
        if !self.queue.is_empty() {
            self.connect_and_flush();
        }
        let unsent = self.queue.len();
        if unsent > 0 {
            warn!("fluent sender closing with {unsent} undelivered events");
        }
        for item in self.queue.drain(..) {
            item.complete(Err(ForwardError::Closed));
        }
        self.connection.close();
        debug!("fluent sender worker stopped");
    }
}
