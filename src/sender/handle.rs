//! Public sender type exported by the crate.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use log::{error, info};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    error::{ForwardError, SenderBuildError},
    events::{Completion, EventHub, SubscriptionId},
    packet::{PacketEncoder, Timestamp},
    rate_limited_warner::RateLimitedWarner,
    stream::EventStream,
};

use super::{
    builder::FluentSenderBuilder,
    config::SenderConfig,
    worker::{CloseDeadline, SenderCommand, spawn_worker},
};

/// Client forwarding events to a collector.
///
/// Submission validates and encodes the event on the calling thread, then
/// hands it to a dedicated worker that owns the connection and writes events
/// in submission order.
pub struct FluentSender {
    tx: Option<Sender<SenderCommand>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    encoder: PacketEncoder,
    events: Arc<EventHub>,
    warner: RateLimitedWarner,
    flush_timeout: Duration,
    close_deadline: CloseDeadline,
}

impl FluentSender {
    /// Start building a sender.
    pub fn builder() -> FluentSenderBuilder {
        FluentSenderBuilder::new()
    }

    /// Construct the sender from a configuration object and start its worker.
    pub fn with_config(config: SenderConfig) -> Result<Self, SenderBuildError> {
        let encoder = PacketEncoder::new(
            config.tag_prefix.clone(),
            config.time_resolution,
            config.require_ack_response,
        );
        let events = Arc::new(EventHub::new());
        let warner = RateLimitedWarner::new(config.warn_interval);
        let flush_timeout = config.flush_timeout;
        let reconnect_interval = config.reconnect_interval;
        let close_deadline = CloseDeadline::default();
        let (tx, handle) = spawn_worker(config, Arc::clone(&events), Arc::clone(&close_deadline))?;
        if let Some(interval) = reconnect_interval {
            install_reconnect_supervisor(&events, tx.clone(), interval);
        }
        Ok(Self {
            tx: Some(tx),
            handle: Mutex::new(Some(handle)),
            encoder,
            events,
            warner,
            flush_timeout,
            close_deadline,
        })
    }

    /// Submit `data` under `label`, timestamped now.
    pub fn emit<T: Serialize + ?Sized>(
        &self,
        label: Option<&str>,
        data: &T,
    ) -> Result<(), ForwardError> {
        self.submit(label, data, None, None)
    }

    /// Submit `data` under `label` with an explicit time.
    pub fn emit_at<T: Serialize + ?Sized>(
        &self,
        label: Option<&str>,
        data: &T,
        time: impl Into<Timestamp>,
    ) -> Result<(), ForwardError> {
        self.submit(label, data, Some(time.into()), None)
    }

    /// Submit an event and receive its outcome through `callback`.
    ///
    /// The callback fires exactly once: with `Ok(())` once the event was
    /// written (and acknowledged, when acknowledgements are required), or with
    /// the error that stopped it.
    pub fn emit_with<T, F>(
        &self,
        label: Option<&str>,
        data: &T,
        time: Option<Timestamp>,
        callback: F,
    ) -> Result<(), ForwardError>
    where
        T: Serialize + ?Sized,
        F: FnOnce(Result<(), ForwardError>) + Send + 'static,
    {
        self.submit(label, data, time, Some(Box::new(callback)))
    }

    /// Validate, encode and enqueue one event.
    ///
    /// A validation failure is reported to the callback and the `error`
    /// subscribers and is also returned, so callers without a callback can
    /// react to it directly.
    fn submit<T: Serialize + ?Sized>(
        &self,
        label: Option<&str>,
        data: &T,
        time: Option<Timestamp>,
        callback: Option<Completion>,
    ) -> Result<(), ForwardError> {
        let Some(tx) = self.tx.as_ref() else {
            self.warner.record_drop();
            self.warner.warn_if_due(|count| {
                log::warn!("FluentSender dropped {count} events after close");
            });
            if let Some(callback) = callback {
                callback(Err(ForwardError::Closed));
            }
            return Err(ForwardError::Closed);
        };
        let item = match self.encoder.make_packet_item(label, data, time, callback) {
            Ok(item) => item,
            Err((err, callback)) => {
                self.events.dispatch_error(err.clone(), callback);
                return Err(err);
            }
        };
        if let Err(failed) = tx.send(SenderCommand::Emit(item)) {
            if let SenderCommand::Emit(item) = failed.into_inner() {
                item.complete(Err(ForwardError::Closed));
            }
            return Err(ForwardError::Closed);
        }
        Ok(())
    }

    /// Connect if needed and drain queued events.
    ///
    /// Returns `true` when the worker finished the pass within the flush
    /// timeout. Events that failed are reported through their callbacks, not
    /// through the return value.
    pub fn flush(&self) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        self.warner.flush(|count| {
            log::warn!("FluentSender dropped {count} events in the last interval");
        });
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if tx.send(SenderCommand::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(self.flush_timeout).is_ok()
    }

    /// Attempt to reconnect and flush immediately.
    pub fn reconnect(&self) {
        if let Some(tx) = self.tx.as_ref() {
            let _ = tx.send(SenderCommand::Reconnect(None));
        }
    }

    /// Close the sender without sending anything further.
    ///
    /// Queued events are still written if a connection is available and the
    /// flush timeout has not passed; any that cannot be delivered fail with
    /// [`ForwardError::Closed`]. Returns within the flush timeout. A worker
    /// still busy at that point is detached and stops on its own.
    pub fn close(&mut self) {
        if self.request_shutdown() {
            self.join_worker();
        } else {
            self.detach_worker();
        }
    }

    /// Send a final event, then close.
    pub fn close_with<T: Serialize + ?Sized>(
        &mut self,
        label: Option<&str>,
        data: &T,
    ) -> Result<(), ForwardError> {
        let result = self.emit(label, data);
        self.close();
        result
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Adapter turning written lines into events under `label`.
    pub fn to_stream(&self, label: &str) -> Result<EventStream<'_>, SenderBuildError> {
        EventStream::new(self, label)
    }

    /// Listener registry for `connect` and `error` events.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn on_connect(&self, listener: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.events.on_connect(listener)
    }

    pub fn on_error(
        &self,
        listener: impl Fn(&ForwardError) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.on_error(listener)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    /// Returns `true` once the worker has finished, or was already gone.
    fn request_shutdown(&mut self) -> bool {
        let Some(tx) = self.tx.take() else {
            return true;
        };
        let deadline = Instant::now() + self.flush_timeout;
        let deadline = *self.close_deadline.get_or_init(|| deadline);
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if tx.send(SenderCommand::Shutdown(ack_tx)).is_err() {
            return true;
        }
        ack_rx.recv_deadline(deadline).is_ok()
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            log::warn!("FluentSender: worker thread panicked");
        }
    }

    fn detach_worker(&mut self) {
        if self.handle.lock().take().is_some() {
            log::warn!(
                "FluentSender: worker did not stop within {:?}; detaching it",
                self.flush_timeout
            );
        }
    }
}

/// Re-arm a connection attempt `interval` after every error.
fn install_reconnect_supervisor(
    events: &EventHub,
    tx: Sender<SenderCommand>,
    interval: Duration,
) {
    events.on_error(move |err| {
        error!("fluent sender error: {err}");
        info!(
            "fluent sender will reconnect after {} ms",
            interval.as_millis()
        );
        let _ = tx.send(SenderCommand::Reconnect(Some(interval)));
    });
}

impl Drop for FluentSender {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FluentSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluentSender")
            .field("encoder", &self.encoder)
            .field("closed", &self.is_closed())
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}
