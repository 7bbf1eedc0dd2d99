//! Configuration structures consumed by the sender and its worker.
//!
//! `FluentSenderBuilder` constructs these values before passing them to
//! [`FluentSender`](super::FluentSender). [`SenderOptions`] mirrors the option
//! names used by other forward-protocol clients so configuration can be loaded
//! with serde.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{packet::TimeResolution, rate_limited_warner::DEFAULT_WARN_INTERVAL};

use super::{
    builder::FluentSenderBuilder,
    transport::{SocketTransport, TcpTransport},
};

/// Default collector host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default collector port.
pub const DEFAULT_PORT: u16 = 24224;
/// Default connection timeout applied when establishing sockets.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default write timeout applied to socket writes.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
/// Default delay before the reconnect supervisor retries after an error.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(600_000);
/// Default window for the collector to acknowledge a record.
pub const DEFAULT_ACK_RESPONSE_TIMEOUT: Duration = Duration::from_millis(190_000);
/// Default time `flush` and `close` wait for the worker.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime configuration of a [`FluentSender`](super::FluentSender).
#[derive(Clone, Debug)]
pub struct SenderConfig {
    pub tag_prefix: Option<String>,
    pub transport: SocketTransport,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    /// `None` disables the reconnect supervisor.
    pub reconnect_interval: Option<Duration>,
    pub require_ack_response: bool,
    pub ack_response_timeout: Duration,
    pub time_resolution: TimeResolution,
    pub flush_timeout: Duration,
    pub warn_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            tag_prefix: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            transport: SocketTransport::Tcp(TcpTransport {
                host: DEFAULT_HOST.into(),
                port: DEFAULT_PORT,
                tls: None,
            }),
            reconnect_interval: Some(DEFAULT_RECONNECT_INTERVAL),
            require_ack_response: false,
            ack_response_timeout: DEFAULT_ACK_RESPONSE_TIMEOUT,
            time_resolution: TimeResolution::Seconds,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }
}

impl SenderConfig {
    /// Override the transport configuration.
    pub fn with_transport(mut self, transport: SocketTransport) -> Self {
        self.transport = transport;
        self
    }
}

/// Serde view of the sender options.
///
/// `timeout` is expressed in seconds; `reconnectInterval` and
/// `ackResponseTimeout` in milliseconds. A `reconnectInterval` of `0` disables
/// automatic reconnection.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SenderOptions {
    pub tag_prefix: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<PathBuf>,
    pub timeout: Option<f64>,
    pub reconnect_interval: Option<u64>,
    pub require_ack_response: bool,
    pub ack_response_timeout: Option<u64>,
    pub milliseconds: bool,
    pub tls: bool,
    pub tls_domain: Option<String>,
    pub tls_insecure: bool,
}

impl SenderOptions {
    /// Translate the options into a builder.
    pub fn into_builder(self) -> FluentSenderBuilder {
        let mut builder = FluentSenderBuilder::new()
            .with_require_ack_response(self.require_ack_response)
            .with_milliseconds(self.milliseconds);
        if let Some(prefix) = self.tag_prefix {
            builder = builder.with_tag_prefix(prefix);
        }
        if let Some(host) = self.host {
            builder = builder.with_host(host);
        }
        if let Some(port) = self.port {
            builder = builder.with_port(port);
        }
        if let Some(path) = self.path {
            builder = builder.with_unix_path(path);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.with_connect_timeout_secs(timeout);
        }
        if let Some(interval) = self.reconnect_interval {
            builder = builder.with_reconnect_interval_ms(interval);
        }
        if let Some(timeout) = self.ack_response_timeout {
            builder = builder.with_ack_response_timeout_ms(timeout);
        }
        if self.tls {
            builder = builder.with_tls(self.tls_domain, self.tls_insecure);
        }
        builder
    }
}
