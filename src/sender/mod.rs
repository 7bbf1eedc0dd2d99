//! Forward-protocol sender.
//!
//! This module defines [`FluentSender`], which encodes events into MessagePack
//! `[tag, time, record, options?]` arrays and writes them to a collector over
//! TCP (optionally TLS) or a Unix socket. A dedicated worker thread owns the
//! connection, keeps undelivered events in submission order, optionally waits
//! for per-record acknowledgements and re-arms connection attempts after
//! failures.

mod ack;
mod builder;
mod config;
mod connection;
mod handle;
mod transport;
mod worker;


pub use ack::AckResponse;
pub use builder::FluentSenderBuilder;
pub use config::{
    DEFAULT_ACK_RESPONSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_FLUSH_TIMEOUT, DEFAULT_HOST,
    DEFAULT_PORT, DEFAULT_RECONNECT_INTERVAL, DEFAULT_WRITE_TIMEOUT, SenderConfig, SenderOptions,
};
pub use handle::FluentSender;
pub use transport::{SocketTransport, TcpTransport, TlsOptions, UnixTransport};
