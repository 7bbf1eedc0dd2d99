//! Client for the Fluentd forward protocol.
//!
//! Events are serialised as MessagePack `[tag, time, record]` arrays and sent
//! to a collector over TCP, TLS or a Unix domain socket. Time values may be
//! integer epochs or the nanosecond-precision [`EventTime`] extension type.
//! Optional per-record acknowledgements, automatic reconnection and a bridge
//! for the `log` crate are provided.
//!
//! ```no_run
//! use fluent_forward::FluentSender;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sender = FluentSender::builder()
//!     .with_tag_prefix("app")
//!     .with_tcp("127.0.0.1", 24224)
//!     .build()?;
//! sender.emit(Some("started"), &json!({"pid": std::process::id()}))?;
//! sender.close();
//! # Ok(())
//! # }
//! ```

mod error;
mod event_time;
mod events;
#[cfg(feature = "log-compat")]
mod log_compat;
mod packet;
mod rate_limited_warner;
mod sender;
mod stream;

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;

pub use error::{ForwardError, SenderBuildError};
pub use event_time::{EVENT_TIME_EXT_TYPE, EventTime};
pub use events::{Completion, EventHub, SenderEvent, SubscriptionId};
#[cfg(feature = "log-compat")]
pub use log_compat::{FluentLogAdapter, install_log_adapter};
pub use packet::{
    Packet, PacketEncoder, PacketOptions, PendingItem, TimeResolution, Timestamp, WireTime,
    generate_chunk_id,
};
pub use rate_limited_warner::{DEFAULT_WARN_INTERVAL, RateLimitedWarner};
pub use sender::{
    AckResponse, DEFAULT_ACK_RESPONSE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_FLUSH_TIMEOUT,
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_RECONNECT_INTERVAL, DEFAULT_WRITE_TIMEOUT, FluentSender,
    FluentSenderBuilder, SenderConfig, SenderOptions, SocketTransport, TcpTransport, TlsOptions,
    UnixTransport,
};
pub use stream::EventStream;
