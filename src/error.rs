//! Error types shared by the sender, the packet encoder and the builders.

use std::{io, sync::Arc, time::Duration};

use thiserror::Error;

/// Failure reported for a submitted event.
///
/// Validation failures (`MissingTag`, `DataType`) are detected before an event
/// is queued. Everything else is detected by the worker thread and delivered
/// through the event's completion callback and the `error` subscribers.
#[derive(Clone, Debug, Error)]
pub enum ForwardError {
    /// Neither a tag prefix nor a label was available.
    #[error("tag is missing: configure a tag prefix or pass a label")]
    MissingTag,
    /// The payload did not encode to a map or an array.
    #[error("data must be a map or an array, got {found}")]
    DataType { found: &'static str },
    /// The collector acknowledged a different chunk than the one sent.
    #[error("ack in response ({actual:?}) and chunk id in sent data ({expected}) are different")]
    Response {
        expected: String,
        actual: Option<String>,
    },
    /// No acknowledgement arrived within the configured window.
    #[error("ack response timeout after {0:?}")]
    ResponseTimeout(Duration),
    /// Connection-level failure, passed through unchanged.
    #[error(transparent)]
    Transport(Arc<io::Error>),
    /// The record could not be serialised.
    #[error("failed to encode event: {0}")]
    Encode(String),
    /// The sender was closed before the event could be delivered.
    #[error("sender is closed")]
    Closed,
}

impl From<io::Error> for ForwardError {
    fn from(err: io::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}

/// Errors raised while constructing a sender or one of its adapters.
#[derive(Debug, Error)]
pub enum SenderBuildError {
    /// Invalid user supplied configuration.
    #[error("invalid sender configuration: {0}")]
    InvalidConfig(String),
    /// Underlying I/O error whilst creating the sender.
    #[error(transparent)]
    Io(#[from] io::Error),
}
