//! Line-oriented `Write` adapter over a [`FluentSender`].
//!
//! Bytes written to an [`EventStream`] are buffered until a newline; each
//! complete, non-empty line is submitted as `{"message": line}` under the
//! stream's label.

use std::io::{self, Write};

use serde::Serialize;

use crate::{error::SenderBuildError, sender::FluentSender};

#[derive(Serialize)]
struct LineEvent<'a> {
    message: &'a str,
}

/// Writer that submits one event per line.
pub struct EventStream<'a> {
    sender: &'a FluentSender,
    label: String,
    buf: Vec<u8>,
}

impl<'a> EventStream<'a> {
    pub(crate) fn new(sender: &'a FluentSender, label: &str) -> Result<Self, SenderBuildError> {
        if label.trim().is_empty() {
            return Err(SenderBuildError::InvalidConfig(
                "event stream requires a label".into(),
            ));
        }
        Ok(Self {
            sender,
            label: label.to_owned(),
            buf: Vec::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Submit any trailing partial line and release the sender.
    pub fn finish(mut self) -> io::Result<()> {
        let rest = std::mem::take(&mut self.buf);
        self.submit_line(&rest)
    }

    fn submit_line(&self, raw: &[u8]) -> io::Result<()> {
        let decoded = String::from_utf8_lossy(raw);
        let line = decoded.strip_suffix('\r').unwrap_or(&decoded);
        if line.is_empty() {
            return Ok(());
        }
        self.sender
            .emit(Some(&self.label), &LineEvent { message: line })
            .map_err(io::Error::other)
    }
}

impl Write for EventStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.submit_line(&line[..pos])?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for EventStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("label", &self.label)
            .field("buffered", &self.buf.len())
            .finish()
    }
}
