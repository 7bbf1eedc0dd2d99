//! Forward-protocol record encoding.
//!
//! A record is a MessagePack array `[tag, time, data]`, extended with a fourth
//! `{"chunk": id}` options map when the collector must acknowledge it. The
//! payload is serialised on its own first so that its outer MessagePack marker
//! can be checked: only maps and arrays are accepted as event data.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use rmp::Marker;
use serde::Serialize;

use crate::{error::ForwardError, event_time::EventTime, events::Completion};

/// Random bytes behind each chunk identifier.
const CHUNK_ID_LEN: usize = 16;

/// Time supplied with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timestamp {
    /// Integer epoch value, sent unchanged.
    Epoch(i64),
    /// Nanosecond-precision time, sent as the extension type.
    Event(EventTime),
    /// Calendar date, converted using the configured resolution.
    At(DateTime<Utc>),
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Timestamp::Epoch(value)
    }
}

impl From<EventTime> for Timestamp {
    fn from(value: EventTime) -> Self {
        Timestamp::Event(value)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Timestamp::At(value)
    }
}

/// Unit used when deriving an integer time from a calendar date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeResolution {
    #[default]
    Seconds,
    Milliseconds,
}

/// Time value as it appears on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WireTime {
    Integer(i64),
    Event(EventTime),
}

impl fmt::Display for WireTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireTime::Integer(value) => write!(f, "{value}"),
            WireTime::Event(time) => write!(f, "{time}"),
        }
    }
}

/// Options map appended to records that request an acknowledgement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketOptions {
    pub chunk: Option<String>,
}

/// A fully encoded record.
#[derive(Clone, Debug)]
pub struct Packet {
    pub tag: String,
    pub time: WireTime,
    pub options: PacketOptions,
    pub bytes: Vec<u8>,
}

/// A queued record together with its completion handle.
pub struct PendingItem {
    pub(crate) packet: Packet,
    pub(crate) callback: Option<Completion>,
}

impl PendingItem {
    pub fn new(packet: Packet, callback: Option<Completion>) -> Self {
        Self { packet, callback }
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// Fire the callback with `result`, consuming the item.
    pub(crate) fn complete(self, result: Result<(), ForwardError>) {
        if let Some(callback) = self.callback {
            callback(result);
        }
    }
}

impl fmt::Debug for PendingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingItem")
            .field("packet", &self.packet)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Builds records for one sender configuration.
#[derive(Clone, Debug, Default)]
pub struct PacketEncoder {
    tag_prefix: Option<String>,
    resolution: TimeResolution,
    require_ack: bool,
}

impl PacketEncoder {
    pub fn new(tag_prefix: Option<String>, resolution: TimeResolution, require_ack: bool) -> Self {
        Self {
            tag_prefix: tag_prefix.filter(|p| !p.is_empty()),
            resolution,
            require_ack,
        }
    }

    /// Combine the tag prefix and `label` into a routable tag.
    pub fn resolve_tag(&self, label: Option<&str>) -> Result<String, ForwardError> {
        let label = label.filter(|l| !l.is_empty());
        match (self.tag_prefix.as_deref(), label) {
            (Some(prefix), Some(label)) => Ok(format!("{prefix}.{label}")),
            (Some(prefix), None) => Ok(prefix.to_owned()),
            (None, Some(label)) => Ok(label.to_owned()),
            (None, None) => Err(ForwardError::MissingTag),
        }
    }

    /// Resolve the wire time, defaulting to the current time.
    pub fn resolve_time(&self, time: Option<Timestamp>) -> WireTime {
        match time {
            Some(Timestamp::Epoch(value)) => WireTime::Integer(value),
            Some(Timestamp::Event(time)) => WireTime::Event(time),
            Some(Timestamp::At(date)) => WireTime::Integer(self.date_to_epoch(&date)),
            None => WireTime::Integer(self.date_to_epoch(&Utc::now())),
        }
    }

    fn date_to_epoch(&self, date: &DateTime<Utc>) -> i64 {
        let millis = date.timestamp_millis();
        match self.resolution {
            TimeResolution::Milliseconds => millis,
            TimeResolution::Seconds => millis.div_euclid(1000),
        }
    }

    /// Validate and encode one record.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        label: Option<&str>,
        data: &T,
        time: Option<Timestamp>,
    ) -> Result<Packet, ForwardError> {
        let tag = self.resolve_tag(label)?;
        let time = self.resolve_time(time);
        let payload = encode_payload(data)?;
        let options = PacketOptions {
            chunk: self.require_ack.then(generate_chunk_id),
        };
        let bytes = assemble(&tag, &time, &payload, &options)?;
        Ok(Packet {
            tag,
            time,
            options,
            bytes,
        })
    }

    /// Validate and encode one record, pairing it with `callback`.
    pub fn make_packet_item<T: Serialize + ?Sized>(
        &self,
        label: Option<&str>,
        data: &T,
        time: Option<Timestamp>,
        callback: Option<Completion>,
    ) -> Result<PendingItem, (ForwardError, Option<Completion>)> {
        match self.encode(label, data, time) {
            Ok(packet) => Ok(PendingItem::new(packet, callback)),
            Err(err) => Err((err, callback)),
        }
    }
}

/// Serialise the payload, rejecting anything that is not a map or array.
fn encode_payload<T: Serialize + ?Sized>(data: &T) -> Result<Vec<u8>, ForwardError> {
    let payload = rmp_serde::to_vec_named(data).map_err(|e| ForwardError::Encode(e.to_string()))?;
    let marker = payload
        .first()
        .map(|byte| Marker::from_u8(*byte))
        .ok_or_else(|| ForwardError::Encode("payload serialised to nothing".into()))?;
    match marker {
        Marker::FixMap(_)
        | Marker::Map16
        | Marker::Map32
        | Marker::FixArray(_)
        | Marker::Array16
        | Marker::Array32 => Ok(payload),
        other => Err(ForwardError::DataType {
            found: describe_marker(other),
        }),
    }
}

fn describe_marker(marker: Marker) -> &'static str {
    match marker {
        Marker::Null => "null",
        Marker::True | Marker::False => "boolean",
        Marker::FixPos(_)
        | Marker::FixNeg(_)
        | Marker::U8
        | Marker::U16
        | Marker::U32
        | Marker::U64
        | Marker::I8
        | Marker::I16
        | Marker::I32
        | Marker::I64 => "integer",
        Marker::F32 | Marker::F64 => "float",
        Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => "string",
        Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => "binary",
        Marker::FixExt1
        | Marker::FixExt2
        | Marker::FixExt4
        | Marker::FixExt8
        | Marker::FixExt16
        | Marker::Ext8
        | Marker::Ext16
        | Marker::Ext32 => "extension",
        _ => "unknown",
    }
}

fn assemble(
    tag: &str,
    time: &WireTime,
    payload: &[u8],
    options: &PacketOptions,
) -> Result<Vec<u8>, ForwardError> {
    let encode_err = |e: rmp::encode::ValueWriteError| ForwardError::Encode(e.to_string());
    let mut buf = Vec::with_capacity(payload.len() + tag.len() + 64);
    let len = if options.chunk.is_some() { 4 } else { 3 };
    rmp::encode::write_array_len(&mut buf, len).map_err(encode_err)?;
    rmp::encode::write_str(&mut buf, tag).map_err(encode_err)?;
    time.serialize(&mut rmp_serde::Serializer::new(&mut buf))
        .map_err(|e| ForwardError::Encode(e.to_string()))?;
    buf.extend_from_slice(payload);
    if let Some(chunk) = &options.chunk {
        rmp::encode::write_map_len(&mut buf, 1).map_err(encode_err)?;
        rmp::encode::write_str(&mut buf, "chunk").map_err(encode_err)?;
        rmp::encode::write_str(&mut buf, chunk).map_err(encode_err)?;
    }
    Ok(buf)
}

/// Base64 of 16 bytes drawn from the operating system RNG.
pub fn generate_chunk_id() -> String {
    let mut raw = [0u8; CHUNK_ID_LEN];
    OsRng.fill_bytes(&mut raw);
    BASE64_STANDARD.encode(raw)
}

#[cfg(test)]
mod tests;
