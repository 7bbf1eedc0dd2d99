//! Sub-second event timestamps carried as a MessagePack extension type.
//!
//! `EventTime` is encoded as extension type `0` with an 8 byte payload: a
//! big-endian `u32` of seconds since the Unix epoch followed by a big-endian
//! `u32` of nanoseconds. The [`Serialize`] and [`Deserialize`] impls go through
//! `rmp-serde`'s extension hook, so an `EventTime` nested anywhere inside an
//! event payload round-trips without further registration.

use std::fmt;

use chrono::{DateTime, Utc};
use rmp_serde::MSGPACK_EXT_STRUCT_NAME;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, SeqAccess, Visitor},
};

/// Extension type identifier reserved for event times.
pub const EVENT_TIME_EXT_TYPE: i8 = 0;
/// Size in bytes of the packed extension payload.
pub const EVENT_TIME_PACKED_LEN: usize = 8;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Timestamp with nanosecond precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventTime {
    seconds: u32,
    nanoseconds: u32,
}

impl EventTime {
    /// Construct an event time from its raw components.
    pub const fn new(seconds: u32, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    /// Capture the current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(&Utc::now()).unwrap_or(Self::new(u32::MAX, NANOS_PER_SEC - 1))
    }

    /// Convert a calendar date, returning `None` when it falls outside the
    /// range representable by an unsigned 32 bit seconds field.
    pub fn from_datetime(date: &DateTime<Utc>) -> Option<Self> {
        let seconds = u32::try_from(date.timestamp()).ok()?;
        Some(Self::new(seconds, date.timestamp_subsec_nanos() % NANOS_PER_SEC))
    }

    /// Convert a millisecond Unix timestamp.
    pub fn from_timestamp_millis(millis: i64) -> Option<Self> {
        let seconds = u32::try_from(millis.div_euclid(1000)).ok()?;
        let nanoseconds = u32::try_from(millis.rem_euclid(1000)).ok()? * 1_000_000;
        Some(Self::new(seconds, nanoseconds))
    }

    /// Whole seconds since the Unix epoch.
    pub const fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Sub-second component in nanoseconds.
    pub const fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }

    /// Pack into the 8 byte extension payload.
    pub fn pack(&self) -> [u8; EVENT_TIME_PACKED_LEN] {
        let mut out = [0u8; EVENT_TIME_PACKED_LEN];
        out[..4].copy_from_slice(&self.seconds.to_be_bytes());
        out[4..].copy_from_slice(&self.nanoseconds.to_be_bytes());
        out
    }

    /// Unpack an 8 byte extension payload.
    pub fn unpack(bytes: [u8; EVENT_TIME_PACKED_LEN]) -> Self {
        let [s0, s1, s2, s3, n0, n1, n2, n3] = bytes;
        Self::new(
            u32::from_be_bytes([s0, s1, s2, s3]),
            u32::from_be_bytes([n0, n1, n2, n3]),
        )
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// Borrowed byte slice serialised through `serialize_bytes` so rmp-serde
/// writes it as the raw extension body.
struct ExtBody<'a>(&'a [u8]);

impl Serialize for ExtBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0)
    }
}

impl Serialize for EventTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let packed = self.pack();
        serializer.serialize_newtype_struct(
            MSGPACK_EXT_STRUCT_NAME,
            &(EVENT_TIME_EXT_TYPE, ExtBody(&packed)),
        )
    }
}

/// Owned extension body accepting any of serde's byte callbacks.
struct OwnedExtBody(Vec<u8>);

impl<'de> Deserialize<'de> for OwnedExtBody {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BodyVisitor;

        impl<'de> Visitor<'de> for BodyVisitor {
            type Value = OwnedExtBody;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("extension payload bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(OwnedExtBody(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(OwnedExtBody(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut body = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    body.push(byte);
                }
                Ok(OwnedExtBody(body))
            }
        }

        deserializer.deserialize_bytes(BodyVisitor)
    }
}

struct EventTimeVisitor;

impl<'de> Visitor<'de> for EventTimeVisitor {
    type Value = EventTime;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "a MessagePack extension of type {EVENT_TIME_EXT_TYPE} with a {EVENT_TIME_PACKED_LEN} byte payload"
        )
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Self::Value, D::Error> {
        let (tag, body) = <(i8, OwnedExtBody)>::deserialize(deserializer)?;
        if tag != EVENT_TIME_EXT_TYPE {
            return Err(de::Error::custom(format!(
                "unexpected extension type {tag} for event time"
            )));
        }
        let bytes: [u8; EVENT_TIME_PACKED_LEN] = body
            .0
            .as_slice()
            .try_into()
            .map_err(|_| de::Error::invalid_length(body.0.len(), &self))?;
        Ok(EventTime::unpack(bytes))
    }
}

impl<'de> Deserialize<'de> for EventTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(MSGPACK_EXT_STRUCT_NAME, EventTimeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    fn pack_writes_big_endian_fields() {
        let time = EventTime::new(1_700_000_000, 123_456_789);
        let packed = time.pack();
        assert_eq!(&packed[..4], &1_700_000_000u32.to_be_bytes());
        assert_eq!(&packed[4..], &123_456_789u32.to_be_bytes());
    }

    #[rstest]
    fn unpack_restores_components() {
        let time = EventTime::unpack(EventTime::new(1_700_000_000, 123_456_789).pack());
        assert_eq!(time.seconds(), 1_700_000_000);
        assert_eq!(time.nanoseconds(), 123_456_789);
    }

    #[rstest]
    fn serialises_as_fixext8_type_zero() {
        let encoded = rmp_serde::to_vec(&EventTime::new(1, 2)).expect("encode event time");
        // fixext 8 marker, type id, then the packed body.
        assert_eq!(encoded[0], 0xd7);
        assert_eq!(encoded[1], 0x00);
        assert_eq!(&encoded[2..], &EventTime::new(1, 2).pack());
    }

    #[rstest]
    fn round_trips_when_nested() {
        let time = EventTime::new(1_700_000_000, 123_456_789);
        let encoded = rmp_serde::to_vec(&("tag", time, vec![time])).expect("encode");
        let (tag, decoded, nested): (String, EventTime, Vec<EventTime>) =
            rmp_serde::from_slice(&encoded).expect("decode");
        assert_eq!(tag, "tag");
        assert_eq!(decoded, time);
        assert_eq!(nested, vec![time]);
    }

    #[rstest]
    fn rejects_foreign_extension_type() {
        let mut encoded = rmp_serde::to_vec(&EventTime::new(1, 2)).expect("encode");
        encoded[1] = 0x05;
        let err = rmp_serde::from_slice::<EventTime>(&encoded).expect_err("type 5 is not ours");
        assert!(err.to_string().contains("extension type 5"));
    }

    #[rstest]
    #[case(1_500, EventTime::new(1, 500_000_000))]
    #[case(-1, EventTime::new(0, 0))]
    fn converts_millisecond_timestamps(#[case] millis: i64, #[case] expected: EventTime) {
        match EventTime::from_timestamp_millis(millis) {
            Some(time) => assert_eq!(time, expected),
            None => assert!(millis < 0, "only pre-epoch values are out of range"),
        }
    }

    #[rstest]
    fn converts_calendar_dates() {
        let date = Utc
            .timestamp_opt(1_700_000_000, 42)
            .single()
            .expect("valid date");
        assert_eq!(
            EventTime::from_datetime(&date),
            Some(EventTime::new(1_700_000_000, 42))
        );
    }

    #[rstest]
    fn displays_with_padded_nanoseconds() {
        assert_eq!(EventTime::new(10, 5).to_string(), "10.000000005");
    }
}
