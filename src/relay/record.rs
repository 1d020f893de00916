//! Buffered inbound datagrams.

use std::net::IpAddr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Key under which the capture time is serialized.
pub const RECEIVED_AT_KEY: &str = "receivedAt";
/// Key under which the sender address is serialized.
pub const SOURCE_ADDRESS_KEY: &str = "sourceAddress";

/// One received JSON-object datagram. Never mutated once buffered.
///
/// Serializes flat: the payload's fields plus `receivedAt` and
/// `sourceAddress`. On a key clash the payload field wins.
#[derive(Debug, Clone, PartialEq)]
pub struct DatagramRecord {
    pub received_at: DateTime<Utc>,
    pub source_address: IpAddr,
    pub payload: Map<String, Value>,
}

impl DatagramRecord {
    /// Build a record if `raw` is a JSON object; anything else yields `None`.
    pub fn decode(raw: &[u8], source_address: IpAddr, received_at: DateTime<Utc>) -> Option<Self> {
        match serde_json::from_slice::<Value>(raw) {
            Ok(Value::Object(payload)) => Some(Self {
                received_at,
                source_address,
                payload,
            }),
            _ => None,
        }
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

impl Serialize for DatagramRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.payload.contains_key(RECEIVED_AT_KEY) {
            map.serialize_entry(
                RECEIVED_AT_KEY,
                &self.received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            )?;
        }
        if !self.payload.contains_key(SOURCE_ADDRESS_KEY) {
            map.serialize_entry(SOURCE_ADDRESS_KEY, &self.source_address.to_string())?;
        }
        for (k, v) in &self.payload {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
