//! # Wire Message
//!
//! The flat, versionless JSON record published for every broker-routed job,
//! plus the two AMQP headers that carry the whole persistent retry state.
//! There is no separate retry ledger: the retry counter and the first-seen
//! timestamp ride with the message itself and must be preserved verbatim
//! when a message is republished to the retry or dead-letter exchange.

use chrono::{DateTime, NaiveDate, Utc};
use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messaging::MessagingError;
use crate::queue::OperationType;

/// Header carrying the number of handler attempts already failed
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
/// Header carrying the epoch second the request first entered the broker
pub const FIRST_SEEN_HEADER: &str = "x-first-seen";

/// One broker-routed unit of work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobMessage {
    /// Unique request identifier
    pub request_id: Uuid,
    /// Business date the job operates on
    pub date: NaiveDate,
    /// Operation type (always `load` on the broker path)
    pub operation: OperationType,
    /// Source folder (cashbox) identifier
    pub source_folder: Option<String>,
    /// When the request was accepted
    pub created_at: DateTime<Utc>,
}

impl JobMessage {
    /// Create a message for a freshly accepted request
    pub fn new(
        request_id: Uuid,
        date: NaiveDate,
        operation: OperationType,
        source_folder: Option<String>,
    ) -> Self {
        Self {
            request_id,
            date,
            operation,
            source_folder,
            created_at: Utc::now(),
        }
    }

    /// Serialize to the wire format
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::deserialization(e.to_string()))
    }

    /// Decode from the wire format
    pub fn from_bytes(data: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(data).map_err(|e| MessagingError::deserialization(e.to_string()))
    }
}

/// Build the header table for a publish with the given retry state.
pub fn retry_headers(retry_count: i64, first_seen_epoch: u64) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        AMQPValue::LongLongInt(retry_count),
    );
    headers.insert(
        FIRST_SEEN_HEADER.into(),
        AMQPValue::Timestamp(first_seen_epoch),
    );
    headers
}

/// Read an integer header off delivered message properties.
///
/// Brokers and clients are loose about integer widths in header tables, so
/// every integral encoding is accepted.
pub fn header_i64(properties: &BasicProperties, name: &str) -> Option<i64> {
    let headers = properties.headers().as_ref()?;
    let (_, value) = headers.inner().iter().find(|(key, _)| key.as_str() == name)?;
    match value {
        AMQPValue::ShortShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongLongInt(v) => Some(*v),
        AMQPValue::Timestamp(v) => Some(*v as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> JobMessage {
        JobMessage::new(
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            OperationType::Load,
            Some("store-001".to_string()),
        )
    }

    #[test]
    fn test_wire_roundtrip_preserves_fields() {
        let msg = sample_message();
        let bytes = msg.to_bytes().unwrap();
        let decoded = JobMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_wire_format_is_flat_json() {
        let msg = sample_message();
        let value: serde_json::Value =
            serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(value["operation"], "load");
        assert_eq!(value["date"], "2024-12-01");
        assert_eq!(value["source_folder"], "store-001");
        assert!(value["request_id"].is_string());
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        assert!(JobMessage::from_bytes(b"not json").is_err());
        assert!(JobMessage::from_bytes(br#"{"operation":"load"}"#).is_err());
    }

    #[test]
    fn test_retry_headers_roundtrip() {
        let headers = retry_headers(2, 1_733_011_200);
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(header_i64(&properties, RETRY_COUNT_HEADER), Some(2));
        assert_eq!(
            header_i64(&properties, FIRST_SEEN_HEADER),
            Some(1_733_011_200)
        );
        assert_eq!(header_i64(&properties, "x-missing"), None);
    }

    #[test]
    fn test_header_i64_accepts_narrow_integer_encodings() {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongInt(7));
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(header_i64(&properties, RETRY_COUNT_HEADER), Some(7));
    }
}
