//! # Queue Items
//!
//! The unit of work flowing through the in-process queues, and the operation
//! type that determines its routing and ordering domain.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info_span;
use uuid::Uuid;

use crate::pipeline::ExportSink;

/// Coarse job category determining routing and the ordering domain.
///
/// `load` jobs run fully server-side and may be routed to the broker.
/// `download` jobs stream a response back through the originating connection
/// and can never leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Load,
    Download,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Download => "download",
        }
    }

    /// Parse a client-supplied operation name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "load" => Some(Self::Load),
            "download" => Some(Self::Download),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work.
///
/// Owned exclusively by whichever queue holds it; ownership transfers to the
/// worker that dequeues it and the item is dropped after processing. Nothing
/// is persisted.
#[derive(Debug)]
pub struct QueueItem {
    /// Unique request identifier
    pub request_id: Uuid,
    /// Business date the job operates on
    pub date: NaiveDate,
    /// Operation type
    pub operation: OperationType,
    /// Source folder (cashbox) identifier
    pub source_folder: Option<String>,
    /// When the request was accepted
    pub created_at: DateTime<Utc>,
    /// Span bound to the request identifier; workers process inside it
    pub span: tracing::Span,
    /// Response sink, present only for `download`
    pub sink: Option<ExportSink>,
}

impl QueueItem {
    /// Create a `load` item.
    pub fn load(date: NaiveDate, source_folder: Option<String>) -> Self {
        Self::new(OperationType::Load, date, source_folder, None)
    }

    /// Create a `download` item owning the response sink.
    pub fn download(date: NaiveDate, source_folder: Option<String>, sink: ExportSink) -> Self {
        Self::new(OperationType::Download, date, source_folder, Some(sink))
    }

    fn new(
        operation: OperationType,
        date: NaiveDate,
        source_folder: Option<String>,
        sink: Option<ExportSink>,
    ) -> Self {
        let request_id = Uuid::new_v4();
        Self {
            request_id,
            date,
            operation,
            source_folder,
            created_at: Utc::now(),
            span: info_span!("job", request_id = %request_id, operation = %operation),
            sink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_type_parse() {
        assert_eq!(OperationType::parse("load"), Some(OperationType::Load));
        assert_eq!(
            OperationType::parse("download"),
            Some(OperationType::Download)
        );
        assert_eq!(OperationType::parse("export"), None);
        assert_eq!(OperationType::parse("LOAD"), None);
    }

    #[test]
    fn test_operation_type_serde_tags() {
        assert_eq!(
            serde_json::to_string(&OperationType::Load).unwrap(),
            r#""load""#
        );
        assert_eq!(
            serde_json::from_str::<OperationType>(r#""download""#).unwrap(),
            OperationType::Download
        );
    }

    #[test]
    fn test_load_item_has_no_sink() {
        let item = QueueItem::load(NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(), None);
        assert_eq!(item.operation, OperationType::Load);
        assert!(item.sink.is_none());
    }
}
