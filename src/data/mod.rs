//! Data model and the document database seam
//!
//! This module contains the product and review types shown by the storefront,
//! plus the query shape and `DataSource` trait every backing store implements.

pub mod firestore;
pub mod memory;
pub mod product;
pub mod review;

pub use firestore::FirestoreClient;
pub use memory::MemoryDataSource;
pub use product::Product;
pub use review::Review;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Collection holding catalog products
pub const PRODUCTS_COLLECTION: &str = "products";

/// Collection holding customer reviews
pub const REVIEWS_COLLECTION: &str = "reviews";

/// Timestamp field every ordered query sorts on
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Errors raised by a data source
#[derive(Debug, Error)]
pub enum DataSourceError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The data source answered with a failure
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The filter/order combination needs an index that does not exist
    #[error("Query requires a missing index: {0}")]
    MissingIndex(String),

    /// A response or document could not be decoded
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Reading a local fixture failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataSourceError {
    /// Returns true for the index failure that the review feed degrades on
    pub fn is_missing_index(&self) -> bool {
        matches!(self, DataSourceError::MissingIndex(_))
    }
}

/// A raw record returned by a data source
///
/// Field values are plain JSON; timestamps are RFC 3339 strings.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Identifier assigned by the data source
    pub id: String,
    /// Field values keyed by field name
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Reads a field as a timestamp, if present and well formed
    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.fields.get(field).and_then(parse_timestamp)
    }

    /// Fields ready for model decoding: `id` added, null values dropped
    ///
    /// Legacy records store `null` for fields they never filled in, which
    /// then fall back to the model's defaults.
    pub fn decodable_fields(&self) -> Map<String, Value> {
        let mut fields: Map<String, Value> = self
            .fields
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        fields
    }

    /// Ordering position of this document under a timestamp ordering
    pub fn position(&self, order_field: &str) -> Option<CursorPosition> {
        self.timestamp(order_field).map(|timestamp| CursorPosition {
            timestamp,
            document_id: self.id.clone(),
        })
    }
}

/// Decodes every document it can, skipping the rest with a warning
///
/// # Arguments
/// * `kind` - Record kind for the log line, e.g. "review"
/// * `decode` - Per-document decoder
pub fn decode_lenient<T, F>(docs: &[Document], kind: &str, decode: F) -> Vec<T>
where
    F: Fn(&Document) -> Result<T, DataSourceError>,
{
    docs.iter()
        .filter_map(|doc| match decode(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(kind, id = %doc.id, error = %e, "skipping malformed record");
                None
            }
        })
        .collect()
}

/// Parses a JSON value holding an RFC 3339 timestamp
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Deserializes an optional timestamp, treating malformed values as absent
///
/// Legacy records carry numbers, empty strings or nothing at all here.
pub fn deserialize_lenient_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = <Option<Value> as serde::Deserialize>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

/// Value compared by an equality filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Bool(bool),
    String(String),
}

impl FilterValue {
    /// Returns true if the stored JSON value equals this filter value
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FilterValue::Bool(expected), Value::Bool(actual)) => expected == actual,
            (FilterValue::String(expected), Value::String(actual)) => expected == actual,
            _ => false,
        }
    }
}

/// Equality filter on a named field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    pub field: String,
    pub value: FilterValue,
}

impl FieldFilter {
    pub fn equals_bool(field: &str, value: bool) -> Self {
        Self {
            field: field.to_string(),
            value: FilterValue::Bool(value),
        }
    }

    pub fn equals_str(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            value: FilterValue::String(value.to_string()),
        }
    }

    /// Returns true if the document satisfies this filter
    pub fn matches(&self, doc: &Document) -> bool {
        doc.fields
            .get(&self.field)
            .is_some_and(|value| self.value.matches(value))
    }
}

/// Descending ordering on a timestamp field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
}

impl OrderBy {
    pub fn descending(field: &str) -> Self {
        Self {
            field: field.to_string(),
        }
    }
}

/// Position of a record in a timestamp-descending sequence
///
/// Ties on the timestamp are broken by document id, also descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorPosition {
    pub timestamp: DateTime<Utc>,
    pub document_id: String,
}

impl CursorPosition {
    /// Returns true if `other` comes strictly after this position
    pub fn precedes(&self, other: &CursorPosition) -> bool {
        (other.timestamp, &other.document_id) < (self.timestamp, &self.document_id)
    }
}

/// A query as issued against a data source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<CursorPosition>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.order_by = Some(OrderBy::descending(field));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, position: CursorPosition) -> Self {
        self.start_after = Some(position);
        self
    }
}

/// A backing document store
///
/// Implementations support equality filters, descending order on a timestamp
/// field, a result cap and a start-after cursor, and report a missing index
/// as `DataSourceError::MissingIndex`.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Runs a query and returns the matching documents in query order
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, DataSourceError>;

    /// Fetches one document by id, `None` if it does not exist
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, DataSourceError>;
}

impl std::fmt::Debug for dyn DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataSource")
    }
}
