//! In-process document store
//!
//! Backs the CLI's fixture mode and the test suite. It honours the same query
//! contract as the hosted database, and can be told to reject multi-filter
//! queries as unindexed or to fail a whole collection.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use super::{DataSource, DataSourceError, Document, Query};

/// Document store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryDataSource {
    /// Documents per collection, in insertion order
    collections: RwLock<HashMap<String, Vec<Document>>>,
    /// Collections whose queries fail with a fetch error
    failing: RwLock<HashSet<String>>,
    /// Reject queries with more than one equality filter
    reject_composite: AtomicBool,
    /// Number of `run_query` calls served
    query_count: AtomicUsize,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from fixture JSON
    ///
    /// Every top-level key names a collection holding an array of objects.
    /// An object's `"id"` becomes the document id; objects without one get
    /// `<collection>-<index>`.
    pub fn from_json_str(json: &str) -> Result<Self, DataSourceError> {
        let root: Map<String, Value> = serde_json::from_str(json)
            .map_err(|e| DataSourceError::Parse(format!("fixture: {}", e)))?;

        let mut collections = HashMap::new();
        for (name, records) in root {
            let Value::Array(records) = records else {
                return Err(DataSourceError::Parse(format!(
                    "fixture collection '{}' is not an array",
                    name
                )));
            };

            let mut docs = Vec::with_capacity(records.len());
            for (index, record) in records.into_iter().enumerate() {
                let Value::Object(mut fields) = record else {
                    return Err(DataSourceError::Parse(format!(
                        "fixture record {} in '{}' is not an object",
                        index, name
                    )));
                };
                let id = match fields.remove("id") {
                    Some(Value::String(id)) => id,
                    _ => format!("{}-{}", name, index),
                };
                docs.push(Document::new(id, fields));
            }
            collections.insert(name, docs);
        }

        Ok(Self {
            collections: RwLock::new(collections),
            ..Default::default()
        })
    }

    /// Reads a fixture file from disk
    pub fn from_json_file(path: &Path) -> Result<Self, DataSourceError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Adds a document while building the store
    pub fn with_document(mut self, collection: &str, doc: Document) -> Self {
        self.collections
            .get_mut()
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        self
    }

    /// Rejects composite filter queries while building the store
    pub fn with_composite_rejected(self) -> Self {
        self.reject_composite.store(true, Ordering::SeqCst);
        self
    }

    /// Adds a document to a live store
    pub async fn insert(&self, collection: &str, doc: Document) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Makes every query against `collection` fail, or heals it
    pub async fn set_failing(&self, collection: &str, failing: bool) {
        let mut set = self.failing.write().await;
        if failing {
            set.insert(collection.to_string());
        } else {
            set.remove(collection);
        }
    }

    pub fn set_composite_rejected(&self, rejected: bool) {
        self.reject_composite.store(rejected, Ordering::SeqCst);
    }

    /// Number of queries served so far
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, DataSourceError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);

        if self.failing.read().await.contains(&query.collection) {
            return Err(DataSourceError::Fetch(format!(
                "collection '{}' unavailable",
                query.collection
            )));
        }

        if query.filters.len() > 1 && self.reject_composite.load(Ordering::SeqCst) {
            let fields: Vec<&str> = query.filters.iter().map(|f| f.field.as_str()).collect();
            return Err(DataSourceError::MissingIndex(format!(
                "The query requires an index on {} ({})",
                query.collection,
                fields.join(", ")
            )));
        }

        let collections = self.collections.read().await;
        let docs = collections
            .get(&query.collection)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|doc| query.filters.iter().all(|f| f.matches(doc)))
            .cloned()
            .collect();

        match &query.order_by {
            Some(order) => {
                let mut positioned: Vec<_> = matched
                    .into_iter()
                    .filter_map(|doc| doc.position(&order.field).map(|pos| (pos, doc)))
                    .collect();
                positioned.sort_by(|(a, _), (b, _)| {
                    (b.timestamp, &b.document_id).cmp(&(a.timestamp, &a.document_id))
                });
                if let Some(cursor) = &query.start_after {
                    positioned.retain(|(pos, _)| cursor.precedes(pos));
                }
                matched = positioned.into_iter().map(|(_, doc)| doc).collect();
            }
            None if query.start_after.is_some() => {
                return Err(DataSourceError::Fetch(
                    "start-after cursor requires an ordered query".to_string(),
                ));
            }
            None => {}
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        debug!(
            collection = %query.collection,
            filters = query.filters.len(),
            returned = matched.len(),
            "memory query"
        );
        Ok(matched)
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, DataSourceError> {
        if self.failing.read().await.contains(collection) {
            return Err(DataSourceError::Fetch(format!(
                "collection '{}' unavailable",
                collection
            )));
        }

        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned()))
    }
}
