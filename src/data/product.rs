//! Catalog product records
//!
//! Products created through the admin dashboard always carry five image slots,
//! but older records may have fewer, more, or none, so decoding is lenient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{deserialize_lenient_timestamp, DataSourceError, Document};

/// Number of image slots the admin form writes for a new product
pub const ADMIN_IMAGE_SLOTS: usize = 5;

/// A product in the export catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Product {
    /// Identifier assigned by the data source
    pub id: String,
    pub name: String,
    /// Free-form category, e.g. "spices"
    pub category: String,
    pub description: String,
    /// Image references; the first one is the main image
    pub images: Vec<String>,
    pub is_bestseller: bool,
    /// Featured in the home page hero banner
    pub show_in_hero: bool,
    pub out_of_stock: bool,
    #[serde(deserialize_with = "deserialize_lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Decodes a product from a raw document
    pub fn from_document(doc: &Document) -> Result<Self, DataSourceError> {
        let mut fields = doc.decodable_fields();

        // Legacy image lists may contain nulls for unused slots
        if let Some(Value::Array(images)) = fields.get_mut("images") {
            images.retain(|v| v.is_string());
        }

        serde_json::from_value(Value::Object(fields))
            .map_err(|e| DataSourceError::Parse(format!("product {}: {}", doc.id, e)))
    }

    /// Decodes a batch of documents, preserving order
    pub fn from_documents(docs: &[Document]) -> Result<Vec<Self>, DataSourceError> {
        docs.iter().map(Self::from_document).collect()
    }

    /// Returns the main image reference, if one is set
    pub fn main_image(&self) -> Option<&str> {
        self.images
            .first()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns the non-empty image references in slot order
    pub fn gallery(&self) -> impl Iterator<Item = &str> {
        self.images
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}
