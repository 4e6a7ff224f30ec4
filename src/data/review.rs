//! Customer review records for the public testimonial feed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{deserialize_lenient_timestamp, DataSourceError, Document};

/// Field gating reviews entered through the admin dashboard
pub const ADMIN_ADDED_FIELD: &str = "isAdminAdded";

/// Field gating reviews approved for public display
pub const APPROVED_FIELD: &str = "approved";

/// A customer review
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub name: String,
    pub company: String,
    pub location: String,
    /// Star rating, 1 to 5
    pub rating: u8,
    /// Review body
    #[serde(rename = "text")]
    pub body: String,
    pub is_admin_added: bool,
    pub approved: bool,
    #[serde(deserialize_with = "deserialize_lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Review {
    /// Decodes a review from a raw document
    ///
    /// Out-of-range or non-integer ratings decode as 0 rather than failing
    /// the whole feed.
    pub fn from_document(doc: &Document) -> Result<Self, DataSourceError> {
        let mut fields = doc.decodable_fields();

        let rating = fields
            .get("rating")
            .and_then(Value::as_u64)
            .filter(|r| (1..=5).contains(r))
            .unwrap_or(0);
        fields.insert("rating".to_string(), Value::from(rating));

        serde_json::from_value(Value::Object(fields))
            .map_err(|e| DataSourceError::Parse(format!("review {}: {}", doc.id, e)))
    }

    /// Both gates set and a creation timestamp present
    pub fn is_displayable(&self) -> bool {
        self.is_admin_added && self.approved && self.created_at.is_some()
    }
}

/// Drops reviews without a creation timestamp and sorts newest first
pub fn sort_for_display(reviews: Vec<Review>) -> Vec<Review> {
    let mut reviews: Vec<Review> = reviews
        .into_iter()
        .filter(|r| r.created_at.is_some())
        .collect();
    reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    reviews
}
