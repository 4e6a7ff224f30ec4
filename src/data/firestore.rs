//! Hosted document database client
//!
//! Talks to the Firestore REST API (`documents:runQuery` and single-document
//! GET) and converts its typed field values into plain JSON documents.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{CursorPosition, DataSource, DataSourceError, Document, FieldFilter, FilterValue, Query};

/// Public REST endpoint
const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Default database name
pub const DEFAULT_DATABASE: &str = "(default)";

/// One element of a `runQuery` response stream
#[derive(Debug, Deserialize)]
struct RunQueryItem {
    /// Absent on progress-only items
    document: Option<RawDocument>,
}

/// A document as returned by the REST API
#[derive(Debug, Deserialize)]
struct RawDocument {
    /// Full resource name, ending in `/<collection>/<id>`
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Error envelope returned on non-success responses
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Client for a Firestore database
#[derive(Debug, Clone)]
pub struct FirestoreClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Base URL for the API (allows an emulator)
    base_url: String,
    project_id: String,
    database: String,
    /// Web API key appended as `?key=`
    api_key: Option<String>,
}

impl FirestoreClient {
    /// Creates a client for the given project's default database
    pub fn new(project_id: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id: project_id.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            api_key: None,
        }
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Points the client at another endpoint, e.g. a local emulator
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Resource path of the database's document root
    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database
        )
    }

    /// Endpoint below the database root, each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DataSourceError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            DataSourceError::Fetch(format!("invalid base URL {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| DataSourceError::Fetch(format!("base URL {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend([
                "projects",
                self.project_id.as_str(),
                "databases",
                self.database.as_str(),
            ])
            .extend(segments);
        Ok(url)
    }

    /// Adds the API key as a query parameter, if one is configured
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.query(&[("key", key)]),
            None => request,
        }
    }

    /// Builds the `runQuery` request body for a query
    fn build_request(&self, query: &Query) -> Value {
        let mut structured = Map::new();
        structured.insert(
            "from".to_string(),
            json!([{ "collectionId": query.collection }]),
        );

        match query.filters.as_slice() {
            [] => {}
            [single] => {
                structured.insert("where".to_string(), encode_filter(single));
            }
            many => {
                let filters: Vec<Value> = many.iter().map(encode_filter).collect();
                structured.insert(
                    "where".to_string(),
                    json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
                );
            }
        }

        if let Some(order) = &query.order_by {
            structured.insert(
                "orderBy".to_string(),
                json!([
                    { "field": { "fieldPath": order.field }, "direction": "DESCENDING" },
                    { "field": { "fieldPath": "__name__" }, "direction": "DESCENDING" }
                ]),
            );
        }

        if let Some(cursor) = &query.start_after {
            structured.insert(
                "startAt".to_string(),
                json!({
                    "values": self.encode_cursor(&query.collection, cursor),
                    "before": false
                }),
            );
        }

        if let Some(limit) = query.limit {
            structured.insert("limit".to_string(), json!(limit));
        }

        json!({ "structuredQuery": structured })
    }

    fn encode_cursor(&self, collection: &str, cursor: &CursorPosition) -> Value {
        json!([
            { "timestampValue": cursor.timestamp.to_rfc3339() },
            {
                "referenceValue": format!(
                    "{}/{}/{}",
                    self.documents_root(),
                    collection,
                    cursor.document_id
                )
            }
        ])
    }

    /// Parses a `runQuery` response body
    fn parse_run_query(body: &str) -> Result<Vec<Document>, DataSourceError> {
        let items: Vec<RunQueryItem> =
            serde_json::from_str(body).map_err(|e| DataSourceError::Parse(e.to_string()))?;

        Ok(items
            .into_iter()
            .filter_map(|item| item.document)
            .map(into_document)
            .collect())
    }

    /// Maps a non-success response onto the error taxonomy
    fn classify_error(status: StatusCode, body: &str) -> DataSourceError {
        let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let (message, api_status) = envelope
            .map(|e| (e.error.message, e.error.status))
            .unwrap_or_else(|| (body.to_string(), String::new()));

        if api_status == "FAILED_PRECONDITION" && message.to_lowercase().contains("index") {
            DataSourceError::MissingIndex(message)
        } else {
            DataSourceError::Fetch(format!("{}: {}", status, message))
        }
    }
}

#[async_trait]
impl DataSource for FirestoreClient {
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, DataSourceError> {
        let url = self.endpoint(&["documents:runQuery"])?;
        let body = self.build_request(query);
        debug!(collection = %query.collection, filters = query.filters.len(), "runQuery");

        let response = self
            .authorized(self.http_client.post(url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = Self::classify_error(status, &text);
            warn!(collection = %query.collection, error = %err, "runQuery failed");
            return Err(err);
        }

        Self::parse_run_query(&text)
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, DataSourceError> {
        let url = self.endpoint(&["documents", collection, id])?;

        let response = self.authorized(self.http_client.get(url)).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Self::classify_error(status, &text));
        }

        let raw: RawDocument =
            serde_json::from_str(&text).map_err(|e| DataSourceError::Parse(e.to_string()))?;
        Ok(Some(into_document(raw)))
    }
}

fn encode_filter(filter: &FieldFilter) -> Value {
    let value = match &filter.value {
        FilterValue::Bool(b) => json!({ "booleanValue": b }),
        FilterValue::String(s) => json!({ "stringValue": s }),
    };
    json!({
        "fieldFilter": {
            "field": { "fieldPath": filter.field },
            "op": "EQUAL",
            "value": value
        }
    })
}

fn into_document(raw: RawDocument) -> Document {
    let id = raw
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let fields = raw
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect();
    Document::new(id, fields)
}

/// Converts a typed API value into plain JSON
///
/// Timestamps stay RFC 3339 strings. Unknown kinds decode as null.
fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" => inner.clone(),
        "booleanValue" => inner.clone(),
        // 64-bit integers arrive as strings
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "doubleValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(|fields| {
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), decode_value(v)))
                        .collect()
                })
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Product, CREATED_AT_FIELD};
    use chrono::{TimeZone, Utc};

    /// Sample `runQuery` response with one progress-only element
    const RUN_QUERY_RESPONSE: &str = r#"[
        {
            "document": {
                "name": "projects/demo/databases/(default)/documents/products/p1",
                "fields": {
                    "name": { "stringValue": "Turmeric Fingers" },
                    "category": { "stringValue": "spices" },
                    "images": { "arrayValue": { "values": [
                        { "stringValue": "https://cdn.example/t1.jpg" },
                        { "stringValue": "" }
                    ] } },
                    "isBestseller": { "booleanValue": true },
                    "outOfStock": { "booleanValue": false },
                    "moq": { "integerValue": "500" },
                    "curcumin": { "doubleValue": 3.5 },
                    "origin": { "mapValue": { "fields": { "state": { "stringValue": "Kerala" } } } },
                    "createdAt": { "timestampValue": "2024-02-10T09:15:00Z" },
                    "legacy": { "nullValue": null }
                },
                "createTime": "2024-02-10T09:15:00.123Z",
                "updateTime": "2024-02-10T09:15:00.123Z"
            },
            "readTime": "2024-07-01T00:00:00Z"
        },
        { "readTime": "2024-07-01T00:00:00Z" }
    ]"#;

    fn client() -> FirestoreClient {
        FirestoreClient::new("demo")
    }

    #[test]
    fn test_parse_run_query_response() {
        let docs = FirestoreClient::parse_run_query(RUN_QUERY_RESPONSE).expect("Should parse");

        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.id, "p1");
        assert_eq!(doc.fields["moq"], json!(500));
        assert_eq!(doc.fields["curcumin"], json!(3.5));
        assert_eq!(doc.fields["origin"], json!({"state": "Kerala"}));
        assert_eq!(doc.fields["legacy"], Value::Null);

        let product = Product::from_document(doc).expect("Should decode product");
        assert_eq!(product.name, "Turmeric Fingers");
        assert!(product.is_bestseller);
        assert_eq!(product.images.len(), 2);
        assert_eq!(
            product.created_at,
            Some(Utc.with_ymd_and_hms(2024, 2, 10, 9, 15, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_empty_response() {
        let docs = FirestoreClient::parse_run_query("[]").unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_parse_malformed_response() {
        let result = FirestoreClient::parse_run_query("{not json");
        assert!(matches!(result, Err(DataSourceError::Parse(_))));
    }

    #[test]
    fn test_build_request_single_filter() {
        let query = Query::collection("products")
            .filter(FieldFilter::equals_str("category", "spices"))
            .order_by_desc(CREATED_AT_FIELD)
            .limit(8);

        let body = client().build_request(&query);
        let sq = &body["structuredQuery"];

        assert_eq!(sq["from"][0]["collectionId"], "products");
        assert_eq!(sq["where"]["fieldFilter"]["field"]["fieldPath"], "category");
        assert_eq!(sq["where"]["fieldFilter"]["value"]["stringValue"], "spices");
        assert_eq!(sq["orderBy"][0]["field"]["fieldPath"], "createdAt");
        assert_eq!(sq["orderBy"][0]["direction"], "DESCENDING");
        assert_eq!(sq["limit"], 8);
        assert!(sq.get("startAt").is_none());
    }

    #[test]
    fn test_build_request_composite_filter_and_cursor() {
        let cursor = CursorPosition {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            document_id: "p9".to_string(),
        };
        let query = Query::collection("reviews")
            .filter(FieldFilter::equals_bool("approved", true))
            .filter(FieldFilter::equals_bool("isAdminAdded", true))
            .order_by_desc(CREATED_AT_FIELD)
            .start_after(cursor);

        let body = client().build_request(&query);
        let sq = &body["structuredQuery"];

        assert_eq!(sq["where"]["compositeFilter"]["op"], "AND");
        assert_eq!(
            sq["where"]["compositeFilter"]["filters"].as_array().map(Vec::len),
            Some(2)
        );
        assert_eq!(sq["startAt"]["before"], false);
        assert_eq!(
            sq["startAt"]["values"][1]["referenceValue"],
            "projects/demo/databases/(default)/documents/reviews/p9"
        );
        assert!(sq.get("limit").is_none());
    }

    #[test]
    fn test_classify_missing_index() {
        let body = r#"{"error": {"code": 400, "message": "The query requires an index. You can create it here: https://console.example/...", "status": "FAILED_PRECONDITION"}}"#;

        let err = FirestoreClient::classify_error(StatusCode::BAD_REQUEST, body);

        assert!(err.is_missing_index());
    }

    #[test]
    fn test_classify_other_errors() {
        let denied = r#"{"error": {"code": 403, "message": "Missing or insufficient permissions.", "status": "PERMISSION_DENIED"}}"#;

        let err = FirestoreClient::classify_error(StatusCode::FORBIDDEN, denied);
        assert!(matches!(err, DataSourceError::Fetch(_)));

        let err = FirestoreClient::classify_error(StatusCode::BAD_GATEWAY, "<html>");
        assert!(matches!(err, DataSourceError::Fetch(ref m) if m.contains("<html>")));
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let emulator = client().with_base_url("http://localhost:8080/v1/");

        let query_url = emulator.endpoint(&["documents:runQuery"]).unwrap();
        let doc_url = emulator
            .endpoint(&["documents", "products", "bay leaf/2?x"])
            .unwrap();

        assert_eq!(
            query_url.as_str(),
            "http://localhost:8080/v1/projects/demo/databases/(default)/documents:runQuery"
        );
        assert_eq!(
            doc_url.as_str(),
            "http://localhost:8080/v1/projects/demo/databases/(default)/documents/products/bay%20leaf%2F2%3Fx"
        );
        assert!(doc_url.query().is_none());
    }

    #[test]
    fn test_api_key_sent_as_encoded_query() {
        let plain = client();
        let keyed = client().with_api_key(Some("k+1&x=2".to_string()));
        let url = keyed.endpoint(&["documents", "products", "p1"]).unwrap();

        let request = keyed
            .authorized(keyed.http_client.get(url.clone()))
            .build()
            .unwrap();
        let unkeyed = plain.authorized(plain.http_client.get(url)).build().unwrap();

        assert_eq!(request.url().query(), Some("key=k%2B1%26x%3D2"));
        let keys: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(keys, vec![("key".to_string(), "k+1&x=2".to_string())]);
        assert!(unkeyed.url().query().is_none());
    }

    #[test]
    fn test_invalid_base_url() {
        let broken = client().with_base_url("not a url");

        let result = broken.endpoint(&["documents:runQuery"]);

        assert!(matches!(result, Err(DataSourceError::Fetch(_))));
    }
}
