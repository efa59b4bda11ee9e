use serde::{Deserialize, Serialize};

pub const KV_PREFIX: &str = "kv::";

/// Build the document identifier holding `key`.
pub fn kv_doc_id(key: &str) -> String {
    format!("{KV_PREFIX}{key}")
}

/// One key-value entry stored as its own CouchDB document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchKvDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub value: String,
}

impl CouchKvDocument {
    /// Document for `key`; `rev` is required to overwrite an existing one.
    pub fn new(key: &str, value: String, rev: Option<String>) -> Self {
        Self {
            id: kv_doc_id(key),
            rev,
            value,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BulkDocsRequest {
    pub docs: Vec<CouchKvDocument>,
}

/// Per-document status returned by `_bulk_docs`.
#[derive(Debug, Deserialize)]
pub struct BulkDocResult {
    pub id: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
