//! Notification types for messages delivered by the queue.

use serde::{Deserialize, Serialize};

/// Opaque token used to acknowledge (delete) a received notification.
///
/// A new handle is issued on every receive, so only the most recent
/// handle for a message is guaranteed to be accepted by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message received from the queue that references an object in the blob store.
///
/// Notifications are intentionally not `Clone`: once the poller hands one to
/// the dispatcher it no longer holds a copy.
#[derive(Debug, PartialEq, Eq)]
pub struct Notification {
    message_id: String,
    receipt: ReceiptHandle,
    body: String,
}

impl Notification {
    pub fn new(
        message_id: impl Into<String>,
        receipt: ReceiptHandle,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            receipt,
            body: body.into(),
        }
    }

    /// Queue-assigned message identifier (stable across redeliveries).
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Receipt handle used for acknowledgment.
    pub fn receipt(&self) -> &ReceiptHandle {
        &self.receipt
    }

    /// Raw message body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Decode the body into the blob-store location it references.
    pub fn decode(&self) -> Result<ObjectLocation, DecodeError> {
        ObjectLocation::from_json(&self.body)
    }
}

/// Location of an object in the blob store, decoded from a notification body.
///
/// Wire format: `{"bucketName": "...", "filePath": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    /// Container (bucket) identifier.
    #[serde(rename = "bucketName")]
    pub bucket: String,
    /// Object key, a `/`-separated path-like identifier.
    #[serde(rename = "filePath")]
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse and validate a notification payload.
    pub fn from_json(body: &str) -> Result<Self, DecodeError> {
        let location: Self = serde_json::from_str(body)?;
        if location.bucket.trim().is_empty() {
            return Err(DecodeError::MissingField("bucketName"));
        }
        if location.key.trim().is_empty() {
            return Err(DecodeError::MissingField("filePath"));
        }
        if location.file_name().is_empty() {
            return Err(DecodeError::NoFileName(location.key));
        }
        Ok(location)
    }

    /// Encode as a notification payload.
    pub fn to_json(&self) -> String {
        serde_json::json!({ "bucketName": self.bucket, "filePath": self.key }).to_string()
    }

    /// Final path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or_default()
    }
}

/// Errors decoding a notification payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload field `{0}` is empty")]
    MissingField(&'static str),

    #[error("object key `{0}` has no file name")]
    NoFileName(String),
}
