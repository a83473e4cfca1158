//! Request Payload Encoding
//!
//! Bodies travel in one of three encodings: none, json, or multipart.
//! Multipart file parts are carried as raw bytes with their filenames and
//! are never re-encoded; payloads are fully buffered in memory.

use bytes::Bytes;

/// Body of a dispatched request.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    /// No body.
    #[default]
    Empty,

    /// JSON body, sent with an `application/json` content type.
    Json(serde_json::Value),

    /// Multipart form: binary file parts plus an optional json part.
    Multipart(MultipartPayload),
}

impl Payload {
    /// JSON payload from a value.
    pub fn json(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }

    /// Multipart payload from parts.
    pub fn multipart(payload: MultipartPayload) -> Self {
        Payload::Multipart(payload)
    }
}

/// A multipart form body.
#[derive(Debug, Clone, Default)]
pub struct MultipartPayload {
    /// File parts, in submission order.
    pub files: Vec<FilePart>,

    /// JSON fields accompanying the files, sent as the `payload_json` part.
    pub json: Option<serde_json::Value>,
}

impl MultipartPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a file part.
    pub fn file(mut self, part: FilePart) -> Self {
        self.files.push(part);
        self
    }

    /// Attach the `payload_json` part.
    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.json = Some(value);
        self
    }
}

/// One file in a multipart payload.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Form field name, e.g. `files[0]`.
    pub name: String,

    /// Filename reported to the remote.
    pub filename: String,

    /// Raw content, kept byte-exact.
    pub data: Bytes,
}

impl FilePart {
    pub fn new(
        name: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            data: data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_parts_keep_bytes_exact() {
        let raw = vec![0u8, 159, 146, 150, 255];
        let part = FilePart::new("files[0]", "blob.bin", raw.clone());

        assert_eq!(part.data.as_ref(), raw.as_slice());
        assert_eq!(part.filename, "blob.bin");
    }

    #[test]
    fn multipart_builder_orders_files() {
        let payload = MultipartPayload::new()
            .file(FilePart::new("files[0]", "a.png", vec![1u8]))
            .file(FilePart::new("files[1]", "b.png", vec![2u8]))
            .json(serde_json::json!({ "content": "attachments" }));

        assert_eq!(payload.files.len(), 2);
        assert_eq!(payload.files[0].filename, "a.png");
        assert_eq!(payload.files[1].filename, "b.png");
        assert!(payload.json.is_some());
    }
}
