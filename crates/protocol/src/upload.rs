use serde::{Deserialize, Serialize};

/// A file attached to a user message.
///
/// Only the fields that are present are serialized, so an upload built
/// from `{data, type}` reaches the backend exactly as it was given.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileUpload {
    /// Inline data (usually a base64 data URL) or a reference returned
    /// by the attachment endpoint.
    pub data: String,
    /// The upload type, either a MIME type or a Flowise upload kind such
    /// as `file`, `url` or `audio`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Original file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// MIME type, when `kind` is not one already.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl FileUpload {
    /// Creates an upload with the given data and type.
    #[inline]
    pub fn new<D: Into<String>, K: Into<String>>(data: D, kind: K) -> Self {
        Self {
            data: data.into(),
            kind: kind.into(),
            name: None,
            mime: None,
        }
    }

    /// Sets the file name.
    #[inline]
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the MIME type.
    #[inline]
    pub fn with_mime<S: Into<String>>(mut self, mime: S) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Returns the best known content type of this upload.
    #[inline]
    pub fn content_type(&self) -> &str {
        self.mime.as_deref().unwrap_or(&self.kind)
    }

    /// Returns `true` if the data is only a reference to a file stored
    /// by the backend, rather than inline content.
    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(self.kind.as_str(), "url" | "stored-file" | "file:full")
    }

    /// Estimates the decoded size in bytes of inline data.
    ///
    /// Data URLs and bare base64 are measured by their payload; anything
    /// else is measured as-is.
    pub fn estimated_size(&self) -> usize {
        let payload = match self.data.split_once(";base64,") {
            Some((_, payload)) => payload,
            None => &self.data,
        };
        let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
        (payload.len() / 4 * 3).saturating_sub(padding)
            + match payload.len() % 4 {
                0 => 0,
                n => n - 1,
            }
    }
}

/// A raw file to be uploaded through the attachment endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentFile {
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime: String,
    /// File content.
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_serialize_minimal() {
        let upload = FileUpload::new("base64...", "image/png");
        assert_eq!(
            serde_json::to_value(&upload).unwrap(),
            json!({ "data": "base64...", "type": "image/png" })
        );
    }

    #[test]
    fn test_content_type() {
        let upload = FileUpload::new("data:...", "file").with_mime("text/csv");
        assert_eq!(upload.content_type(), "text/csv");
        let upload = FileUpload::new("data:...", "image/jpeg");
        assert_eq!(upload.content_type(), "image/jpeg");
    }

    #[test]
    fn test_estimated_size() {
        // "hello" in base64.
        let upload = FileUpload::new("data:text/plain;base64,aGVsbG8=", "file");
        assert_eq!(upload.estimated_size(), 5);
        let upload = FileUpload::new("aGk=", "file");
        assert_eq!(upload.estimated_size(), 2);
    }
}
