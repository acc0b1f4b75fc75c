use chatflow_embed_protocol::FileUpload;

use crate::error::ValidationError;

const DEFAULT_MAX_SIZE: usize = 10 * 1024 * 1024;

/// Which attachments a widget accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentPolicy {
    /// Accepted content types. Entries may end with `/*` to accept a whole
    /// family. Empty means anything is accepted.
    pub allowed_types: Vec<String>,
    /// Limit on the decoded size of inline data.
    pub max_size: usize,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            allowed_types: Vec::new(),
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl AttachmentPolicy {
    /// Checks an attachment against this policy.
    pub fn validate(&self, upload: &FileUpload) -> Result<(), ValidationError> {
        if upload.data.is_empty() {
            return Err(ValidationError::EmptyAttachment);
        }

        let content_type = upload.content_type();
        if !self.accepts(content_type) {
            return Err(ValidationError::UnsupportedType {
                content_type: content_type.to_owned(),
            });
        }

        // Stored files were already checked by the backend.
        if !upload.is_reference() {
            let size = upload.estimated_size();
            if size > self.max_size {
                return Err(ValidationError::TooLarge {
                    size,
                    limit: self.max_size,
                });
            }
        }
        Ok(())
    }

    fn accepts(&self, content_type: &str) -> bool {
        if self.allowed_types.is_empty() {
            return true;
        }
        self.allowed_types.iter().any(|allowed| {
            match allowed.strip_suffix("/*") {
                Some(family) => content_type
                    .split_once('/')
                    .is_some_and(|(ty, _)| ty.eq_ignore_ascii_case(family)),
                None => allowed.eq_ignore_ascii_case(content_type),
            }
        })
    }
}
