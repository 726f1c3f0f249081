use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Largest file accepted for a single request (inline data ceiling of the endpoint).
pub const MAX_ATTACHMENT_SIZE: u64 = 20 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Failed to read attachment: {0}")]
    Io(#[from] std::io::Error),
    #[error("Attachment '{filename}' is too large ({size} bytes)")]
    TooLarge { filename: String, size: u64 },
    #[error("Attachment '{filename}' has unsupported type {mime_type}; use an image, PDF or .txt file")]
    Unsupported { filename: String, mime_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Sent as base64 inline data.
    Image,
    /// PDF or plain text, appended to the prompt as text.
    Document,
    Unsupported,
}

impl AttachmentKind {
    pub fn classify(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else if mime_type == "application/pdf" || mime_type == "text/plain" {
            Self::Document
        } else {
            Self::Unsupported
        }
    }
}

/// Client-local reference to an attached file, kept on the message for
/// preview rendering. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub url: String,
    pub mime_type: String,
}

impl AttachmentRef {
    pub fn file_name(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }

    pub fn is_image(&self) -> bool {
        AttachmentKind::classify(&self.mime_type) == AttachmentKind::Image
    }
}

#[derive(Clone)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub reference: AttachmentRef,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

impl Attachment {
    pub fn new(filename: &str, mime_type: &str, data: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            data,
            reference: AttachmentRef {
                url: format!("memory://{}", filename),
                mime_type: mime_type.to_string(),
            },
        }
    }

    /// Loads a file the input control accepts: images, PDFs and `.txt` files.
    pub async fn from_path(path: &Path) -> Result<Self, AttachmentError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        if AttachmentKind::classify(&mime_type) == AttachmentKind::Unsupported {
            return Err(AttachmentError::Unsupported {
                filename,
                mime_type,
            });
        }

        let size = tokio::fs::metadata(path).await?.len();
        if size > MAX_ATTACHMENT_SIZE {
            return Err(AttachmentError::TooLarge { filename, size });
        }

        let data = tokio::fs::read(path).await?;
        let absolute = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        info!("Loaded attachment '{}' ({} bytes, {})", filename, size, mime_type);

        Ok(Self {
            reference: AttachmentRef {
                url: format!("file://{}", absolute.display()),
                mime_type: mime_type.clone(),
            },
            filename,
            mime_type,
            data,
        })
    }

    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::classify(&self.mime_type)
    }

    /// Decodes the file as text. Invalid UTF-8 sequences are replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn classify_follows_accepted_types() {
        assert_eq!(AttachmentKind::classify("image/png"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::classify("image/jpeg"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::classify("application/pdf"), AttachmentKind::Document);
        assert_eq!(AttachmentKind::classify("text/plain"), AttachmentKind::Document);
        assert_eq!(AttachmentKind::classify("text/csv"), AttachmentKind::Unsupported);
        assert_eq!(AttachmentKind::classify("application/zip"), AttachmentKind::Unsupported);
    }

    #[test]
    fn reference_exposes_file_name() {
        let attachment = Attachment::new("cat.png", "image/png", vec![1, 2, 3]);
        assert_eq!(attachment.reference.file_name(), "cat.png");
        assert!(attachment.reference.is_image());
    }

    #[tokio::test]
    async fn loads_text_file_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.txt");
        std::fs::write(&path, "line one\nline two").unwrap();

        let attachment = Attachment::from_path(&path).await.unwrap();

        assert_eq!(attachment.filename, "notes.txt");
        assert_eq!(attachment.mime_type, "text/plain");
        assert_eq!(attachment.kind(), AttachmentKind::Document);
        assert_eq!(attachment.text(), "line one\nline two");
        assert!(attachment.reference.url.starts_with("file://"));
        assert_eq!(attachment.reference.file_name(), "notes.txt");
    }

    #[tokio::test]
    async fn rejects_types_the_input_does_not_accept() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("archive.zip");
        std::fs::write(&path, [0u8; 4]).unwrap();

        let result = Attachment::from_path(&path).await;
        assert!(matches!(result, Err(AttachmentError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = Attachment::from_path(&temp_dir.path().join("gone.txt")).await;
        assert!(matches!(result, Err(AttachmentError::Io(_))));
    }
}
