use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::db::models::Attachment;
use crate::db::{Database, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("file is empty")]
    EmptyFile,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("attachment store rejected upload: {0}")]
    Store(String),
    #[error("failed to save attachment metadata: {0}")]
    Metadata(#[from] StoreError),
}

/// Binary side of an attachment. The store owns the bytes; the database owns
/// the metadata row.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), UploadError>;
}

/// Attachment store backed by a local directory, one file per key.
pub struct LocalAttachmentStore {
    dir: PathBuf,
}

impl LocalAttachmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), UploadError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(key), bytes)?;
        Ok(())
    }
}

/// An upload the caller can hand to `send`. `display_name` keeps the user's
/// original file name; the stored metadata carries the sanitized one.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub display_name: String,
    pub attachment: Attachment,
}

pub struct AttachmentPipeline {
    db: Arc<Database>,
    store: Arc<dyn AttachmentStore>,
}

impl AttachmentPipeline {
    pub fn new(db: Arc<Database>, store: Arc<dyn AttachmentStore>) -> Self {
        Self { db, store }
    }

    /// Uploads one file and records its metadata. `message_id` may be a
    /// staging id or absent; the send pipeline re-points the row at the real
    /// message once the store has confirmed it. Accepted content types
    /// (images, PDF) are a UI-level filter, not enforced here.
    pub async fn upload(
        &self,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
        message_id: Option<&str>,
    ) -> Result<UploadedFile, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::EmptyFile);
        }

        let sanitized = sanitize_file_name(file_name);
        let key = storage_key(&sanitized);

        self.store.put(&key, bytes).await?;

        let attachment = Attachment {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: message_id.map(String::from),
            file_name: sanitized,
            file_path: key,
            content_type: content_type.to_string(),
            size: bytes.len() as i64,
        };
        self.db.insert_attachment(&attachment)?;

        tracing::info!(
            file = %attachment.file_name,
            key = %attachment.file_path,
            size = attachment.size,
            "attachment uploaded"
        );

        Ok(UploadedFile {
            display_name: file_name.to_string(),
            attachment,
        })
    }
}

/// Strips non-ASCII bytes so the stored name is a safe display/key string.
fn sanitize_file_name(name: &str) -> String {
    name.chars().filter(char::is_ascii).collect()
}

/// Fresh random key, keeping only the original extension.
fn storage_key(sanitized_name: &str) -> String {
    let id = uuid::Uuid::new_v4();
    match sanitized_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!("{id}.{ext}"),
        _ => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(dir: &std::path::Path) -> AttachmentPipeline {
        AttachmentPipeline::new(
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(LocalAttachmentStore::new(dir)),
        )
    }

    #[test]
    fn sanitize_strips_non_ascii() {
        assert_eq!(sanitize_file_name("report v1.pdf"), "report v1.pdf");
        assert_eq!(sanitize_file_name("résumé.pdf"), "rsum.pdf");
        assert_eq!(sanitize_file_name("健康.png"), ".png");
    }

    #[tokio::test]
    async fn upload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());

        let uploaded = pipeline
            .upload(b"%PDF-1.4", "report v1.pdf", "application/pdf", None)
            .await
            .unwrap();

        assert_eq!(uploaded.display_name, "report v1.pdf");
        assert!(uploaded.attachment.file_path.is_ascii());
        assert!(uploaded.attachment.file_path.ends_with(".pdf"));
        assert_eq!(uploaded.attachment.size, 8);
        assert_eq!(uploaded.attachment.message_id, None);

        let on_disk = std::fs::read(dir.path().join(&uploaded.attachment.file_path)).unwrap();
        assert_eq!(on_disk, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn unicode_names_stay_out_of_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());

        let uploaded = pipeline
            .upload(b"png-bytes", "santé 🌡.png", "image/png", Some("staging-1"))
            .await
            .unwrap();

        // Original name survives for display only.
        assert_eq!(uploaded.display_name, "santé 🌡.png");
        assert_eq!(uploaded.attachment.file_name, "sant .png");
        assert!(uploaded.attachment.file_path.is_ascii());
        assert!(uploaded.attachment.file_path.ends_with(".png"));
        assert_eq!(uploaded.attachment.message_id.as_deref(), Some("staging-1"));
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());

        let err = pipeline
            .upload(b"", "empty.pdf", "application/pdf", None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::EmptyFile));
        assert!(std::fs::read_dir(dir.path()).map(|mut d| d.next().is_none()).unwrap_or(true));
    }
}
