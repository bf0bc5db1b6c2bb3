use crate::error::BookingError;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info};
use uuid::Uuid;

const MAX_FILE_NAME_LENGTH: usize = 100;

lazy_static! {
    static ref UNSAFE_FILE_NAME_CHARS: Regex =
        Regex::new(r"[^A-Za-z0-9._-]+").expect("file name pattern is valid");
}

/// Upload side of the object storage holding payment receipts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReceiptStorage: Send + Sync {
    /// Stores the receipt and returns the URL it can be fetched from.
    async fn upload(
        &self,
        booking_id: Uuid,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<String, BookingError>;
}

/// Keeps the last path component and replaces everything outside
/// `[A-Za-z0-9._-]` so the name is safe as a file name and in a URL.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or_default();
    let sanitized = UNSAFE_FILE_NAME_CHARS.replace_all(base, "_");
    let sanitized: String = sanitized
        .trim_start_matches('.')
        .chars()
        .take(MAX_FILE_NAME_LENGTH)
        .collect();

    if sanitized.is_empty() {
        "receipt".into()
    } else {
        sanitized
    }
}

/// Receipt storage on the local file system, one directory per booking.
#[derive(Debug, Clone)]
pub struct LocalReceiptStorage {
    directory: PathBuf,
    public_base_url: String,
}

impl LocalReceiptStorage {
    pub fn new(directory: PathBuf, public_base_url: &str) -> Self {
        Self {
            directory,
            public_base_url: public_base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl ReceiptStorage for LocalReceiptStorage {
    async fn upload(
        &self,
        booking_id: Uuid,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<String, BookingError> {
        if bytes.is_empty() {
            return Err(BookingError::UploadFailure("Receipt file is empty".into()));
        }

        let file_name = sanitize_file_name(&file_name);
        let booking_directory = self.directory.join(booking_id.to_string());
        fs::create_dir_all(&booking_directory).await.map_err(|err| {
            error!(%booking_id, %err, "Failed to create receipt directory");
            BookingError::UploadFailure(err.to_string())
        })?;
        fs::write(booking_directory.join(&file_name), bytes)
            .await
            .map_err(|err| {
                error!(%booking_id, %err, "Failed to write receipt");
                BookingError::UploadFailure(err.to_string())
            })?;

        info!(%booking_id, %file_name, "Receipt stored");
        Ok(format!(
            "{}/{booking_id}/{file_name}",
            self.public_base_url
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case("receipt.png", "receipt.png" ; "plain name")]
    #[test_case("../../etc/passwd", "passwd" ; "path traversal")]
    #[test_case("C:\\Users\\me\\scan 01.pdf", "scan_01.pdf" ; "windows path with space")]
    #[test_case("..hidden", "hidden" ; "leading dots")]
    #[test_case("überweisung.jpg", "_berweisung.jpg" ; "non ascii")]
    #[test_case("", "receipt" ; "empty")]
    #[test_case("dir/", "receipt" ; "trailing separator")]
    fn test_sanitize_file_name(input: &str, expected: &str) {
        assert_eq!(sanitize_file_name(input), expected);
    }

    #[tokio::test]
    async fn test_upload_writes_file_and_returns_url() {
        let directory = tempfile::tempdir().unwrap();
        let storage = LocalReceiptStorage::new(directory.path().to_path_buf(), "/receipts/");
        let booking_id = Uuid::new_v4();

        let url = storage
            .upload(booking_id, "bank transfer.png".into(), b"image".to_vec())
            .await
            .unwrap();

        assert_eq!(url, format!("/receipts/{booking_id}/bank_transfer.png"));
        let stored = std::fs::read(
            directory
                .path()
                .join(booking_id.to_string())
                .join("bank_transfer.png"),
        )
        .unwrap();
        assert_eq!(stored, b"image");
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let directory = tempfile::tempdir().unwrap();
        let storage = LocalReceiptStorage::new(directory.path().to_path_buf(), "/receipts");

        let err = storage
            .upload(Uuid::new_v4(), "empty.png".into(), Vec::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(std::fs::read_dir(directory.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_directory_fails_upload() {
        let directory = tempfile::tempdir().unwrap();
        let blocker = directory.path().join("not_a_directory");
        std::fs::write(&blocker, b"file").unwrap();
        let storage = LocalReceiptStorage::new(blocker, "/receipts");

        let err = storage
            .upload(Uuid::new_v4(), "a.png".into(), b"a".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "retry");
    }
}
