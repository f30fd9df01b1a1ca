//! Image attachments for posts and happenings, kept in storage buckets and referenced from rows
//! by public URL.

use std::path::Path;

use chrono::{DateTime, Utc};
use mirror::{BlobStorage, RemovalError, UploadError};

const DEFAULT_EXTENSION: &str = "jpeg";

/// An image picked for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFile {
    pub bytes: Vec<u8>,
    pub extension: String,
}

impl ImageFile {
    pub fn new(bytes: Vec<u8>, extension: impl Into<String>) -> Self {
        Self {
            bytes,
            extension: extension.into(),
        }
    }

    pub async fn read(path: &Path) -> Result<Self, UploadError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(bytes, extension_of(path)))
    }

    /// `image/{ext}`, with `jpg` as its registered name `image/jpeg`.
    pub fn content_type(&self) -> String {
        match self.extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" => "image/jpeg".to_string(),
            ext => format!("image/{ext}"),
        }
    }
}

/// The file extension, or `jpeg` when there isn't one.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or(DEFAULT_EXTENSION)
        .to_ascii_lowercase()
}

/// Uploads under a fresh `{millis}-{random}.{ext}` key and returns the public URL.
pub async fn upload_image<S: BlobStorage>(
    storage: &S,
    bucket: &str,
    image: &ImageFile,
    now: DateTime<Utc>,
) -> Result<String, UploadError> {
    let key = eyedee::storage_object_key(&image.extension, now);
    log::info!("Uploading image to {bucket}/{key}");
    let url = storage
        .upload(bucket, &key, image.bytes.clone(), &image.content_type())
        .await
        .inspect_err(|e| log::error!("Error uploading image: {e}"))?;
    Ok(url)
}

/// Removes the object behind a public URL produced by [`upload_image`].
pub async fn delete_image<S: BlobStorage>(
    storage: &S,
    bucket: &str,
    url: &str,
) -> Result<(), RemovalError> {
    let Some(key) = storage.key_from_public_url(bucket, url) else {
        return Err(RemovalError::NotAnObject(url.to_string()));
    };
    log::info!("Deleting image {bucket}/{key}");
    storage
        .remove(bucket, &key)
        .await
        .inspect_err(|e| log::error!("Error deleting image: {e}"))
}
