//! View models for each screen. A screen mounts one projection, exposes what the view renders,
//! and turns user actions into backend writes. Rows written here come back through the change
//! feed; edits and deletes are also applied locally right away, which the reconciler makes safe.

mod alerts;
mod dashboard;
mod happenings;
mod news;

pub use alerts::AlertFeed;
pub use dashboard::Dashboard;
pub use happenings::{HappeningFeed, RegionBoard};
pub use news::{DateWindow, NewsFeed};

use mirror::{BlobStorage, ChangeFeed, MutationBackend, MutationError, QueryBackend};

use crate::AppError;
use crate::images::{ImageFile, delete_image, upload_image};
use crate::models::ImageChange;

/// Everything a screen needs from the backend.
pub trait Backend:
    QueryBackend + MutationBackend + ChangeFeed + BlobStorage + Clone + 'static
{
}

impl<T> Backend for T where
    T: QueryBackend + MutationBackend + ChangeFeed + BlobStorage + Clone + 'static
{
}

fn encode(table: &str, row: &impl serde::Serialize) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(row).map_err(|source| {
        AppError::from(MutationError::Encode {
            table: table.to_string(),
            source,
        })
    })
}

async fn upload<B: Backend>(
    backend: &B,
    bucket: &str,
    image: &ImageFile,
) -> Result<String, AppError> {
    Ok(upload_image(backend, bucket, image, chrono::Utc::now()).await?)
}

/// Resolves the image URL a row should carry after an edit, uploading a replacement if there
/// is one.
async fn resolve_image<B: Backend>(
    backend: &B,
    bucket: &str,
    current: Option<&str>,
    change: &ImageChange,
) -> Result<Option<String>, AppError> {
    match change {
        ImageChange::Keep => Ok(current.map(str::to_string)),
        ImageChange::Replace(image) => upload(backend, bucket, image).await.map(Some),
        ImageChange::Remove => Ok(None),
    }
}

/// The image a write just uploaded, or `None` when the write keeps or drops the existing one.
fn uploaded<'a>(change: &ImageChange, url: Option<&'a str>) -> Option<&'a str> {
    match change {
        ImageChange::Replace(_) => url,
        ImageChange::Keep | ImageChange::Remove => None,
    }
}

/// Removes an image that no row points at. A failure here only leaves an orphaned object
/// behind, so it is logged and swallowed.
async fn discard_image<B: Backend>(backend: &B, bucket: &str, url: &str) {
    if let Err(e) = delete_image(backend, bucket, url).await {
        log::warn!("Could not delete image {url}: {e}");
    }
}

/// Passes `written` through, deleting `uploaded` first if the row write it was meant for
/// failed.
async fn keep_upload_if_written<B: Backend, T>(
    backend: &B,
    bucket: &str,
    uploaded: Option<&str>,
    written: Result<T, AppError>,
) -> Result<T, AppError> {
    if let (Err(_), Some(url)) = (&written, uploaded) {
        log::info!("Row write failed, removing the image uploaded for it");
        discard_image(backend, bucket, url).await;
    }
    written
}
