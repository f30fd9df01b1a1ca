mod happening;
mod news;
mod post;
mod user;

pub use happening::*;
pub use news::*;
pub use post::*;
pub use user::*;

/// How an edit treats the image already attached to a row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ImageChange {
    #[default]
    Keep,
    Replace(crate::images::ImageFile),
    Remove,
}

pub(crate) fn require(field: &str, value: &str) -> Result<(), crate::AppError> {
    if value.trim().is_empty() {
        return Err(crate::AppError::validation(format!("{field} is required")));
    }
    Ok(())
}
