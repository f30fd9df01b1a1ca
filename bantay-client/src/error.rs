use mirror::{FetchError, MutationError, RemovalError, SubscriptionError, UploadError};

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Removal(#[from] RemovalError),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Auth(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// What to show in an alert. Backend details stay in the log.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(message)
            | AppError::NotFound(message)
            | AppError::Auth(message) => message.clone(),
            AppError::Subscription(_) => "Live updates are unavailable right now.".to_string(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_backend_details() {
        let error = AppError::from(MutationError::Rejected {
            table: "posts".to_string(),
            message: "new row violates row-level security policy".to_string(),
        });
        assert!(error.to_string().contains("row-level security"));
        assert_eq!(
            error.user_message(),
            "Something went wrong. Please try again."
        );

        let error = AppError::validation("All fields are required!");
        assert_eq!(error.user_message(), "All fields are required!");
    }
}
