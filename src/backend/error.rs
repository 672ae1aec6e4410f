use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message} ({status})")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("not found")]
    NotFound,
    #[error("could not decode page image: {0}")]
    Image(#[from] image::ImageError),
}

impl ApiError {
    /// Short text for inline status lines.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
