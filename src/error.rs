use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Series or entry not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// File extension is not a supported archive container.
    #[error("Invalid archive type: {0}")]
    InvalidArchiveType(String),

    /// Archive member is not a recognized image.
    #[error("Invalid page '{member}' in {archive}")]
    InvalidPage {
        /// Archive path.
        archive: String,
        /// Offending member name.
        member: String,
    },

    /// Archive has no pages left after filtering.
    #[error("Archive has no pages: {0}")]
    NoPages(String),

    /// Requested page index is past the end of the entry.
    #[error("Page {index} out of range (entry has {count} pages)")]
    PageOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of pages in the entry.
        count: usize,
    },

    /// Member could not be located inside the archive, even after the legacy name fallback.
    #[error("Member '{0}' not found in archive")]
    MemberNotFound(String),

    /// Deleting the user would leave the store without users.
    #[error("Not enough users: at least one user must remain")]
    NotEnoughUsers,

    /// A user with this name already exists.
    #[error("User already exists: {0}")]
    UserExists(String),

    /// No user with this name.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Empty passwords are refused.
    #[error("Password must not be empty")]
    EmptyPassword,

    /// Missing or wrong credentials.
    #[error("Unauthorized")]
    Unauthorized,

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// RAR archive error.
    #[error("RAR error: {0}")]
    Rar(String),

    /// Image processing error.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status used when the error reaches a client.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) | AppError::UserNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotEnoughUsers | AppError::UserExists(_) => StatusCode::CONFLICT,
            AppError::EmptyPassword => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status == StatusCode::UNAUTHORIZED {
            tracing::debug!("Rejected request without valid credentials");
            return (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"comic-opds\"")],
                self.to_string(),
            )
                .into_response();
        }

        if status.is_server_error() {
            tracing::error!(error = %self, "Request error");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }

        (status, self.to_string()).into_response()
    }
}

impl From<unrar::error::UnrarError> for AppError {
    fn from(e: unrar::error::UnrarError) -> Self {
        AppError::Rar(e.to_string())
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
