//! Typed client for the tracker API plus the controllers a front end drives:
//! the application form, the live board, the delete gate, the profile editor
//! and the photo uploader.
//!
//! Controllers talk to the server through [`TrackerApi`] so they can be
//! exercised against an in-memory fake.

pub mod board;
pub mod forms;
pub mod http;
pub mod notice;
pub mod profile;
pub mod sse;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{Application, UserProfile};
use crate::status::ApplicationStatus;
use crate::validation::{ApplicationDraft, ProfileForm};

pub use self::http::HttpTrackerClient;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("HTTP: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Rejected { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Transport(err) => err.status().map(|status| status.as_u16()),
            ApiError::Decode(_) => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

pub type ApiResult<T> = Result<T, ApiError>;

/// The write operations the controllers need.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    async fn create_application(&self, draft: &ApplicationDraft) -> ApiResult<Application>;

    async fn update_status(&self, id: Uuid, status: ApplicationStatus)
        -> ApiResult<Application>;

    async fn delete_application(&self, id: Uuid) -> ApiResult<()>;

    async fn save_profile(&self, form: &ProfileForm) -> ApiResult<UserProfile>;

    /// Uploads a profile image and returns its durable URL.
    async fn upload_photo(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> ApiResult<String>;
}
