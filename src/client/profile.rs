use std::time::Instant;

use tracing::warn;

use super::notice::Notice;
use super::{ApiError, TrackerApi};
use crate::domain::UserProfile;
use crate::error::{
    CODE_EMAIL_IN_USE, CODE_REQUIRES_RECENT_LOGIN, CODE_STORAGE_RETRY_LIMIT,
    CODE_STORAGE_UNAUTHORIZED,
};
use crate::validation::{validate_profile_image, ProfileForm, ValidationErrors};

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("a request is already in progress")]
    InFlight,
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error("{message}")]
    Rejected { message: String, source: ApiError },
}

/// Profile form plus the photo shown next to it.
#[derive(Debug, Clone, Default)]
pub struct ProfileEditor {
    pub form: ProfileForm,
    pub photo_url: Option<String>,
    saving: bool,
    notice: Option<Notice>,
}

fn save_failure_message(err: &ApiError) -> String {
    match err.code() {
        Some(CODE_REQUIRES_RECENT_LOGIN) => {
            "Please log out and log back in to update your email".to_string()
        }
        Some(CODE_EMAIL_IN_USE) => "This email is already in use".to_string(),
        _ => match err {
            ApiError::Rejected { message, .. } if !message.is_empty() => message.clone(),
            _ => "Failed to update profile".to_string(),
        },
    }
}

fn upload_failure_message(err: &ApiError) -> &'static str {
    match (err, err.code()) {
        (_, Some(CODE_STORAGE_UNAUTHORIZED)) => "You do not have permission to upload images.",
        _ if err.is_unauthorized() => "You do not have permission to upload images.",
        (_, Some(CODE_STORAGE_RETRY_LIMIT)) | (ApiError::Transport(_), _) => {
            "Network error. Please check your internet connection and try again."
        }
        _ => "Failed to upload image. Please try again.",
    }
}

impl ProfileEditor {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            form: ProfileForm {
                display_name: profile.display_name.clone(),
                email: profile.email.clone(),
                phone_number: profile.phone_number.clone(),
                bio: profile.bio.clone(),
                location: profile.location.clone(),
                website: profile.website.clone(),
            },
            photo_url: profile.photo_url.clone(),
            saving: false,
            notice: None,
        }
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn notice(&self, now: Instant) -> Option<&Notice> {
        self.notice.as_ref().filter(|notice| notice.is_visible(now))
    }

    pub async fn save(&mut self, api: &dyn TrackerApi) -> Result<UserProfile, ProfileError> {
        if self.saving {
            return Err(ProfileError::InFlight);
        }
        if let Err(errors) = self.form.validate() {
            if let Some(first) = errors.first() {
                self.notice = Some(Notice::error(first.message.clone(), Instant::now()));
            }
            return Err(ProfileError::Invalid(errors));
        }

        self.saving = true;
        let result = api.save_profile(&self.form).await;
        self.saving = false;

        match result {
            Ok(profile) => {
                self.form.email = profile.email.clone();
                self.notice = Some(Notice::success(
                    "Profile updated successfully!",
                    Instant::now(),
                ));
                Ok(profile)
            }
            Err(err) => {
                let message = save_failure_message(&err);
                warn!(error = %err, "profile save failed");
                self.notice = Some(Notice::error(message.clone(), Instant::now()));
                Err(ProfileError::Rejected {
                    message,
                    source: err,
                })
            }
        }
    }
}

/// A local file picked for upload.
#[derive(Debug, Clone)]
pub struct PhotoFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoFile {
    /// Derives the content type from the file name.
    pub fn from_name(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }
}

#[derive(Debug, Default)]
pub struct PhotoUploader {
    uploading: bool,
}

impl PhotoUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    /// Checks type and size before any request. On success the editor shows
    /// the new photo; on any failure its photo is left alone.
    pub async fn upload(
        &mut self,
        api: &dyn TrackerApi,
        editor: &mut ProfileEditor,
        file: PhotoFile,
    ) -> Result<String, ProfileError> {
        if self.uploading {
            return Err(ProfileError::InFlight);
        }
        if let Err(err) = validate_profile_image(&file.content_type, file.bytes.len()) {
            editor.notice = Some(Notice::error(err.message.clone(), Instant::now()));
            return Err(ProfileError::Invalid(err.into()));
        }

        self.uploading = true;
        let result = api
            .upload_photo(&file.file_name, &file.content_type, file.bytes)
            .await;
        self.uploading = false;

        match result {
            Ok(photo_url) => {
                editor.photo_url = Some(photo_url.clone());
                editor.notice = Some(Notice::success(
                    "Profile photo updated successfully!",
                    Instant::now(),
                ));
                Ok(photo_url)
            }
            Err(err) => {
                let message = upload_failure_message(&err).to_string();
                warn!(error = %err, "profile photo upload failed");
                editor.notice = Some(Notice::error(message.clone(), Instant::now()));
                Err(ProfileError::Rejected {
                    message,
                    source: err,
                })
            }
        }
    }
}
