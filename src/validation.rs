//! Local validation for every form the tracker accepts.
//!
//! The same functions run in the HTTP handlers and in the client
//! controllers, so a rejected form never reaches the network.

use std::fmt;

use chrono::NaiveDate;
use image::ImageFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::ApplicationStatus;

pub const MAX_TEXT_CHARS: usize = 255;
pub const MAX_BIO_CHARS: usize = 500;
pub const MAX_EMAIL_CHARS: usize = 255;
pub const MAX_PHONE_CHARS: usize = 32;
pub const MIN_PASSWORD_CHARS: usize = 6;
pub const MAX_PROFILE_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];
pub const APPLIED_DATE_FORMAT: &str = "%Y-%m-%d";

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9 \-()]+$").expect("valid phone pattern"));
static WEBSITE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://.+").expect("valid website pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn code(&self) -> String {
        format!("validation/{}", self.field)
    }
}

/// All problems found in one form, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&FieldError> {
        self.0.first()
    }

    pub fn field(&self, field: &str) -> Option<&FieldError> {
        self.0.iter().find(|error| error.field == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value())
        } else {
            Err(self)
        }
    }
}

impl From<FieldError> for ValidationErrors {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first() {
            Some(error) => f.write_str(&error.message),
            None => f.write_str("invalid input"),
        }
    }
}

impl std::error::Error for ValidationErrors {}

fn optional_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

fn required_text(
    errors: &mut ValidationErrors,
    field: &'static str,
    label: &str,
    value: &str,
) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.push(field, format!("{label} is required"));
    } else if trimmed.chars().count() > MAX_TEXT_CHARS {
        errors.push(
            field,
            format!("{label} must be at most {MAX_TEXT_CHARS} characters"),
        );
    }
    trimmed.to_string()
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_PATTERN.is_match(value)
}

fn email_too_long() -> String {
    format!("Email must be at most {MAX_EMAIL_CHARS} characters")
}

/// Application form as submitted, before any checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDraft {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub applied_date: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidApplication {
    pub company: String,
    pub role: String,
    pub status: ApplicationStatus,
    pub applied_date: NaiveDate,
    pub note: Option<String>,
}

impl ApplicationDraft {
    pub fn validate(&self) -> Result<ValidApplication, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let company = required_text(&mut errors, "company", "Company name", &self.company);
        let role = required_text(&mut errors, "role", "Role", &self.role);

        let status = match optional_text(&self.status) {
            None => {
                errors.push("status", "Status is required");
                None
            }
            Some(raw) => match raw.parse::<ApplicationStatus>() {
                Ok(status) => Some(status),
                Err(err) => {
                    errors.push("status", err.to_string());
                    None
                }
            },
        };

        let applied_date = match optional_text(&self.applied_date) {
            None => {
                errors.push("applied_date", "Date applied is required");
                None
            }
            Some(raw) => match NaiveDate::parse_from_str(&raw, APPLIED_DATE_FORMAT) {
                Ok(date) => Some(date),
                Err(_) => {
                    errors.push("applied_date", "Date applied must be formatted as YYYY-MM-DD");
                    None
                }
            },
        };

        let note = optional_text(&self.note);

        match (status, applied_date) {
            (Some(status), Some(applied_date)) => errors.finish(|| ValidApplication {
                company,
                role,
                status,
                applied_date,
                note,
            }),
            _ => Err(errors),
        }
    }
}

/// Profile editor fields. The photo is managed by the upload endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileForm {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidProfile {
    pub display_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
}

impl ProfileForm {
    pub fn validate(&self) -> Result<ValidProfile, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let display_name = required_text(&mut errors, "display_name", "Name", &self.display_name);

        let email = normalize_email(&self.email);
        if email.is_empty() {
            errors.push("email", "Email is required");
        } else if email.chars().count() > MAX_EMAIL_CHARS {
            errors.push("email", email_too_long());
        } else if !is_valid_email(&email) {
            errors.push("email", "Invalid email format");
        }

        let phone_number = optional_text(&self.phone_number);
        if let Some(phone) = &phone_number {
            if phone.chars().count() > MAX_PHONE_CHARS {
                errors.push(
                    "phone_number",
                    format!("Phone number must be at most {MAX_PHONE_CHARS} characters"),
                );
            } else if !PHONE_PATTERN.is_match(phone) {
                errors.push("phone_number", "Invalid phone number format");
            }
        }

        let bio = optional_text(&self.bio);
        if let Some(bio) = &bio {
            if bio.chars().count() > MAX_BIO_CHARS {
                errors.push(
                    "bio",
                    format!("Bio must be at most {MAX_BIO_CHARS} characters"),
                );
            }
        }

        let location = optional_text(&self.location);
        if let Some(location) = &location {
            if location.chars().count() > MAX_TEXT_CHARS {
                errors.push(
                    "location",
                    format!("Location must be at most {MAX_TEXT_CHARS} characters"),
                );
            }
        }

        let website = optional_text(&self.website);
        if let Some(website) = &website {
            if !WEBSITE_PATTERN.is_match(website) {
                errors.push("website", "Website must start with http:// or https://");
            }
        }

        errors.finish(|| ValidProfile {
            display_name,
            email,
            phone_number,
            bio,
            location,
            website,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignUpForm {
    #[serde(default)]
    pub display_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone)]
pub struct ValidSignUp {
    pub display_name: Option<String>,
    pub email: String,
    pub password: String,
}

impl SignUpForm {
    pub fn validate(&self) -> Result<ValidSignUp, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let email = normalize_email(&self.email);
        if email.chars().count() > MAX_EMAIL_CHARS {
            errors.push("email", email_too_long());
        } else if !is_valid_email(&email) {
            errors.push("email", "Invalid email address.");
        }
        if self.password != self.confirm_password {
            errors.push("password", "Passwords do not match");
        } else if self.password.chars().count() < MIN_PASSWORD_CHARS {
            errors.push(
                "password",
                format!("Password must be at least {MIN_PASSWORD_CHARS} characters long"),
            );
        }

        let display_name = optional_text(&Some(self.display_name.clone()));
        errors.finish(|| ValidSignUp {
            display_name,
            email,
            password: self.password.clone(),
        })
    }
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Type and size gate applied before any upload is attempted.
pub fn validate_profile_image(content_type: &str, size: usize) -> Result<(), FieldError> {
    let essence = essence(content_type);
    if !ALLOWED_IMAGE_TYPES.contains(&essence.as_str()) {
        return Err(FieldError::new(
            "file",
            "Invalid file type. Please upload a JPG, PNG, or WebP image.",
        ));
    }
    if size > MAX_PROFILE_IMAGE_BYTES {
        return Err(FieldError::new(
            "file",
            "File size exceeds 5MB. Please upload a smaller image.",
        ));
    }
    if size == 0 {
        return Err(FieldError::new("file", "The selected file is empty."));
    }
    Ok(())
}

/// Confirms the bytes really are the declared image type.
pub fn sniff_profile_image(bytes: &[u8], content_type: &str) -> Result<ImageFormat, FieldError> {
    let expected = match essence(content_type).as_str() {
        "image/jpeg" | "image/jpg" => ImageFormat::Jpeg,
        "image/png" => ImageFormat::Png,
        "image/webp" => ImageFormat::WebP,
        _ => {
            return Err(FieldError::new(
                "file",
                "Invalid file type. Please upload a JPG, PNG, or WebP image.",
            ))
        }
    };

    match image::guess_format(bytes) {
        Ok(found) if found == expected => Ok(found),
        _ => Err(FieldError::new(
            "file",
            "The file contents do not match its image type.",
        )),
    }
}

pub fn image_extension(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("img")
}
