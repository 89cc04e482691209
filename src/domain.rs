use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ApplicationRecord, ProfileRecord, User};
use crate::status::{ApplicationStatus, UnknownStatus};

/// One tracked job application as seen by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub company: String,
    pub role: String,
    pub status: ApplicationStatus,
    pub applied_date: NaiveDate,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ApplicationRecord> for Application {
    type Error = UnknownStatus;

    fn try_from(record: ApplicationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            owner_id: record.owner_id,
            company: record.company,
            role: record.role,
            status: record.status.parse()?,
            applied_date: record.applied_date,
            note: record.note,
            created_at: record.created_at.and_utc(),
            updated_at: record.updated_at.and_utc(),
        })
    }
}

/// Editable account metadata.
///
/// `persisted` is false when no profile row exists yet and the fields were
/// seeded from the auth record; the first save creates the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub persisted: bool,
}

impl UserProfile {
    pub fn seeded_from(user: &User) -> Self {
        Self {
            user_id: user.id,
            display_name: user.display_name.clone().unwrap_or_default(),
            email: user.email.clone(),
            photo_url: user.photo_url.clone(),
            phone_number: None,
            bio: None,
            location: None,
            website: None,
            created_at: None,
            updated_at: None,
            persisted: false,
        }
    }
}

impl From<ProfileRecord> for UserProfile {
    fn from(record: ProfileRecord) -> Self {
        Self {
            user_id: record.user_id,
            display_name: record.display_name,
            email: record.email,
            photo_url: record.photo_url,
            phone_number: record.phone_number,
            bio: record.bio,
            location: record.location,
            website: record.website,
            created_at: Some(record.created_at.and_utc()),
            updated_at: Some(record.updated_at.and_utc()),
            persisted: true,
        }
    }
}

/// Public view of the signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl From<&User> for Account {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            photo_url: user.photo_url.clone(),
        }
    }
}
