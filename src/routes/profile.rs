use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    response::Redirect,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    domain::UserProfile,
    error::{AppError, AppResult},
    models::{NewProfileRecord, ProfileRecord, User},
    schema::{profiles, users},
    state::AppState,
    storage::delete_best_effort,
    validation::{image_extension, sniff_profile_image, validate_profile_image, ProfileForm},
};

use super::auth::map_unique_email;

const PHOTO_URL_TTL: Duration = Duration::from_secs(300);

#[derive(Serialize)]
pub struct PhotoUploadResponse {
    pub photo_url: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = profiles)]
#[diesel(treat_none_as_null = true)]
struct ProfileChangeset<'a> {
    display_name: &'a str,
    email: &'a str,
    photo_url: Option<&'a str>,
    phone_number: Option<&'a str>,
    bio: Option<&'a str>,
    location: Option<&'a str>,
    website: Option<&'a str>,
    updated_at: NaiveDateTime,
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserProfile>> {
    let mut conn = state.db()?;
    let record: Option<ProfileRecord> = profiles::table
        .find(user.user_id)
        .first(&mut conn)
        .optional()?;

    let profile = match record {
        Some(record) => UserProfile::from(record),
        None => {
            let account: User = users::table.find(user.user_id).first(&mut conn)?;
            UserProfile::seeded_from(&account)
        }
    };
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(form): Json<ProfileForm>,
) -> AppResult<Json<UserProfile>> {
    let valid = form.validate()?;
    let mut conn = state.db()?;
    let account: User = users::table.find(user.user_id).first(&mut conn)?;

    let email_changed = valid.email != account.email;
    if email_changed {
        if !user.is_recent_login(state.config.recent_login_window_minutes) {
            return Err(AppError::requires_recent_login());
        }
        let taken = users::table
            .filter(users::email.eq(&valid.email))
            .filter(users::id.ne(user.user_id))
            .select(users::id)
            .first::<Uuid>(&mut conn)
            .optional()?
            .is_some();
        if taken {
            return Err(AppError::email_in_use());
        }
    }

    let now = Utc::now().naive_utc();
    let record = conn.transaction::<ProfileRecord, AppError, _>(|conn| {
        diesel::update(users::table.find(user.user_id))
            .set((
                users::email.eq(&valid.email),
                users::display_name.eq(Some(valid.display_name.as_str())),
                users::updated_at.eq(now),
            ))
            .execute(conn)
            .map_err(map_unique_email)?;

        let new_profile = NewProfileRecord {
            user_id: user.user_id,
            display_name: valid.display_name.clone(),
            email: valid.email.clone(),
            photo_url: account.photo_url.clone(),
            phone_number: valid.phone_number.clone(),
            bio: valid.bio.clone(),
            location: valid.location.clone(),
            website: valid.website.clone(),
            created_at: now,
            updated_at: now,
        };
        let changes = ProfileChangeset {
            display_name: &valid.display_name,
            email: &valid.email,
            photo_url: account.photo_url.as_deref(),
            phone_number: valid.phone_number.as_deref(),
            bio: valid.bio.as_deref(),
            location: valid.location.as_deref(),
            website: valid.website.as_deref(),
            updated_at: now,
        };

        // created_at is left out of the conflict update so it survives saves.
        let record = diesel::insert_into(profiles::table)
            .values(&new_profile)
            .on_conflict(profiles::user_id)
            .do_update()
            .set(&changes)
            .get_result::<ProfileRecord>(conn)?;
        Ok(record)
    })?;

    if email_changed {
        state.sessions.update_email(user.user_id, &valid.email);
    }
    info!(user_id = %user.user_id, email_changed, "profile saved");

    Ok(Json(UserProfile::from(record)))
}

pub async fn upload_photo(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<Json<PhotoUploadResponse>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart payload: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("failed to read upload: {err}")))?;
        upload = Some((content_type, bytes));
        break;
    }

    let (content_type, bytes) =
        upload.ok_or_else(|| AppError::bad_request("missing file field"))?;
    validate_profile_image(&content_type, bytes.len())?;
    let format = sniff_profile_image(&bytes, &content_type)?;

    let file_name = format!(
        "profile_{}_{}.{}",
        user.user_id,
        Utc::now().timestamp_millis(),
        image_extension(format)
    );
    let key = format!("profile-images/{}/{}", user.user_id, file_name);

    let mut conn = state.db()?;
    let account: User = users::table.find(user.user_id).first(&mut conn)?;

    state
        .storage
        .put_object(&key, bytes.to_vec(), Some(format.to_mime_type().to_string()))
        .await
        .map_err(|err| {
            error!(user_id = %user.user_id, key = %key, error = %err, "profile image upload failed");
            AppError::from(err)
        })?;

    let photo_url = format!("/api/users/{}/photo/{}", user.user_id, file_name);
    let now = Utc::now().naive_utc();
    let committed = conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(users::table.find(user.user_id))
            .set((
                users::photo_url.eq(Some(photo_url.as_str())),
                users::photo_path.eq(Some(key.as_str())),
                users::updated_at.eq(now),
            ))
            .execute(conn)?;
        diesel::update(profiles::table.find(user.user_id))
            .set((
                profiles::photo_url.eq(Some(photo_url.as_str())),
                profiles::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(())
    });
    if let Err(err) = committed {
        error!(user_id = %user.user_id, key = %key, error = %err, "profile image update failed");
        delete_best_effort(state.storage.as_ref(), &key).await;
        return Err(err);
    }

    if let Some(previous) = account.photo_path.as_deref().filter(|path| *path != key) {
        delete_best_effort(state.storage.as_ref(), previous).await;
    }

    info!(user_id = %user.user_id, key = %key, size = bytes.len(), "profile image uploaded");
    Ok(Json(PhotoUploadResponse { photo_url }))
}

/// Public, durable photo URL. Redirects to a short-lived presigned URL while
/// `file_name` is still the user's current image.
pub async fn photo_redirect(
    State(state): State<AppState>,
    Path((user_id, file_name)): Path<(Uuid, String)>,
) -> AppResult<Redirect> {
    let mut conn = state.db()?;
    let account: User = users::table.find(user_id).first(&mut conn)?;

    let key = account
        .photo_path
        .filter(|path| path.rsplit('/').next() == Some(file_name.as_str()))
        .ok_or_else(AppError::not_found)?;

    let url = state.storage.presign_get_object(&key, PHOTO_URL_TTL).await?;
    Ok(Redirect::temporary(&url))
}
