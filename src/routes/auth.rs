use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{jwt::TokenSubject, password, session::Identity, AuthenticatedUser},
    domain::Account,
    error::{AppError, AppResult},
    models::{NewProfileRecord, NewRefreshToken, NewUser, RefreshToken, User},
    schema::{profiles, refresh_tokens, users::dsl},
    state::{AppState, PgPooledConnection},
    validation::{normalize_email, SignUpForm},
};

use crate::schema::refresh_tokens::dsl as refresh_dsl;

const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub account: Account,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(form): Json<SignUpForm>,
) -> AppResult<(StatusCode, HeaderMap, Json<LoginResponse>)> {
    let valid = form.validate()?;
    let mut conn = state.db()?;

    let taken = dsl::users
        .filter(dsl::email.eq(&valid.email))
        .select(dsl::id)
        .first::<Uuid>(&mut conn)
        .optional()?
        .is_some();
    if taken {
        return Err(AppError::email_in_use());
    }

    let password_hash = password::hash_password(&valid.password)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        email: valid.email.clone(),
        password_hash,
        display_name: valid.display_name.clone(),
    };

    let user = conn.transaction::<User, AppError, _>(|conn| {
        let user: User = diesel::insert_into(crate::schema::users::table)
            .values(&new_user)
            .get_result(conn)
            .map_err(map_unique_email)?;

        let now = Utc::now().naive_utc();
        diesel::insert_into(profiles::table)
            .values(&NewProfileRecord {
                user_id: user.id,
                display_name: user.display_name.clone().unwrap_or_default(),
                email: user.email.clone(),
                photo_url: None,
                phone_number: None,
                bio: None,
                location: None,
                website: None,
                created_at: now,
                updated_at: now,
            })
            .execute(conn)?;
        Ok(user)
    })?;

    info!(user_id = %user.id, "account created");
    let (headers, body) = start_session(&state, &mut conn, &user, Uuid::new_v4(), Utc::now())?;
    Ok((StatusCode::CREATED, headers, body))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let mut conn = state.db()?;
    let email = normalize_email(&payload.email);

    let user: User = dsl::users
        .filter(dsl::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::invalid_credentials)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::invalid_credentials())?;

    if !valid {
        return Err(AppError::invalid_credentials());
    }

    start_session(&state, &mut conn, &user, Uuid::new_v4(), Utc::now())
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let refresh_value = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let hashed = hash_refresh_token(refresh_value);
    let mut conn = state.db()?;
    let now_naive = Utc::now().naive_utc();

    let token = match refresh_dsl::refresh_tokens
        .filter(refresh_dsl::token_hash.eq(&hashed))
        .filter(refresh_dsl::revoked_at.is_null())
        .filter(refresh_dsl::expires_at.gt(now_naive))
        .first::<RefreshToken>(&mut conn)
    {
        Ok(token) => token,
        Err(DieselError::NotFound) => return Err(AppError::unauthorized()),
        Err(err) => return Err(AppError::from(err)),
    };

    diesel::update(refresh_dsl::refresh_tokens.filter(refresh_dsl::id.eq(token.id)))
        .set((
            refresh_dsl::revoked_at.eq(now_naive),
            refresh_dsl::updated_at.eq(now_naive),
        ))
        .execute(&mut conn)?;

    let user: User = dsl::users
        .find(token.user_id)
        .first(&mut conn)
        .map_err(AppError::from)?;

    start_session(
        &state,
        &mut conn,
        &user,
        token.session_id,
        token.authenticated_at.and_utc(),
    )
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let revoked = diesel::update(
        refresh_dsl::refresh_tokens
            .filter(refresh_dsl::session_id.eq(user.session_id))
            .filter(refresh_dsl::user_id.eq(user.user_id))
            .filter(refresh_dsl::revoked_at.is_null()),
    )
    .set((
        refresh_dsl::revoked_at.eq(now),
        refresh_dsl::updated_at.eq(now),
    ))
    .execute(&mut conn)?;

    state.sessions.sign_out(user.session_id);
    info!(user_id = %user.user_id, session_id = %user.session_id, revoked, "signed out");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Account>> {
    let mut conn = state.db()?;
    let record: User = dsl::users.find(user.user_id).first(&mut conn)?;
    Ok(Json(Account::from(&record)))
}

/// Returns true when `session_id` still has an unrevoked, unexpired refresh
/// token belonging to `user_id`.
pub(crate) fn session_is_active(
    conn: &mut PgPooledConnection,
    user_id: Uuid,
    session_id: Uuid,
) -> AppResult<bool> {
    let now = Utc::now().naive_utc();
    let found = refresh_dsl::refresh_tokens
        .filter(refresh_dsl::session_id.eq(session_id))
        .filter(refresh_dsl::user_id.eq(user_id))
        .filter(refresh_dsl::revoked_at.is_null())
        .filter(refresh_dsl::expires_at.gt(now))
        .select(refresh_dsl::id)
        .first::<Uuid>(conn)
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn map_unique_email(err: DieselError) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::email_in_use()
        }
        other => AppError::from(other),
    }
}

// Issues an access token plus a fresh refresh token for `session_id` and
// publishes the identity to the session registry.
fn start_session(
    state: &AppState,
    conn: &mut PgPooledConnection,
    user: &User,
    session_id: Uuid,
    authenticated_at: DateTime<Utc>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let access_token = state.jwt.generate_token(TokenSubject {
        user_id: user.id,
        email: &user.email,
        session_id,
        authenticated_at,
    })?;

    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let refresh_expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    let new_refresh = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        session_id,
        token_hash: hash_refresh_token(&refresh_value),
        authenticated_at: authenticated_at.naive_utc(),
        issued_at: now.naive_utc(),
        expires_at: refresh_expires_at.naive_utc(),
    };

    diesel::insert_into(refresh_tokens::table)
        .values(&new_refresh)
        .execute(conn)?;

    state.sessions.sign_in(Identity {
        user_id: user.id,
        email: user.email.clone(),
        session_id,
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_refresh_cookie(state, &refresh_value, refresh_expires_at)?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.config.jwt_expiry_minutes * 60,
            account: Account::from(user),
        }),
    ))
}

fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn cookie_header(state: &AppState, mut parts: Vec<String>) -> AppResult<HeaderValue> {
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }
    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid refresh cookie: {err}")))
}

fn build_refresh_cookie(
    state: &AppState,
    token: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds();

    let parts = vec![
        format!("{}={}", REFRESH_COOKIE_NAME, token),
        "Path=/".into(),
        "HttpOnly".into(),
        "SameSite=Strict".into(),
        format!("Max-Age={}", max_age),
        format!("Expires={}", expires_at.to_rfc2822()),
    ];
    cookie_header(state, parts)
}

fn build_clear_refresh_cookie(state: &AppState) -> AppResult<HeaderValue> {
    let parts = vec![
        format!("{}=", REFRESH_COOKIE_NAME),
        "Path=/".into(),
        "HttpOnly".into(),
        "SameSite=Strict".into(),
        "Max-Age=0".into(),
        "Expires=Thu, 01 Jan 1970 00:00:00 GMT".into(),
    ];
    cookie_header(state, parts)
}
