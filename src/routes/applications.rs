use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::{pg::PgConnection, prelude::*};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    db::PgPool,
    domain::Application,
    error::{AppError, AppResult},
    feed::{ChangeNotice, FeedEvent, LiveFeed, SnapshotSource},
    models::{ApplicationRecord, NewApplicationRecord},
    schema::applications,
    state::AppState,
    status::ApplicationStatus,
    validation::{ApplicationDraft, FieldError},
    view::{ApplicationFilter, ApplicationStats, StatusFilter},
};

use super::auth::session_is_active;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub q: Option<String>,
}

#[derive(Serialize)]
pub struct ApplicationListResponse {
    pub applications: Vec<Application>,
    pub stats: ApplicationStats,
}

#[derive(Deserialize)]
pub struct StatusPatch {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub confirm: bool,
}

#[derive(AsChangeset)]
#[diesel(table_name = applications)]
#[diesel(treat_none_as_null = true)]
struct ApplicationChangeset<'a> {
    company: &'a str,
    role: &'a str,
    status: &'a str,
    applied_date: NaiveDate,
    note: Option<&'a str>,
    updated_at: NaiveDateTime,
}

fn into_application(record: ApplicationRecord) -> AppResult<Application> {
    Application::try_from(record).map_err(AppError::internal)
}

/// Every application owned by `owner`, newest first.
pub fn load_owned_applications(
    conn: &mut PgConnection,
    owner: Uuid,
) -> AppResult<Vec<Application>> {
    let records: Vec<ApplicationRecord> = applications::table
        .filter(applications::owner_id.eq(owner))
        .order((
            applications::applied_date.desc(),
            applications::created_at.desc(),
        ))
        .load(conn)?;
    records.into_iter().map(into_application).collect()
}

fn find_owned(conn: &mut PgConnection, owner: Uuid, id: Uuid) -> AppResult<Application> {
    let record: ApplicationRecord = applications::table
        .filter(applications::id.eq(id))
        .filter(applications::owner_id.eq(owner))
        .first(conn)?;
    into_application(record)
}

pub async fn list_applications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApplicationListResponse>> {
    let status = query
        .status
        .as_deref()
        .unwrap_or_default()
        .parse::<StatusFilter>()
        .map_err(|err| FieldError::new("status", err.to_string()))?;
    let filter = ApplicationFilter::new(status, query.q.unwrap_or_default());

    let mut conn = state.db()?;
    let all = load_owned_applications(&mut conn, user.user_id)?;
    let stats = ApplicationStats::from_applications(&all);
    let applications = filter.apply(&all).into_iter().cloned().collect();

    Ok(Json(ApplicationListResponse {
        applications,
        stats,
    }))
}

pub async fn get_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
) -> AppResult<Json<Application>> {
    let mut conn = state.db()?;
    Ok(Json(find_owned(&mut conn, user.user_id, application_id)?))
}

pub async fn create_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(draft): Json<ApplicationDraft>,
) -> AppResult<(StatusCode, Json<Application>)> {
    let valid = draft.validate()?;
    let mut conn = state.db()?;

    let new_record = NewApplicationRecord {
        id: Uuid::new_v4(),
        owner_id: user.user_id,
        company: valid.company,
        role: valid.role,
        status: valid.status.label().to_string(),
        applied_date: valid.applied_date,
        note: valid.note,
    };

    let record: ApplicationRecord = diesel::insert_into(applications::table)
        .values(&new_record)
        .get_result(&mut conn)
        .map_err(|err| {
            error!(owner_id = %user.user_id, error = %err, "failed to create application");
            AppError::from(err)
        })?;
    let application = into_application(record)?;

    state
        .changes
        .publish(user.user_id, ChangeNotice::Created(application.id));
    info!(
        owner_id = %user.user_id,
        application_id = %application.id,
        status = %application.status,
        "application created"
    );

    Ok((StatusCode::CREATED, Json(application)))
}

pub async fn update_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
    Json(draft): Json<ApplicationDraft>,
) -> AppResult<Json<Application>> {
    let valid = draft.validate()?;
    let mut conn = state.db()?;

    let changes = ApplicationChangeset {
        company: &valid.company,
        role: &valid.role,
        status: valid.status.label(),
        applied_date: valid.applied_date,
        note: valid.note.as_deref(),
        updated_at: Utc::now().naive_utc(),
    };

    let record: ApplicationRecord = diesel::update(
        applications::table
            .filter(applications::id.eq(application_id))
            .filter(applications::owner_id.eq(user.user_id)),
    )
    .set(&changes)
    .get_result::<ApplicationRecord>(&mut conn)
    .optional()?
    .ok_or_else(AppError::not_found)?;
    let application = into_application(record)?;

    state
        .changes
        .publish(user.user_id, ChangeNotice::Updated(application.id));
    info!(owner_id = %user.user_id, application_id = %application.id, "application updated");

    Ok(Json(application))
}

pub async fn update_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
    Json(patch): Json<StatusPatch>,
) -> AppResult<Json<Application>> {
    let status = patch
        .status
        .parse::<ApplicationStatus>()
        .map_err(|err| FieldError::new("status", err.to_string()))?;
    let mut conn = state.db()?;

    let record: ApplicationRecord = diesel::update(
        applications::table
            .filter(applications::id.eq(application_id))
            .filter(applications::owner_id.eq(user.user_id)),
    )
    .set((
        applications::status.eq(status.label()),
        applications::updated_at.eq(Utc::now().naive_utc()),
    ))
    .get_result::<ApplicationRecord>(&mut conn)
    .optional()?
    .ok_or_else(AppError::not_found)?;
    let application = into_application(record)?;

    state
        .changes
        .publish(user.user_id, ChangeNotice::Updated(application.id));
    info!(
        owner_id = %user.user_id,
        application_id = %application.id,
        status = %status,
        "application status changed"
    );

    Ok(Json(application))
}

pub async fn delete_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> AppResult<StatusCode> {
    if !query.confirm {
        return Err(AppError::confirmation_required());
    }

    let mut conn = state.db()?;
    let deleted = diesel::delete(
        applications::table
            .filter(applications::id.eq(application_id))
            .filter(applications::owner_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;

    if deleted == 0 {
        return Err(AppError::not_found());
    }

    state
        .changes
        .publish(user.user_id, ChangeNotice::Deleted(application_id));
    info!(owner_id = %user.user_id, application_id = %application_id, "application deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Snapshot loader backed by the connection pool.
pub struct PgSnapshots {
    pool: PgPool,
}

impl PgSnapshots {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotSource for PgSnapshots {
    async fn snapshot(&self, owner: Uuid) -> AppResult<Vec<Application>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| AppError::internal(format!("database pool error: {err}")))?;
            load_owned_applications(&mut conn, owner)
        })
        .await
        .map_err(|err| AppError::internal(format!("snapshot task failed: {err}")))?
    }
}

fn to_sse(event: &FeedEvent) -> Event {
    match Event::default().event(event.name()).json_data(event) {
        Ok(sse) => sse,
        Err(err) => {
            warn!(error = %err, "failed to encode feed event");
            Event::default().event("error").data("{\"type\":\"error\"}")
        }
    }
}

pub async fn stream_applications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if !state.sessions.is_signed_in(user.session_id) {
        let mut conn = state.db()?;
        if !session_is_active(&mut conn, user.user_id, user.session_id)? {
            return Err(AppError::unauthorized());
        }
        state.sessions.sign_in(user.identity());
    }

    let observer = state
        .sessions
        .observe(user.session_id)
        .ok_or_else(AppError::unauthorized)?;
    let source: Arc<dyn SnapshotSource> = Arc::new(PgSnapshots::new(state.pool.clone()));
    let feed = LiveFeed::new(observer, state.changes.clone(), source);
    info!(owner_id = %user.user_id, session_id = %user.session_id, "live feed opened");

    let events = stream::unfold(feed, |mut feed| async move {
        let event = feed.next_event().await?;
        Some((Ok(to_sse(&event)), feed))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
