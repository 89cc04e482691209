use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::{jwt::JwtService, session::SessionRegistry},
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    feed::ChangeHub,
    storage::ObjectStorage,
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
    pub sessions: Arc<SessionRegistry>,
    pub changes: ChangeHub,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        let changes = ChangeHub::new(config.feed_channel_capacity);
        Self {
            pool,
            config: Arc::new(config),
            storage,
            jwt,
            sessions: Arc::new(SessionRegistry::new()),
            changes,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
