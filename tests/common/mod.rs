use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use http_body_util::BodyExt;
use jobtracker::auth::jwt::{JwtService, TokenSubject};
use jobtracker::config::{AppConfig, DEFAULT_FEED_CHANNEL_CAPACITY};
use jobtracker::db::{self, PgPool};
use jobtracker::routes;
use jobtracker::state::AppState;
use jobtracker::storage::{ObjectStorage, StorageError, StorageResult};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    next_put_failure: Mutex<Option<StorageError>>,
    next_delete_failure: Mutex<Option<StorageError>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> StorageResult<()> {
        if let Some(err) = self.next_put_failure.lock().await.take() {
            return Err(err);
        }
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let guard = self.objects.lock().await;
        if !guard.contains_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        if let Some(err) = self.next_delete_failure.lock().await.take() {
            return Err(err);
        }
        let mut guard = self.objects.lock().await;
        guard
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }

    #[allow(dead_code)]
    pub async fn fail_next_put(&self, err: StorageError) {
        *self.next_put_failure.lock().await = Some(err);
    }

    #[allow(dead_code)]
    pub async fn fail_next_delete(&self, err: StorageError) {
        *self.next_delete_failure.lock().await = Some(err);
    }

    /// Removes an object behind the app's back.
    #[allow(dead_code)]
    pub async fn forget(&self, key: &str) {
        self.objects.lock().await.remove(key);
    }

    #[allow(dead_code)]
    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

/// A signed-up test user.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
    pub token: String,
    pub refresh_cookie: String,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    /// Builds the app against `TEST_DATABASE_URL`, or returns `None` when it
    /// is not set so database flows are skipped.
    pub async fn try_new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping database flow");
            return Ok(None);
        };

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            recent_login_window_minutes: 5,
            feed_channel_capacity: DEFAULT_FEED_CHANNEL_CAPACITY,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    /// Runs raw SQL against the test database.
    #[allow(dead_code)]
    pub async fn execute_sql(&self, sql: &'static str) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get connection: {err}"))?;
            conn.batch_execute(sql).context("failed to execute sql")?;
            Ok(())
        })
        .await
        .context("sql task panicked")?
    }

    #[allow(dead_code)]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<TestUser> {
        let response = self
            .post_json(
                "/api/auth/signup",
                &json!({
                    "display_name": "Test User",
                    "email": email,
                    "password": password,
                    "confirm_password": password,
                }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "signup failed with status {}",
            response.status()
        );
        session_from_response(response, &self.state.jwt).await
    }

    #[allow(dead_code)]
    pub async fn login(&self, email: &str, password: &str) -> Result<TestUser> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        session_from_response(response, &self.state.jwt).await
    }

    /// Mints an access token for an existing session with a chosen sign-in
    /// time.
    #[allow(dead_code)]
    pub fn token_authenticated_at(&self, user: &TestUser, at: DateTime<Utc>) -> Result<String> {
        self.state.jwt.generate_token(TokenSubject {
            user_id: user.user_id,
            email: &user.email,
            session_id: user.session_id,
            authenticated_at: at,
        })
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send(Method::POST, path, Some(serde_json::to_value(payload)?), token)
            .await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send(Method::PUT, path, Some(serde_json::to_value(payload)?), token)
            .await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send(Method::PATCH, path, Some(serde_json::to_value(payload)?), token)
            .await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn post_with_cookie(
        &self,
        path: &str,
        cookie: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::COOKIE, cookie);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn upload_photo(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/profile/photo")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Creates an application and returns its JSON.
    #[allow(dead_code)]
    pub async fn create_application(
        &self,
        token: &str,
        company: &str,
        status: &str,
        applied_date: &str,
    ) -> Result<Value> {
        let response = self
            .post_json(
                "/api/applications",
                &json!({
                    "company": company,
                    "role": "Engineer",
                    "status": status,
                    "applied_date": applied_date,
                }),
                Some(token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "create failed with status {}",
            response.status()
        );
        json_body(response).await
    }
}

async fn session_from_response(
    response: hyper::Response<Body>,
    jwt: &JwtService,
) -> Result<TestUser> {
    let refresh_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
        .context("missing refresh cookie")?;

    #[derive(Deserialize)]
    struct SessionBody {
        access_token: String,
    }
    let body: SessionBody = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
    let claims = jwt.verify_token(&body.access_token)?;

    Ok(TestUser {
        user_id: claims.sub,
        email: claims.email,
        session_id: claims.sid,
        token: body.access_token,
        refresh_cookie,
    })
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

#[allow(dead_code)]
pub const REJECT_PROFILE_UPDATES_SQL: &str = "
    CREATE OR REPLACE FUNCTION reject_profile_update() RETURNS trigger AS $$
    BEGIN
        RAISE EXCEPTION 'profile updates are disabled';
    END;
    $$ LANGUAGE plpgsql;
    CREATE TRIGGER reject_profile_update BEFORE UPDATE ON profiles
        FOR EACH ROW EXECUTE FUNCTION reject_profile_update();
";

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "DROP TRIGGER IF EXISTS reject_profile_update ON profiles;
         TRUNCATE TABLE applications, profiles, refresh_tokens, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
