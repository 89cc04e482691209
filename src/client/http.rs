use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{header, multipart, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::sse::{SseDecoder, SseMessage};
use super::{ApiError, ApiResult, ErrorBody, TrackerApi};
use crate::domain::{Account, Application, UserProfile};
use crate::feed::FeedEvent;
use crate::status::ApplicationStatus;
use crate::validation::{ApplicationDraft, ProfileForm, SignUpForm};
use crate::view::{ApplicationFilter, ApplicationStats, StatusFilter};

/// A signed-in session as returned by sign-up and login.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub expires_in: i64,
    pub account: Account,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationList {
    pub applications: Vec<Application>,
    pub stats: ApplicationStats,
}

#[derive(Deserialize)]
struct PhotoUploaded {
    photo_url: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct StatusPatch<'a> {
    status: &'a str,
}

#[derive(Clone)]
pub struct HttpTrackerClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTrackerClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> ApiResult<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| ApiError::Decode(format!("invalid request path {path}: {err}")))?;
        let builder = self.http.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    pub async fn signup(&mut self, form: &SignUpForm) -> ApiResult<Session> {
        let response = self
            .request(Method::POST, "/api/auth/signup")?
            .json(form)
            .send()
            .await?;
        let session: Session = decode(response).await?;
        self.token = Some(session.access_token.clone());
        Ok(session)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> ApiResult<Session> {
        let response = self
            .request(Method::POST, "/api/auth/login")?
            .json(&Credentials { email, password })
            .send()
            .await?;
        let session: Session = decode(response).await?;
        self.token = Some(session.access_token.clone());
        Ok(session)
    }

    pub async fn logout(&mut self) -> ApiResult<()> {
        let response = self.request(Method::POST, "/api/auth/logout")?.send().await?;
        ensure_success(response).await?;
        self.token = None;
        Ok(())
    }

    pub async fn list_applications(&self, filter: &ApplicationFilter) -> ApiResult<ApplicationList> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let StatusFilter::Only(status) = filter.status {
            query.push(("status", status.label()));
        }
        if !filter.search.trim().is_empty() {
            query.push(("q", filter.search.trim()));
        }
        let response = self
            .request(Method::GET, "/api/applications")?
            .query(&query)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn get_profile(&self) -> ApiResult<UserProfile> {
        let response = self.request(Method::GET, "/api/profile")?.send().await?;
        decode(response).await
    }

    /// Opens the live feed. The stream ends when the server closes it, which
    /// it does after `SignedOut` or `Superseded`.
    pub async fn subscribe(&self) -> ApiResult<BoxStream<'static, ApiResult<FeedEvent>>> {
        let response = self
            .request(Method::GET, "/api/applications/stream")?
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let bytes = Box::pin(response.bytes_stream());
        let pending: VecDeque<SseMessage> = VecDeque::new();
        Ok(stream::unfold(
            (bytes, SseDecoder::new(), pending),
            |(mut bytes, mut decoder, mut pending)| async move {
                loop {
                    if let Some(message) = pending.pop_front() {
                        let event = serde_json::from_str::<FeedEvent>(&message.data)
                            .map_err(|err| ApiError::Decode(err.to_string()));
                        return Some((event, (bytes, decoder, pending)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                        Some(Err(err)) => {
                            return Some((Err(ApiError::Transport(err)), (bytes, decoder, pending)))
                        }
                        None => return None,
                    }
                }
            },
        )
        .boxed())
    }
}

#[async_trait]
impl TrackerApi for HttpTrackerClient {
    async fn create_application(&self, draft: &ApplicationDraft) -> ApiResult<Application> {
        let response = self
            .request(Method::POST, "/api/applications")?
            .json(draft)
            .send()
            .await?;
        decode(response).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
    ) -> ApiResult<Application> {
        let response = self
            .request(Method::PATCH, &format!("/api/applications/{id}/status"))?
            .json(&StatusPatch {
                status: status.label(),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn delete_application(&self, id: Uuid) -> ApiResult<()> {
        let response = self
            .request(Method::DELETE, &format!("/api/applications/{id}"))?
            .query(&[("confirm", "true")])
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn save_profile(&self, form: &ProfileForm) -> ApiResult<UserProfile> {
        let response = self
            .request(Method::PUT, "/api/profile")?
            .json(form)
            .send()
            .await?;
        decode(response).await
    }

    async fn upload_photo(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> ApiResult<String> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let form = multipart::Form::new().part("file", part);
        let response = self
            .request(Method::POST, "/api/profile/photo")?
            .multipart(form)
            .send()
            .await?;
        let uploaded: PhotoUploaded = decode(response).await?;
        Ok(uploaded.photo_url)
    }
}

async fn ensure_success(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => ApiError::Rejected {
            status: status.as_u16(),
            code: parsed.code,
            message: parsed.error,
        },
        Err(_) => ApiError::Rejected {
            status: status.as_u16(),
            code: None,
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        },
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let response = ensure_success(response).await?;
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|err| ApiError::Decode(err.to_string()))
}
