use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use super::{ApiResult, TrackerApi};
use crate::domain::Application;
use crate::feed::FeedEvent;
use crate::status::ApplicationStatus;
use crate::view::{sort_newest_first, ApplicationFilter, ApplicationStats};

/// Where the front end should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardRoute {
    /// No feed event yet; show a spinner, never the login screen.
    Loading,
    Ready,
    Login,
}

/// View model of the dashboard, driven by live feed events.
#[derive(Debug, Clone)]
pub struct ApplicationBoard {
    route: BoardRoute,
    applications: Vec<Application>,
    // Status changes sent but not yet reflected by a snapshot.
    pending_status: HashMap<Uuid, ApplicationStatus>,
    pub filter: ApplicationFilter,
    error: Option<String>,
}

impl Default for ApplicationBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBoard {
    pub fn new() -> Self {
        Self {
            route: BoardRoute::Loading,
            applications: Vec::new(),
            pending_status: HashMap::new(),
            filter: ApplicationFilter::default(),
            error: None,
        }
    }

    pub fn route(&self) -> BoardRoute {
        self.route
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Snapshot { mut applications } => {
                sort_newest_first(&mut applications);
                self.applications = applications;
                self.pending_status.clear();
                self.error = None;
                self.route = BoardRoute::Ready;
            }
            FeedEvent::Error {
                message,
                applications,
            } => {
                if self.applications.is_empty() {
                    self.applications = applications;
                }
                self.error = Some(message);
                self.route = BoardRoute::Ready;
            }
            FeedEvent::SignedOut => {
                self.applications.clear();
                self.pending_status.clear();
                self.error = None;
                self.route = BoardRoute::Login;
            }
            FeedEvent::Superseded => {
                self.error = Some("Live updates continue in another window.".to_string());
            }
        }
    }

    /// Every application with pending status changes applied.
    pub fn applications(&self) -> Vec<Application> {
        self.applications
            .iter()
            .map(|application| {
                let mut application = application.clone();
                if let Some(status) = self.pending_status.get(&application.id) {
                    application.status = *status;
                }
                application
            })
            .collect()
    }

    pub fn visible(&self) -> Vec<Application> {
        let all = self.applications();
        self.filter.apply(&all).into_iter().cloned().collect()
    }

    /// Counters over the whole list, regardless of the current filter.
    pub fn stats(&self) -> ApplicationStats {
        ApplicationStats::from_applications(&self.applications())
    }

    /// Sends a status patch and shows it immediately. The next snapshot
    /// replaces the optimistic value; a failed request reverts it.
    pub async fn update_status(
        &mut self,
        api: &dyn TrackerApi,
        id: Uuid,
        status: ApplicationStatus,
    ) -> ApiResult<()> {
        self.pending_status.insert(id, status);
        match api.update_status(id, status).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(application_id = %id, error = %err, "status update failed");
                self.pending_status.remove(&id);
                self.error = Some(format!("Failed to update status: {err}"));
                Err(err)
            }
        }
    }
}
