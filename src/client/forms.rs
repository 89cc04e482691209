use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, warn};
use uuid::Uuid;

use super::notice::Notice;
use super::{ApiError, ApiResult, TrackerApi};
use crate::domain::Application;
use crate::status::ApplicationStatus;
use crate::validation::{ApplicationDraft, ValidationErrors, APPLIED_DATE_FORMAT};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("a submission is already in progress")]
    InFlight,
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// State behind the "add application" form.
///
/// Submission is split into [`begin_submit`](Self::begin_submit) and
/// [`complete_submit`](Self::complete_submit) so a caller can drop the form
/// while the request is in flight and simply never complete it.
#[derive(Debug, Clone)]
pub struct ApplicationForm {
    pub draft: ApplicationDraft,
    in_flight: bool,
    notice: Option<Notice>,
}

fn blank_draft(today: NaiveDate) -> ApplicationDraft {
    ApplicationDraft {
        company: String::new(),
        role: String::new(),
        status: Some(ApplicationStatus::default().label().to_string()),
        applied_date: Some(today.format(APPLIED_DATE_FORMAT).to_string()),
        note: None,
    }
}

impl ApplicationForm {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            draft: blank_draft(today),
            in_flight: false,
            notice: None,
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight
    }

    pub fn notice(&self, now: Instant) -> Option<&Notice> {
        self.notice.as_ref().filter(|notice| notice.is_visible(now))
    }

    /// Validates locally and marks the form as submitting. Nothing is sent
    /// when this fails.
    pub fn begin_submit(&mut self, now: Instant) -> Result<ApplicationDraft, SubmitError> {
        if self.in_flight {
            return Err(SubmitError::InFlight);
        }
        if let Err(errors) = self.draft.validate() {
            if let Some(first) = errors.first() {
                self.notice = Some(Notice::error(first.message.clone(), now));
            }
            return Err(SubmitError::Invalid(errors));
        }
        self.in_flight = true;
        self.notice = None;
        Ok(self.draft.clone())
    }

    /// Applies the outcome of a submission started with `begin_submit`.
    pub fn complete_submit(
        &mut self,
        result: ApiResult<Application>,
        today: NaiveDate,
        now: Instant,
    ) -> Result<Application, SubmitError> {
        self.in_flight = false;
        match result {
            Ok(application) => {
                self.draft = blank_draft(today);
                self.notice = Some(Notice::success("Application added successfully!", now));
                debug!(application_id = %application.id, "application submitted");
                Ok(application)
            }
            Err(err) => {
                warn!(error = %err, "application submission failed");
                self.notice = Some(Notice::error(
                    format!("Failed to add application: {err}"),
                    now,
                ));
                Err(SubmitError::Api(err))
            }
        }
    }

    pub async fn submit(
        &mut self,
        api: &dyn TrackerApi,
        today: NaiveDate,
    ) -> Result<Application, SubmitError> {
        let draft = self.begin_submit(Instant::now())?;
        let result = api.create_application(&draft).await;
        self.complete_submit(result, today, Instant::now())
    }
}

#[derive(Debug)]
pub enum DeleteOutcome {
    /// The user declined; no request was made.
    Cancelled,
    Deleted,
    Failed(Notice),
}

/// Deletes `id` only after `confirm` approves the prompt it is shown.
pub async fn delete_with_confirmation<F>(
    api: &dyn TrackerApi,
    id: Uuid,
    confirm: F,
) -> DeleteOutcome
where
    F: FnOnce(&str) -> bool,
{
    if !confirm("Are you sure you want to delete this application?") {
        return DeleteOutcome::Cancelled;
    }
    match api.delete_application(id).await {
        Ok(()) => DeleteOutcome::Deleted,
        Err(err) => {
            warn!(application_id = %id, error = %err, "failed to delete application");
            DeleteOutcome::Failed(Notice::blocking(
                "Failed to delete application",
                Instant::now(),
            ))
        }
    }
}
