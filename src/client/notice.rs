use std::time::{Duration, Instant};

/// How long success and inline error messages stay on screen.
pub const TRANSIENT_NOTICE_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
    /// Must be acknowledged by the user; never expires on its own.
    Blocking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    shown_at: Instant,
    ttl: Option<Duration>,
}

impl Notice {
    pub fn success(message: impl Into<String>, now: Instant) -> Self {
        Self::transient(NoticeKind::Success, message, now)
    }

    pub fn error(message: impl Into<String>, now: Instant) -> Self {
        Self::transient(NoticeKind::Error, message, now)
    }

    pub fn blocking(message: impl Into<String>, now: Instant) -> Self {
        Self {
            kind: NoticeKind::Blocking,
            message: message.into(),
            shown_at: now,
            ttl: None,
        }
    }

    fn transient(kind: NoticeKind, message: impl Into<String>, now: Instant) -> Self {
        Self {
            kind,
            message: message.into(),
            shown_at: now,
            ttl: Some(TRANSIENT_NOTICE_TTL),
        }
    }

    pub fn is_visible(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.shown_at) < ttl,
            None => true,
        }
    }
}
