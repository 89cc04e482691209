//! In-process identity observer.
//!
//! Each signed-in session owns a `watch` channel carrying its current
//! [`IdentityState`]. Live feeds subscribe to it and tear themselves down the
//! moment the session signs out. A second channel counts feed generations
//! so that opening a new feed for a session supersedes the previous one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityState {
    SignedOut,
    SignedIn(Identity),
}

struct SessionChannels {
    identity: watch::Sender<IdentityState>,
    generation: watch::Sender<u64>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionChannels>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SessionChannels>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the session, or republishes its identity if it is known.
    pub fn sign_in(&self, identity: Identity) {
        let mut sessions = self.lock();
        let session_id = identity.session_id;
        match sessions.get(&session_id) {
            Some(channels) => {
                channels
                    .identity
                    .send_if_modified(|state| match state {
                        IdentityState::SignedIn(current) if *current == identity => false,
                        _ => {
                            *state = IdentityState::SignedIn(identity.clone());
                            true
                        }
                    });
            }
            None => {
                let (identity_tx, _) = watch::channel(IdentityState::SignedIn(identity));
                let (generation_tx, _) = watch::channel(0);
                sessions.insert(
                    session_id,
                    SessionChannels {
                        identity: identity_tx,
                        generation: generation_tx,
                    },
                );
                debug!(session_id = %session_id, "session registered");
            }
        }
    }

    /// Publishes `SignedOut` to every observer and forgets the session.
    pub fn sign_out(&self, session_id: Uuid) -> bool {
        let removed = self.lock().remove(&session_id);
        match removed {
            Some(channels) => {
                channels.identity.send_replace(IdentityState::SignedOut);
                debug!(session_id = %session_id, "session signed out");
                true
            }
            None => false,
        }
    }

    /// Republishes the identity of every session belonging to `user_id`.
    pub fn update_email(&self, user_id: Uuid, email: &str) {
        for channels in self.lock().values() {
            channels.identity.send_if_modified(|state| match state {
                IdentityState::SignedIn(identity)
                    if identity.user_id == user_id && identity.email != email =>
                {
                    identity.email = email.to_string();
                    true
                }
                _ => false,
            });
        }
    }

    pub fn is_signed_in(&self, session_id: Uuid) -> bool {
        self.lock().contains_key(&session_id)
    }

    /// Starts observing a session. Any observer opened earlier for the same
    /// session sees itself superseded.
    pub fn observe(&self, session_id: Uuid) -> Option<SessionObserver> {
        let sessions = self.lock();
        let channels = sessions.get(&session_id)?;
        let mut generation = 0;
        channels.generation.send_modify(|current| {
            *current += 1;
            generation = *current;
        });
        Some(SessionObserver {
            identity: channels.identity.subscribe(),
            generation_rx: channels.generation.subscribe(),
            generation,
        })
    }
}

pub struct SessionObserver {
    pub(crate) identity: watch::Receiver<IdentityState>,
    pub(crate) generation_rx: watch::Receiver<u64>,
    generation: u64,
}

impl SessionObserver {
    pub fn current(&self) -> IdentityState {
        self.identity.borrow().clone()
    }

    /// False once a newer observer was opened for the same session.
    pub fn is_current(&self) -> bool {
        *self.generation_rx.borrow() == self.generation
    }
}
