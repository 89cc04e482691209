//! Live query over one owner's applications.
//!
//! Writers publish a [`ChangeNotice`] on the [`ChangeHub`] after every
//! committed mutation. A [`LiveFeed`] holds a [`QuerySubscription`] for its
//! owner while its session is signed in and answers each notice with a full,
//! freshly loaded snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::session::{Identity, IdentityState, SessionObserver};
use crate::domain::Application;
use crate::error::AppResult;
use crate::view::sort_newest_first;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeNotice {
    Created(Uuid),
    Updated(Uuid),
    Deleted(Uuid),
}

type Channels = Arc<Mutex<HashMap<Uuid, broadcast::Sender<ChangeNotice>>>>;

fn lock(channels: &Channels) -> MutexGuard<'_, HashMap<Uuid, broadcast::Sender<ChangeNotice>>> {
    channels.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-owner fan-out of change notices.
#[derive(Clone)]
pub struct ChangeHub {
    channels: Channels,
    capacity: usize,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, owner: Uuid) -> QuerySubscription {
        let receiver = lock(&self.channels)
            .entry(owner)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(owner = %owner, "live query subscribed");
        QuerySubscription {
            owner,
            receiver: Some(receiver),
            channels: self.channels.clone(),
        }
    }

    pub fn publish(&self, owner: Uuid, notice: ChangeNotice) {
        if let Some(sender) = lock(&self.channels).get(&owner) {
            let _ = sender.send(notice);
        }
    }

    pub fn active_subscriptions(&self, owner: Uuid) -> usize {
        lock(&self.channels)
            .get(&owner)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// A live query registration. Dropping it unsubscribes.
pub struct QuerySubscription {
    owner: Uuid,
    receiver: Option<broadcast::Receiver<ChangeNotice>>,
    channels: Channels,
}

impl QuerySubscription {
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    async fn recv(&mut self) -> Result<ChangeNotice, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        let mut channels = lock(&self.channels);
        if channels
            .get(&self.owner)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&self.owner);
        }
        debug!(owner = %self.owner, "live query unsubscribed");
    }
}

/// Loads the complete, owner-scoped application list.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn snapshot(&self, owner: Uuid) -> AppResult<Vec<Application>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Snapshot {
        applications: Vec<Application>,
    },
    /// The snapshot could not be loaded; carries the last good list.
    Error {
        message: String,
        applications: Vec<Application>,
    },
    SignedOut,
    Superseded,
}

impl FeedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FeedEvent::Snapshot { .. } => "snapshot",
            FeedEvent::Error { .. } => "error",
            FeedEvent::SignedOut => "signed_out",
            FeedEvent::Superseded => "superseded",
        }
    }
}

/// The subscription lives inside the authenticated state, so leaving that
/// state always drops it.
pub enum FeedState {
    Unauthenticated,
    Authenticated {
        identity: Identity,
        subscription: QuerySubscription,
    },
}

enum Wake {
    Changed,
    Closed,
    IdentityChanged,
    IdentityGone,
    GenerationChanged,
}

pub struct LiveFeed {
    state: FeedState,
    observer: SessionObserver,
    hub: ChangeHub,
    source: Arc<dyn SnapshotSource>,
    last: Vec<Application>,
    refresh_pending: bool,
    finished: bool,
}

impl LiveFeed {
    pub fn new(observer: SessionObserver, hub: ChangeHub, source: Arc<dyn SnapshotSource>) -> Self {
        let state = match observer.current() {
            IdentityState::SignedIn(identity) => FeedState::Authenticated {
                subscription: hub.subscribe(identity.user_id),
                identity,
            },
            IdentityState::SignedOut => FeedState::Unauthenticated,
        };
        Self {
            state,
            observer,
            hub,
            source,
            last: Vec::new(),
            refresh_pending: true,
            finished: false,
        }
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            FeedState::Authenticated { identity, .. } => Some(identity),
            FeedState::Unauthenticated => None,
        }
    }

    /// Waits for the next event. `None` once the feed has ended.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        loop {
            if self.finished {
                return None;
            }

            let owner = match &self.state {
                FeedState::Unauthenticated => {
                    self.finished = true;
                    return Some(FeedEvent::SignedOut);
                }
                FeedState::Authenticated { identity, .. } => identity.user_id,
            };

            if self.refresh_pending {
                self.refresh_pending = false;
                return Some(self.load(owner).await);
            }

            match self.wait().await {
                Wake::Changed => self.refresh_pending = true,
                Wake::Closed => {
                    self.state = FeedState::Unauthenticated;
                    self.finished = true;
                    return None;
                }
                Wake::IdentityChanged => match self.observer.current() {
                    IdentityState::SignedIn(identity) => self.reauthenticate(identity),
                    IdentityState::SignedOut => self.state = FeedState::Unauthenticated,
                },
                Wake::IdentityGone => self.state = FeedState::Unauthenticated,
                Wake::GenerationChanged => {
                    if !self.observer.is_current() {
                        debug!(owner = %owner, "live feed superseded");
                        self.state = FeedState::Unauthenticated;
                        self.finished = true;
                        return Some(FeedEvent::Superseded);
                    }
                }
            }
        }
    }

    async fn wait(&mut self) -> Wake {
        let FeedState::Authenticated { subscription, .. } = &mut self.state else {
            return Wake::IdentityGone;
        };
        let observer = &mut self.observer;

        tokio::select! {
            changed = observer.identity.changed() => {
                if changed.is_ok() { Wake::IdentityChanged } else { Wake::IdentityGone }
            }
            changed = observer.generation_rx.changed() => {
                if changed.is_ok() { Wake::GenerationChanged } else { Wake::IdentityGone }
            }
            notice = subscription.recv() => match notice {
                Ok(_) | Err(RecvError::Lagged(_)) => Wake::Changed,
                Err(RecvError::Closed) => Wake::Closed,
            },
        }
    }

    fn reauthenticate(&mut self, identity: Identity) {
        match &mut self.state {
            FeedState::Authenticated {
                identity: current, ..
            } if current.user_id == identity.user_id => {
                *current = identity;
            }
            _ => {
                self.state = FeedState::Unauthenticated;
                self.last.clear();
                self.state = FeedState::Authenticated {
                    subscription: self.hub.subscribe(identity.user_id),
                    identity,
                };
                self.refresh_pending = true;
            }
        }
    }

    async fn load(&mut self, owner: Uuid) -> FeedEvent {
        match self.source.snapshot(owner).await {
            Ok(mut applications) => {
                sort_newest_first(&mut applications);
                self.last = applications.clone();
                FeedEvent::Snapshot { applications }
            }
            Err(err) => {
                warn!(owner = %owner, error = %err, "failed to load application snapshot");
                FeedEvent::Error {
                    message: "Failed to load your applications.".to_string(),
                    applications: self.last.clone(),
                }
            }
        }
    }
}
