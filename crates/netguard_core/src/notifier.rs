//! Change notifier for observing committed mutations.
//!
//! Every commit made through the orchestrator goes through
//! [`ChangeNotifier::commit_and_publish`], which commits and publishes under
//! one lock. Events therefore enter the history and every subscriber queue
//! in commit order, and a subscriber never sees an identity's versions go
//! backwards.
//!
//! # Usage
//!
//! ```rust,ignore
//! use netguard_core::{Kind, WatchFilter};
//!
//! // The enforcement client only cares about compiled rules.
//! let rules = orchestrator
//!     .notifier()
//!     .subscribe(WatchFilter::kind(Kind::IeAgAgRule));
//!
//! std::thread::spawn(move || {
//!     while let Some(event) = rules.recv() {
//!         push_to_enforcement(event);
//!     }
//! });
//! ```

use netguard_store::{
    ChangeType, CommitOutcome, Record, ResourceKey, ResourceStore, ResourceVersion, Transaction,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::NetguardResult;
use crate::model::{Kind, ObjectRef, Resource};

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// The object was created, or is being replayed from current state.
    Added,
    /// The object was replaced.
    Modified,
    /// The object was deleted.
    Deleted,
}

impl From<ChangeType> for EventType {
    fn from(change: ChangeType) -> Self {
        match change {
            ChangeType::Created => EventType::Added,
            ChangeType::Updated => EventType::Modified,
            ChangeType::Deleted => EventType::Deleted,
        }
    }
}

/// A committed change to one object.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    /// What happened.
    pub event_type: EventType,
    /// Kind of the object.
    pub kind: Kind,
    /// Identity of the object.
    pub object: ObjectRef,
    /// Version of the commit that made the change.
    pub resource_version: ResourceVersion,
    /// The object as written; for deletes, its last state.
    pub resource: Resource,
}

impl WatchEvent {
    fn from_resource(event_type: EventType, resource: Resource, version: ResourceVersion) -> Self {
        Self {
            event_type,
            kind: resource.kind(),
            object: resource.object_ref(),
            resource_version: version,
            resource,
        }
    }

    fn key(&self) -> ResourceKey {
        self.object.key(self.kind)
    }
}

/// Selects events by kind and namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchFilter {
    /// Only this kind, if set.
    pub kind: Option<Kind>,
    /// Only this namespace, if set.
    pub namespace: Option<String>,
}

impl WatchFilter {
    /// Matches every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches one kind.
    #[must_use]
    pub fn kind(kind: Kind) -> Self {
        Self {
            kind: Some(kind),
            namespace: None,
        }
    }

    /// Restricts to one namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Returns true if `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &WatchEvent) -> bool {
        self.kind.map_or(true, |k| k == event.kind)
            && self
                .namespace
                .as_deref()
                .map_or(true, |ns| ns == event.object.namespace)
    }
}

/// A live event stream.
///
/// Events for one identity arrive in non-decreasing version order; an event
/// older than one already delivered for the same identity is dropped.
pub struct Subscription {
    rx: Receiver<WatchEvent>,
    last_seen: HashMap<ResourceKey, ResourceVersion>,
}

impl Subscription {
    fn new(rx: Receiver<WatchEvent>) -> Self {
        Self {
            rx,
            last_seen: HashMap::new(),
        }
    }

    fn admit(&mut self, event: &WatchEvent) -> bool {
        let key = event.key();
        match self.last_seen.get(&key) {
            Some(seen) if *seen > event.resource_version => false,
            _ => {
                self.last_seen.insert(key, event.resource_version);
                true
            }
        }
    }

    /// Blocks for the next event. Returns `None` once the notifier is gone.
    pub fn recv(&mut self) -> Option<WatchEvent> {
        loop {
            let event = self.rx.recv().ok()?;
            if self.admit(&event) {
                return Some(event);
            }
        }
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<WatchEvent> {
        loop {
            match self.rx.recv_timeout(timeout) {
                Ok(event) if self.admit(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Drains every event already queued.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if self.admit(&event) {
                events.push(event);
            }
        }
        events
    }
}

struct Subscriber {
    filter: WatchFilter,
    tx: Sender<WatchEvent>,
}

struct FeedState {
    subscribers: Vec<Subscriber>,
    history: VecDeque<WatchEvent>,
    /// Highest version evicted from `history`; replay from below it needs a relist.
    evicted_through: ResourceVersion,
}

/// Publishes committed mutations to subscribers and keeps a bounded
/// history for replay.
pub struct ChangeNotifier {
    store: Arc<dyn ResourceStore<Resource>>,
    state: Mutex<FeedState>,
    max_history: usize,
}

impl ChangeNotifier {
    /// Creates a notifier over `store` keeping `max_history` events.
    pub fn new(store: Arc<dyn ResourceStore<Resource>>, max_history: usize) -> Self {
        Self {
            store,
            state: Mutex::new(FeedState {
                subscribers: Vec::new(),
                history: VecDeque::new(),
                evicted_through: ResourceVersion::UNSET,
            }),
            max_history,
        }
    }

    /// Commits `txn` and publishes its changes before any other commit made
    /// through this notifier can publish.
    pub fn commit_and_publish(
        &self,
        txn: &mut Transaction<Resource>,
    ) -> NetguardResult<CommitOutcome<Resource>> {
        let mut state = self.state.lock();
        let outcome = self.store.commit(txn)?;
        for change in &outcome.changes {
            let event = WatchEvent::from_resource(
                change.change_type.into(),
                change.record.clone(),
                change.version,
            );
            Self::publish(&mut state, self.max_history, event);
        }
        debug!(
            version = %outcome.version,
            events = outcome.changes.len(),
            subscribers = state.subscribers.len(),
            "published commit"
        );
        Ok(outcome)
    }

    fn publish(state: &mut FeedState, max_history: usize, event: WatchEvent) {
        state.history.push_back(event.clone());
        while state.history.len() > max_history {
            if let Some(evicted) = state.history.pop_front() {
                state.evicted_through = evicted.resource_version;
            }
        }
        state.subscribers.retain(|sub| {
            if sub.filter.matches(&event) {
                sub.tx.send(event.clone()).is_ok()
            } else {
                true
            }
        });
        trace!(kind = %event.kind, object = %event.object, version = %event.resource_version, "event");
    }

    /// Subscribes to future events matching `filter`.
    pub fn subscribe(&self, filter: WatchFilter) -> Subscription {
        let (tx, rx) = mpsc::channel();
        self.state.lock().subscribers.push(Subscriber { filter, tx });
        Subscription::new(rx)
    }

    /// Subscribes and replays everything after `since`.
    ///
    /// If the history still holds every event after `since`, those events
    /// are replayed. Otherwise the current state of every matching object
    /// is replayed as `Added` events at its stored version. Live events
    /// follow without a gap.
    pub fn subscribe_from(&self, filter: WatchFilter, since: ResourceVersion) -> Subscription {
        let (tx, rx) = mpsc::channel();
        let mut state = self.state.lock();

        if since >= state.evicted_through {
            for event in state
                .history
                .iter()
                .filter(|e| e.resource_version > since && filter.matches(e))
            {
                let _ = tx.send(event.clone());
            }
        } else {
            let snapshot = self.store.snapshot();
            debug!(
                since = %since,
                evicted_through = %state.evicted_through,
                "history too short, relisting"
            );
            for (_, resource) in snapshot.iter() {
                let event = WatchEvent::from_resource(
                    EventType::Added,
                    resource.clone(),
                    resource.resource_version(),
                );
                if filter.matches(&event) {
                    let _ = tx.send(event);
                }
            }
        }

        state.subscribers.push(Subscriber { filter, tx });
        Subscription::new(rx)
    }

    /// Returns buffered events with version greater than `cursor`, up to
    /// `limit`.
    pub fn poll(&self, cursor: ResourceVersion, limit: usize) -> Vec<WatchEvent> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|e| e.resource_version > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest published version.
    pub fn latest_version(&self) -> ResourceVersion {
        self.state
            .lock()
            .history
            .back()
            .map_or(ResourceVersion::UNSET, |e| e.resource_version)
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Returns the number of buffered events.
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &state.subscribers.len())
            .field("history", &state.history.len())
            .field("max_history", &self.max_history)
            .finish()
    }
}
