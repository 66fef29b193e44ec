//! Pending interactions and their one-shot resolutions.

use core::fmt;
use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::dispatcher::ForegroundDispatcher;
use super::messages::{ForegroundMessage, InteractionRecord, PushEventDataMsg};
use crate::error::{Error, Result};
use crate::id::RandomIdGenerator;

type Resolution = Result<Value>;

/// One map entry per id keeps record and resolver consistent.
struct Pending {
    record: InteractionRecord,
    resolver: oneshot::Sender<Resolution>,
}

type WaitingMap = Arc<Mutex<HashMap<String, Pending>>>;

/// Correlates requests with the decisions the UI makes about them.
///
/// Share it behind an [`Arc`]: requests suspend in one task while
/// [`approve`](Self::approve) and [`reject`](Self::reject) arrive from others.
pub struct InteractionService {
    ids: RandomIdGenerator,
    dispatcher: Arc<dyn ForegroundDispatcher>,
    timeout: Option<Duration>,
    waiting: WaitingMap,
}

impl fmt::Debug for InteractionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionService")
            .field("timeout", &self.timeout)
            .field("pending", &self.waiting.lock().len())
            .finish_non_exhaustive()
    }
}

impl InteractionService {
    /// Creates a registry that waits for decisions without a deadline.
    pub fn new(ids: RandomIdGenerator, dispatcher: Arc<dyn ForegroundDispatcher>) -> Self {
        Self {
            ids,
            dispatcher,
            timeout: None,
            waiting: Arc::default(),
        }
    }

    /// Sets how long a request waits before failing with
    /// [`Error::InteractionTimedOut`].
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pushes a one-way event to `port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyInteractionType`] if `event_type` is empty.
    /// Delivery failures are logged, not returned.
    pub fn dispatch_event(&self, port: &str, event_type: &str, payload: Value) -> Result<()> {
        if event_type.is_empty() {
            return Err(Error::EmptyInteractionType);
        }

        let message = ForegroundMessage::PushEventData(PushEventDataMsg {
            event_type: event_type.to_string(),
            payload,
        });
        if let Err(e) = self.dispatcher.send(port, message) {
            warn!(port, event_type, error = %e, "failed to push event");
        }
        Ok(())
    }

    /// Registers a request and tells the UI about it.
    ///
    /// The push to `port` and `notify_ui` both run before this returns, so the
    /// UI knows about the request before anyone can resolve it. Await the
    /// returned [`PendingInteraction`] for the decision.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyInteractionType`] if `interaction_type` is empty
    /// - [`Error::DuplicateInteractionId`] if the generated id is already pending
    pub fn request_interaction(
        &self,
        port: &str,
        interaction_type: &str,
        is_internal: bool,
        payload: Value,
        notify_ui: impl FnOnce(),
    ) -> Result<PendingInteraction> {
        if interaction_type.is_empty() {
            return Err(Error::EmptyInteractionType);
        }

        let id = self.ids.generate();
        let record = InteractionRecord {
            id: id.clone(),
            interaction_type: interaction_type.to_string(),
            is_internal,
            payload,
        };
        let (resolver, receiver) = oneshot::channel();

        {
            let mut waiting = self.waiting.lock();
            if waiting.contains_key(&id) {
                error!(%id, "generated interaction id is already pending");
                return Err(Error::DuplicateInteractionId(id));
            }
            waiting.insert(
                id.clone(),
                Pending {
                    record: record.clone(),
                    resolver,
                },
            );
        }
        debug!(%id, interaction_type, is_internal, "interaction pending");

        let message = ForegroundMessage::PushInteractionData(record.into());
        if let Err(e) = self.dispatcher.send(port, message) {
            warn!(%id, port, error = %e, "failed to push interaction");
        }
        notify_ui();

        Ok(PendingInteraction {
            id,
            receiver: Some(receiver),
            timeout: self.timeout,
            waiting: Arc::clone(&self.waiting),
        })
    }

    /// Registers a request and waits for its decision.
    ///
    /// # Errors
    ///
    /// Everything [`request_interaction`](Self::request_interaction) and
    /// [`PendingInteraction::wait`] return.
    pub async fn request_interaction_and_wait(
        &self,
        port: &str,
        interaction_type: &str,
        is_internal: bool,
        payload: Value,
        notify_ui: impl FnOnce(),
    ) -> Result<Value> {
        self.request_interaction(port, interaction_type, is_internal, payload, notify_ui)?
            .wait()
            .await
    }

    /// Resolves `id` with `result`. Unknown ids are ignored.
    pub fn approve(&self, id: &str, result: Value) {
        self.resolve(id, Ok(result));
    }

    /// Resolves `id` with [`Error::Rejected`]. Unknown ids are ignored.
    pub fn reject(&self, id: &str) {
        self.resolve(id, Err(Error::Rejected));
    }

    /// Rejects every pending interaction of `interaction_type` and returns how
    /// many there were.
    pub fn reject_all(&self, interaction_type: &str) -> usize {
        let rejected: Vec<Pending> = {
            let mut waiting = self.waiting.lock();
            let ids: Vec<String> = waiting
                .values()
                .filter(|p| p.record.interaction_type == interaction_type)
                .map(|p| p.record.id.clone())
                .collect();
            ids.iter().filter_map(|id| waiting.remove(id)).collect()
        };

        let count = rejected.len();
        for pending in rejected {
            let _ = pending.resolver.send(Err(Error::Rejected));
        }
        if count > 0 {
            info!(interaction_type, count, "rejected pending interactions");
        }
        count
    }

    /// Snapshot of the pending interactions of `interaction_type`.
    #[must_use]
    pub fn pending_interactions(&self, interaction_type: &str) -> Vec<InteractionRecord> {
        self.waiting
            .lock()
            .values()
            .filter(|p| p.record.interaction_type == interaction_type)
            .map(|p| p.record.clone())
            .collect()
    }

    /// Number of pending interactions of any type.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.waiting.lock().len()
    }

    fn resolve(&self, id: &str, resolution: Resolution) {
        let Some(pending) = self.waiting.lock().remove(id) else {
            debug!(id, "ignoring decision for unknown interaction");
            return;
        };

        let approved = resolution.is_ok();
        if pending.resolver.send(resolution).is_err() {
            debug!(id, "interaction was resolved after its caller left");
        }
        debug!(id, approved, "interaction resolved");
    }
}

/// A request waiting for its decision.
///
/// Dropping it without awaiting [`wait`](Self::wait) removes the request from
/// the registry.
#[must_use = "a pending interaction does nothing unless waited on"]
pub struct PendingInteraction {
    id: String,
    receiver: Option<oneshot::Receiver<Resolution>>,
    timeout: Option<Duration>,
    waiting: WaitingMap,
}

impl fmt::Debug for PendingInteraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingInteraction")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PendingInteraction {
    /// The id the UI answers with.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for approve or reject.
    ///
    /// # Errors
    ///
    /// - [`Error::Rejected`] if the interaction was rejected
    /// - [`Error::InteractionTimedOut`] if the timeout elapsed first
    /// - [`Error::InteractionAbandoned`] if the registry dropped the request
    pub async fn wait(mut self) -> Result<Value> {
        let Some(mut receiver) = self.receiver.take() else {
            return Err(Error::InteractionAbandoned(self.id.clone()));
        };

        let outcome = match self.timeout {
            None => receiver.await,
            Some(timeout) => match tokio::time::timeout(timeout, &mut receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if self.waiting.lock().remove(&self.id).is_some() {
                        warn!(id = %self.id, ?timeout, "interaction timed out");
                        return Err(Error::InteractionTimedOut(self.id.clone()));
                    }
                    // A decision raced the deadline and is already in the channel
                    receiver.await
                }
            },
        };

        outcome.unwrap_or_else(|_| Err(Error::InteractionAbandoned(self.id.clone())))
    }
}

impl Drop for PendingInteraction {
    fn drop(&mut self) {
        // Also covers a wait() future dropped mid-await
        if self.waiting.lock().remove(&self.id).is_some() {
            debug!(id = %self.id, "caller stopped waiting for interaction");
        }
    }
}
