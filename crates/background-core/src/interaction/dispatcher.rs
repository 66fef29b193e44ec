//! Best-effort delivery of [`ForegroundMessage`]s to named ports.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::debug;

use super::messages::ForegroundMessage;

/// Why a message did not reach its port.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// Nothing is listening on the port.
    #[error("no listener on port {0}")]
    UnknownPort(String),

    /// The listener went away.
    #[error("port {0} is closed")]
    Closed(String),
}

/// Sends messages to UI endpoints without waiting for them.
///
/// Callers log a failed delivery and carry on.
pub trait ForegroundDispatcher: Send + Sync {
    /// Queues `message` for `port`.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] if the message could not be queued.
    fn send(&self, port: &str, message: ForegroundMessage) -> Result<(), DispatchError>;
}

/// An in-process dispatcher with one unbounded channel per port.
#[derive(Debug, Default)]
pub struct ChannelDispatcher {
    ports: RwLock<HashMap<String, UnboundedSender<ForegroundMessage>>>,
}

impl ChannelDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for `port`, replacing any previous one.
    pub fn register(&self, port: &str) -> UnboundedReceiver<ForegroundMessage> {
        let (tx, rx) = unbounded_channel();
        if self.ports.write().insert(port.to_string(), tx).is_some() {
            debug!(port, "replaced foreground listener");
        }
        rx
    }

    /// Removes the listener for `port`.
    pub fn unregister(&self, port: &str) {
        self.ports.write().remove(port);
    }
}

impl ForegroundDispatcher for ChannelDispatcher {
    fn send(&self, port: &str, message: ForegroundMessage) -> Result<(), DispatchError> {
        let ports = self.ports.read();
        let tx = ports
            .get(port)
            .ok_or_else(|| DispatchError::UnknownPort(port.to_string()))?;
        tx.send(message)
            .map_err(|_| DispatchError::Closed(port.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::super::messages::PushEventDataMsg;
    use super::*;

    fn event(event_type: &str) -> ForegroundMessage {
        ForegroundMessage::PushEventData(PushEventDataMsg {
            event_type: event_type.to_string(),
            payload: Value::Null,
        })
    }

    #[test]
    fn delivers_to_registered_port() {
        let dispatcher = ChannelDispatcher::new();
        let mut rx = dispatcher.register("popup");

        dispatcher.send("popup", event("a")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), event("a"));
    }

    #[test]
    fn unknown_port() {
        let dispatcher = ChannelDispatcher::new();
        let result = dispatcher.send("popup", event("a"));
        assert!(matches!(result, Err(DispatchError::UnknownPort(ref p)) if p == "popup"));
    }

    #[test]
    fn dropped_listener_is_closed() {
        let dispatcher = ChannelDispatcher::new();
        drop(dispatcher.register("popup"));

        let result = dispatcher.send("popup", event("a"));
        assert!(matches!(result, Err(DispatchError::Closed(_))));
    }

    #[test]
    fn unregister_removes_port() {
        let dispatcher = ChannelDispatcher::new();
        let _rx = dispatcher.register("popup");
        dispatcher.unregister("popup");

        assert!(matches!(
            dispatcher.send("popup", event("a")),
            Err(DispatchError::UnknownPort(_))
        ));
    }
}
