//! Interactions: requests that wait for a human decision made in another
//! context.
//!
//! A caller asks the [`InteractionService`] for approval. The service stores
//! the request under a fresh id, pushes a [`ForegroundMessage`] to the UI port
//! and suspends the caller. Whoever renders the UI later calls
//! [`InteractionService::approve`] or [`InteractionService::reject`] with that
//! id, and the caller wakes up with exactly one outcome.
//!
//! ```
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use wallet_background_core::id::RandomIdGenerator;
//! use wallet_background_core::interaction::{ChannelDispatcher, InteractionService};
//!
//! let dispatcher = Arc::new(ChannelDispatcher::new());
//! let service = InteractionService::new(RandomIdGenerator::default(), dispatcher);
//!
//! let pending = service
//!     .request_interaction("popup", "request-sign", false, json!({}), || {})
//!     .unwrap();
//! service.approve(pending.id(), json!("ok"));
//! assert_eq!(pending.wait().await.unwrap(), json!("ok"));
//! # });
//! ```

pub mod dispatcher;
pub mod messages;
pub mod registry;

pub use self::dispatcher::{ChannelDispatcher, DispatchError, ForegroundDispatcher};
pub use self::messages::{
    ForegroundMessage, InteractionRecord, PushEventDataMsg, PushInteractionDataMsg,
};
pub use self::registry::{InteractionService, PendingInteraction};
