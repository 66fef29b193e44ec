//! Routes typed background requests to the service that owns them.
//!
//! Requests and responses are closed enums tagged by `type`, so a new message
//! kind is a compile error until every match handles it.
//!
//! Approving, rejecting and listing interactions is reserved for the wallet's
//! own pages. A web page that sends one gets [`Error::PermissionDenied`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::env::RequestEnv;
use crate::error::{Error, ErrorReport, Result};
use crate::interaction::{InteractionRecord, InteractionService};
use crate::messaging::MessagingService;

/// A request from another context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum BackgroundRequest {
    /// Resolves a pending interaction with `result`. Wallet pages only.
    ApproveInteraction {
        /// Interaction id.
        id: String,
        /// Value handed to the waiting caller.
        result: Value,
    },
    /// Rejects one pending interaction. Wallet pages only.
    RejectInteraction {
        /// Interaction id.
        id: String,
    },
    /// Rejects every pending interaction of a type. Wallet pages only.
    RejectAllInteractions {
        /// Interaction type, e.g. `request-sign`.
        interaction_type: String,
    },
    /// Lists pending interactions of a type. Wallet pages only.
    GetPendingInteractions {
        /// Interaction type, e.g. `request-sign`.
        interaction_type: String,
    },
    /// Base64 compressed messaging public key for a chain.
    GetMessagingPublicKey {
        /// Chain the messaging key is derived for.
        chain_id: String,
    },
    /// Encrypts a base64 message to another account's messaging key.
    EncryptMessagingMessage {
        /// Chain the messaging key is derived for.
        chain_id: String,
        /// Bech32 address of the recipient.
        target_address: String,
        /// Base64 plaintext.
        message: String,
    },
    /// Decrypts a base64 ciphertext addressed to this chain's messaging key.
    DecryptMessagingMessage {
        /// Chain the messaging key is derived for.
        chain_id: String,
        /// Base64 ciphertext.
        cipher_text: String,
    },
    /// Signs the SHA-256 of a base64 payload with the messaging key.
    SignMessagingPayload {
        /// Chain the messaging key is derived for.
        chain_id: String,
        /// Base64 payload.
        payload: String,
    },
}

impl BackgroundRequest {
    /// The wire tag, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ApproveInteraction { .. } => "approve-interaction",
            Self::RejectInteraction { .. } => "reject-interaction",
            Self::RejectAllInteractions { .. } => "reject-all-interactions",
            Self::GetPendingInteractions { .. } => "get-pending-interactions",
            Self::GetMessagingPublicKey { .. } => "get-messaging-public-key",
            Self::EncryptMessagingMessage { .. } => "encrypt-messaging-message",
            Self::DecryptMessagingMessage { .. } => "decrypt-messaging-message",
            Self::SignMessagingPayload { .. } => "sign-messaging-payload",
        }
    }

    const fn requires_internal(&self) -> bool {
        matches!(
            self,
            Self::ApproveInteraction { .. }
                | Self::RejectInteraction { .. }
                | Self::RejectAllInteractions { .. }
                | Self::GetPendingInteractions { .. }
        )
    }
}

/// The answer to a [`BackgroundRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum BackgroundResponse {
    /// The request was applied.
    Ack,
    /// Number of interactions rejected.
    Count(usize),
    /// Snapshot of pending interactions.
    Interactions(Vec<InteractionRecord>),
    /// Base64 compressed public key.
    PublicKey(String),
    /// Base64 ciphertext.
    CipherText(String),
    /// Base64 plaintext.
    Message(String),
    /// Base64 compact signature.
    Signature(String),
    /// The request failed.
    Error(ErrorReport),
}

/// Dispatches requests to the interaction registry and the messaging service.
#[derive(Debug, Clone)]
pub struct Router {
    interactions: Arc<InteractionService>,
    messaging: Arc<MessagingService>,
}

impl Router {
    pub fn new(interactions: Arc<InteractionService>, messaging: Arc<MessagingService>) -> Self {
        Self {
            interactions,
            messaging,
        }
    }

    /// Handles one request. Failures come back as [`BackgroundResponse::Error`].
    pub async fn handle(&self, env: &RequestEnv, request: BackgroundRequest) -> BackgroundResponse {
        let kind = request.kind();
        debug!(kind, origin = %env.origin, "handling request");

        match self.dispatch(env, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(kind, module = e.module(), code = e.code(), error = %e, "request failed");
                BackgroundResponse::Error(e.report())
            }
        }
    }

    /// Handles a JSON-encoded request and returns the JSON-encoded response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JsonError`] only if the response cannot be serialized.
    /// A request that does not parse is answered with an error response.
    pub async fn handle_json(&self, env: &RequestEnv, json: &str) -> Result<String> {
        let response = match serde_json::from_str::<BackgroundRequest>(json) {
            Ok(request) => self.handle(env, request).await,
            Err(e) => {
                warn!(origin = %env.origin, error = %e, "unparseable request");
                BackgroundResponse::Error(Error::from(e).report())
            }
        };
        Ok(serde_json::to_string(&response)?)
    }

    async fn dispatch(&self, env: &RequestEnv, request: BackgroundRequest) -> Result<BackgroundResponse> {
        if request.requires_internal() && !env.is_internal {
            return Err(Error::PermissionDenied(format!(
                "{} is only accepted from the wallet",
                request.kind()
            )));
        }

        match request {
            BackgroundRequest::ApproveInteraction { id, result } => {
                self.interactions.approve(&id, result);
                Ok(BackgroundResponse::Ack)
            }
            BackgroundRequest::RejectInteraction { id } => {
                self.interactions.reject(&id);
                Ok(BackgroundResponse::Ack)
            }
            BackgroundRequest::RejectAllInteractions { interaction_type } => Ok(
                BackgroundResponse::Count(self.interactions.reject_all(&interaction_type)),
            ),
            BackgroundRequest::GetPendingInteractions { interaction_type } => Ok(
                BackgroundResponse::Interactions(
                    self.interactions.pending_interactions(&interaction_type),
                ),
            ),
            BackgroundRequest::GetMessagingPublicKey { chain_id } => self
                .messaging
                .get_public_key(env, &chain_id)
                .await
                .map(BackgroundResponse::PublicKey),
            BackgroundRequest::EncryptMessagingMessage {
                chain_id,
                target_address,
                message,
            } => self
                .messaging
                .encrypt_message(env, &chain_id, &target_address, &message)
                .await
                .map(BackgroundResponse::CipherText),
            BackgroundRequest::DecryptMessagingMessage {
                chain_id,
                cipher_text,
            } => self
                .messaging
                .decrypt_message(env, &chain_id, &cipher_text)
                .await
                .map(BackgroundResponse::Message),
            BackgroundRequest::SignMessagingPayload { chain_id, payload } => self
                .messaging
                .sign(env, &chain_id, &payload)
                .await
                .map(BackgroundResponse::Signature),
        }
    }
}
