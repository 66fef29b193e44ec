//! The calling context of a request.

use serde::{Deserialize, Serialize};

/// Where a request came from.
///
/// Internal requests originate in the wallet's own pages (popup, options,
/// background). Everything else is a web page going through a content script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnv {
    /// Whether the request came from the wallet itself.
    pub is_internal: bool,
    /// The sender origin, e.g. `https://app.example`.
    pub origin: String,
}

impl RequestEnv {
    /// A request from the wallet's own pages.
    #[must_use]
    pub fn internal() -> Self {
        Self {
            is_internal: true,
            origin: "extension".to_string(),
        }
    }

    /// A request from a web page.
    #[must_use]
    pub fn external(origin: impl Into<String>) -> Self {
        Self {
            is_internal: false,
            origin: origin.into(),
        }
    }
}
