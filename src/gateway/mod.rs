pub mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use serde::Deserialize;
use std::{future::Future, time::Duration};

use crate::errors::GatewayError;
use crate::shared_types::SessionStatus;

// -----------------------------------------------------------------------------
// ----- SessionGateway --------------------------------------------------------

/// Client side of the external messaging gateway.
///
/// Implementations never retry; callers own the retry policy and the
/// deadline (see [`within`]).
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Ask for a new session, or the existing one the hint points at.
    async fn start(&self, hint: &str) -> Result<StartReply, GatewayError>;

    /// Current state. `force` bypasses the provider-side cache.
    async fn status(&self, session_name: &str, force: bool) -> Result<StatusReply, GatewayError>;

    /// Best effort. Success does not prove the session went down; re-poll.
    async fn disconnect(&self, session_name: &str) -> Result<(), GatewayError>;
}

// -----------------------------------------------------------------------------
// ----- Replies ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReply {
    pub session_name: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub pairing_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub status: SessionStatus,
    #[serde(default)]
    pub pairing_image: Option<String>,
}

impl StatusReply {
    pub fn connected() -> Self {
        Self {
            status: SessionStatus::Connected,
            pairing_image: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: SessionStatus::Disconnected,
            pairing_image: None,
        }
    }

    pub fn pairing(image: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Pairing,
            pairing_image: Some(image.into()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Deadline --------------------------------------------------------------

/// Run one gateway call under a caller-imposed deadline. An elapsed deadline
/// is a transient `Unavailable`, never evidence of any session state.
pub async fn within<T, F>(deadline: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::unavailable(format!(
            "no reply within {}",
            humantime::format_duration(deadline)
        ))),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
