use thiserror::Error;

use crate::shared_types::SessionKey;

// -----------------------------------------------------------------------------
// ----- GatewayError ----------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure, timeout or a 5xx from the provider.
    #[error("gateway unavailable: {reason}")]
    Unavailable { reason: String },

    /// The provider answered, but not with anything we can use.
    #[error("gateway rejected the request: {reason}")]
    Rejected { reason: String },
}

impl GatewayError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- StoreError ------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("store read failed: {reason}")]
    ReadFailed { reason: String },
}

impl StoreError {
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    pub fn read_failed(reason: impl Into<String>) -> Self {
        Self::ReadFailed {
            reason: reason.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- LifecycleError --------------------------------------------------------

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("pairing for {session} expired; request a new pairing")]
    PairingExpired { session: SessionKey },

    #[error("pairing code unavailable for {session}; request a refresh")]
    PairingCodeUnavailable { session: SessionKey },

    #[error("session {session} is not awaiting a scan")]
    NotAwaitingScan { session: SessionKey },

    #[error("unknown session {session}")]
    UnknownSession { session: SessionKey },

    #[error("session {session} was removed")]
    SessionRemoved { session: SessionKey },
}

impl LifecycleError {
    /// True for failures the next scheduled tick is expected to recover from.
    pub fn is_transient(&self) -> bool {
        matches!(self, LifecycleError::Gateway(_) | LifecycleError::Store(_))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
