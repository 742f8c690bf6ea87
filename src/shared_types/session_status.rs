use serde::{Deserialize, Serialize};
use std::fmt;

// -----------------------------------------------------------------------------
// ----- SessionStatus ---------------------------------------------------------

/// Connection state of one linked device as the gateway reports it.
///
/// `Pairing` is the only state in which a pairing payload exists; every other
/// state carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Not linked. Also the resting state of an expired or cancelled pairing.
    Disconnected,

    /// The gateway issued a pairing payload and is waiting for a scan.
    Pairing,

    /// The device is linked and the gateway confirms the connection.
    Connected,
}

// -----------------------------------------------------------------------------
// ----- SessionStatus: Static -------------------------------------------------

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Pairing => "pairing",
            SessionStatus::Connected => "connected",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
