use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{SessionKey, SessionStatus};

// -----------------------------------------------------------------------------
// ----- SessionRecord ---------------------------------------------------------

/// One linked device, exactly as the store persists it.
///
/// `pairing_image` and `pairing_issued_at` are set iff `status` is
/// `Pairing`. Build transitions through `to_pairing`, `to_connected` and
/// `to_disconnected`, which keep that invariant and advance `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub session_name: String,
    pub organization_id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub pairing_image: Option<String>,
    #[serde(default)]
    pub pairing_issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// ----- SessionRecord: Static -------------------------------------------------

impl SessionRecord {
    /// A fresh, disconnected record with a new random id.
    pub fn new(key: &SessionKey) -> Self {
        let now = Utc::now();

        Self {
            id: random_id(),
            session_name: key.session_name.clone(),
            organization_id: key.organization_id.clone(),
            status: SessionStatus::Disconnected,
            pairing_image: None,
            pairing_issued_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- SessionRecord: Public -------------------------------------------------

impl SessionRecord {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.organization_id, &self.session_name)
    }

    pub fn is_consistent(&self) -> bool {
        let has_payload = self.pairing_image.is_some() && self.pairing_issued_at.is_some();
        let has_no_payload = self.pairing_image.is_none() && self.pairing_issued_at.is_none();

        match self.status {
            SessionStatus::Pairing => has_payload,
            SessionStatus::Disconnected | SessionStatus::Connected => has_no_payload,
        }
    }

    pub fn to_pairing(&self, image: impl Into<String>) -> Self {
        let revision = self.next_revision();

        Self {
            status: SessionStatus::Pairing,
            pairing_image: Some(image.into()),
            pairing_issued_at: Some(revision),
            updated_at: revision,
            ..self.clone()
        }
    }

    pub fn to_connected(&self) -> Self {
        self.without_payload(SessionStatus::Connected)
    }

    pub fn to_disconnected(&self) -> Self {
        self.without_payload(SessionStatus::Disconnected)
    }
}

// -----------------------------------------------------------------------------
// ----- SessionRecord: Private ------------------------------------------------

impl SessionRecord {
    fn without_payload(&self, status: SessionStatus) -> Self {
        Self {
            status,
            pairing_image: None,
            pairing_issued_at: None,
            updated_at: self.next_revision(),
            ..self.clone()
        }
    }

    /// Strictly after the current `updated_at`, even if the wall clock is not.
    fn next_revision(&self) -> DateTime<Utc> {
        let now = Utc::now();
        if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        }
    }
}

fn random_id() -> String {
    let value: u128 = rand::rng().random();
    format!("{value:032x}")
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
