use std::fmt;

// -----------------------------------------------------------------------------
// ----- SessionKey ------------------------------------------------------------

/// Tenant-scoped natural key of a session. Session names are only unique
/// within one organization, so every map in the crate is keyed by the pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub organization_id: String,
    pub session_name: String,
}

// -----------------------------------------------------------------------------
// ----- SessionKey: Static ----------------------------------------------------

impl SessionKey {
    pub fn new(organization_id: impl Into<String>, session_name: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            session_name: session_name.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.organization_id, self.session_name)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
