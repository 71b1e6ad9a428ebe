use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionRole {
    Doctor,
    Patient,
    Unknown,
}

impl Default for SessionRole {
    fn default() -> Self {
        SessionRole::Unknown
    }
}

impl SessionRole {
    /// Maps the identity token's `role` claim. Anything other than the two
    /// known roles is `Unknown`.
    pub fn from_claim(claim: Option<&str>) -> Self {
        match claim {
            Some("doctor") => SessionRole::Doctor,
            Some("patient") => SessionRole::Patient,
            _ => SessionRole::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Doctor => "doctor",
            SessionRole::Patient => "patient",
            SessionRole::Unknown => "unknown",
        }
    }
}

/// Bearer token for the backend. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_claims_resolve_to_a_role() {
        assert_eq!(SessionRole::from_claim(Some("doctor")), SessionRole::Doctor);
        assert_eq!(SessionRole::from_claim(Some("patient")), SessionRole::Patient);
        assert_eq!(SessionRole::from_claim(Some("admin")), SessionRole::Unknown);
        assert_eq!(SessionRole::from_claim(None), SessionRole::Unknown);
    }

    #[test]
    fn credential_debug_output_is_redacted() {
        let credential = Credential::new("secret-token");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
    }
}
