use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;

use crate::error::IdentityError;
use crate::models::{Credential, SessionRole};

/// Custom claims carried by the identity token.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    #[serde(default)]
    pub role: Option<String>,
}

#[async_trait]
pub trait IdentityUser: Send + Sync {
    async fn token_claims(&self, force_refresh: bool) -> Result<TokenClaims, IdentityError>;
    async fn id_token(&self, force_refresh: bool) -> Result<Credential, IdentityError>;
}

pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<Arc<dyn IdentityUser>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRole {
    pub role: SessionRole,
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleState {
    Unresolved,
    Resolved(ResolvedRole),
}

impl RoleState {
    pub fn role(&self) -> SessionRole {
        match self {
            RoleState::Unresolved => SessionRole::Unknown,
            RoleState::Resolved(resolved) => resolved.role,
        }
    }
}

pub struct RoleResolver {
    provider: Arc<dyn IdentityProvider>,
}

impl RoleResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Reads the role claim and a bearer token for the signed-in user.
    ///
    /// A token without a role claim is refreshed once, since a freshly
    /// assigned role only shows up after the token is reissued.
    pub async fn resolve_role(&self) -> RoleState {
        match self.try_resolve().await {
            Ok(Some(resolved)) => {
                info!("Resolved session role: {}", resolved.role.as_str());
                RoleState::Resolved(resolved)
            }
            Ok(None) => {
                warn!("Signed-in user has no doctor or patient role");
                RoleState::Unresolved
            }
            Err(err) => {
                warn!("Role resolution failed: {err}");
                RoleState::Unresolved
            }
        }
    }

    async fn try_resolve(&self) -> Result<Option<ResolvedRole>, IdentityError> {
        let user = self.provider.current_user().ok_or(IdentityError::NoUser)?;

        let mut claims = user.token_claims(false).await?;
        let mut refreshed = false;
        if claims.role.is_none() {
            claims = user.token_claims(true).await?;
            refreshed = true;
        }

        let role = SessionRole::from_claim(claims.role.as_deref());
        if role == SessionRole::Unknown {
            return Ok(None);
        }

        let credential = user.id_token(refreshed).await?;
        Ok(Some(ResolvedRole { role, credential }))
    }
}
