//! Token authentication and authority lookup from the config file.
//!
//! The `[[principals]]` table of the configuration maps bearer tokens to
//! named identities and their authorities.  [`StaticPrincipals`] serves two
//! roles:
//!
//! 1. The WebSocket server calls [`StaticPrincipals::authenticate`] during the
//!    handshake to turn a token into a [`Principal`].  The principal starts
//!    with *no* resident authorities.
//! 2. The engine uses it as its [`AuthorizationProvider`]: the first time a
//!    rule requires an authority, the principal's configured authorities are
//!    loaded.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use busbridge_core::{Authority, Principal};
use tracing::debug;

use crate::application::authorization::{AuthError, AuthorizationProvider};
use crate::domain::config::PrincipalEntry;

/// Principals configured in the config file, indexed by token and by name.
#[derive(Debug, Default, Clone)]
pub struct StaticPrincipals {
    names_by_token: HashMap<String, String>,
    authorities_by_name: HashMap<String, HashSet<Authority>>,
}

impl StaticPrincipals {
    pub fn new(entries: &[PrincipalEntry]) -> Self {
        let mut principals = Self::default();
        for entry in entries {
            principals
                .names_by_token
                .insert(entry.token.clone(), entry.name.clone());
            principals
                .authorities_by_name
                .entry(entry.name.clone())
                .or_default()
                .extend(entry.authorities.iter().cloned());
        }
        principals
    }

    /// Resolves a bearer token.  Unknown tokens yield `None`.
    pub fn authenticate(&self, token: &str) -> Option<Principal> {
        let name = self.names_by_token.get(token)?;
        debug!(principal = %name, "token accepted");
        Some(Principal::new(name.clone()))
    }

    pub fn len(&self) -> usize {
        self.authorities_by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorities_by_name.is_empty()
    }
}

#[async_trait]
impl AuthorizationProvider for StaticPrincipals {
    async fn load_authorities(&self, principal: &Principal) -> Result<HashSet<Authority>, AuthError> {
        self.authorities_by_name
            .get(principal.name())
            .cloned()
            .ok_or_else(|| AuthError::UnknownPrincipal(principal.name().to_string()))
    }
}
