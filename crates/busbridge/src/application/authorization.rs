//! Authority checks for rules that carry a `required_authority`.
//!
//! A principal starts with whatever authorities the transport attached to it
//! (often none).  When a rule asks for an authority the principal does not
//! hold yet, the [`AuthorizationProvider`] is asked once to load the
//! principal's authorities; the loaded set is kept on the principal so later
//! checks are answered locally.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use busbridge_core::{Authority, ErrorCode, Principal};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by an [`AuthorizationProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("unknown principal '{0}'")]
    UnknownPrincipal(String),
    #[error("authority lookup failed: {0}")]
    Lookup(String),
}

/// Loads the full authority set of a principal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns [`AuthError`] when the authorities cannot be determined.
    async fn load_authorities(&self, principal: &Principal) -> Result<HashSet<Authority>, AuthError>;
}

/// Why an authority check did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    #[error("authority required but the connection has no principal")]
    NotLoggedIn,
    #[error("principal lacks the required authority")]
    Denied,
    #[error(transparent)]
    Provider(#[from] AuthError),
}

impl AuthzError {
    /// The code written back to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthzError::NotLoggedIn => ErrorCode::NotLoggedIn,
            AuthzError::Denied => ErrorCode::AccessDenied,
            AuthzError::Provider(_) => ErrorCode::AuthError,
        }
    }
}

/// Checks principals against required authorities.
#[derive(Clone, Default)]
pub struct Authorizer {
    provider: Option<Arc<dyn AuthorizationProvider>>,
}

impl Authorizer {
    pub fn new(provider: Option<Arc<dyn AuthorizationProvider>>) -> Self {
        Self { provider }
    }

    /// Passes when `principal` holds `authority`.
    ///
    /// Resident authorities are checked first.  Only if that fails and a
    /// provider is installed are the authorities loaded and checked again.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::NotLoggedIn`] without a principal.
    /// - [`AuthzError::Provider`] if loading fails.
    /// - [`AuthzError::Denied`] if there is no provider or the loaded set
    ///   still lacks `authority`.
    pub async fn authorize(
        &self,
        principal: Option<&Principal>,
        authority: &Authority,
    ) -> Result<(), AuthzError> {
        let principal = principal.ok_or(AuthzError::NotLoggedIn)?;

        if authority.matches(principal) {
            return Ok(());
        }

        let Some(provider) = &self.provider else {
            debug!(principal = principal.name(), %authority, "no authorization provider");
            return Err(AuthzError::Denied);
        };

        let loaded = provider.load_authorities(principal).await.map_err(|err| {
            warn!(principal = principal.name(), "{err}");
            err
        })?;
        principal.grant(loaded);

        if authority.matches(principal) {
            Ok(())
        } else {
            Err(AuthzError::Denied)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn authorities(names: &[&str]) -> HashSet<Authority> {
        names.iter().map(|n| Authority::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_missing_principal_is_not_logged_in() {
        // Arrange
        let authz = Authorizer::new(None);

        // Act
        let result = authz.authorize(None, &Authority::new("x")).await;

        // Assert
        assert_eq!(result, Err(AuthzError::NotLoggedIn));
        assert_eq!(AuthzError::NotLoggedIn.code(), ErrorCode::NotLoggedIn);
    }

    #[tokio::test]
    async fn test_resident_authority_skips_provider() {
        // Arrange: the mock fails the test if it is called at all
        let mut provider = MockAuthorizationProvider::new();
        provider.expect_load_authorities().never();
        let authz = Authorizer::new(Some(Arc::new(provider)));
        let principal = Principal::with_authorities("alice", authorities(&["news:read"]));

        // Act
        let result = authz.authorize(Some(&principal), &Authority::new("news:read")).await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_no_provider_and_no_resident_authority_is_denied() {
        let authz = Authorizer::new(None);
        let principal = Principal::new("bob");

        let result = authz.authorize(Some(&principal), &Authority::new("admin")).await;

        assert_eq!(result, Err(AuthzError::Denied));
        assert_eq!(AuthzError::Denied.code(), ErrorCode::AccessDenied);
    }

    #[tokio::test]
    async fn test_loaded_authorities_are_granted_and_cached() {
        // Arrange: provider answers exactly once
        let mut provider = MockAuthorizationProvider::new();
        provider
            .expect_load_authorities()
            .times(1)
            .returning(|_| Ok(authorities(&["orders:write"])));
        let authz = Authorizer::new(Some(Arc::new(provider)));
        let principal = Principal::new("carol");
        let needed = Authority::new("orders:write");

        // Act
        let first = authz.authorize(Some(&principal), &needed).await;
        let second = authz.authorize(Some(&principal), &needed).await;

        // Assert: the second check was answered from the resident set
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(principal.has_authority(&needed));
    }

    #[tokio::test]
    async fn test_loaded_set_without_authority_is_denied() {
        let mut provider = MockAuthorizationProvider::new();
        provider
            .expect_load_authorities()
            .returning(|_| Ok(authorities(&["other"])));
        let authz = Authorizer::new(Some(Arc::new(provider)));
        let principal = Principal::new("dave");

        let result = authz.authorize(Some(&principal), &Authority::new("admin")).await;

        assert_eq!(result, Err(AuthzError::Denied));
    }

    #[tokio::test]
    async fn test_provider_error_maps_to_auth_error() {
        // Arrange
        let mut provider = MockAuthorizationProvider::new();
        provider
            .expect_load_authorities()
            .returning(|_| Err(AuthError::Lookup("directory offline".into())));
        let authz = Authorizer::new(Some(Arc::new(provider)));
        let principal = Principal::new("erin");

        // Act
        let err = authz
            .authorize(Some(&principal), &Authority::new("admin"))
            .await
            .unwrap_err();

        // Assert
        assert_eq!(err.code(), ErrorCode::AuthError);
        assert!(matches!(err, AuthzError::Provider(AuthError::Lookup(_))));
    }
}
