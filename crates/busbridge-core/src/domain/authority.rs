//! Authorities and principals.
//!
//! An [`Authority`] is an opaque permission token such as `"news:read"`.  A
//! [`Principal`] is an authenticated identity together with the authorities
//! that have been resolved for it so far.
//!
//! # Resident authorities
//!
//! Authorities are loaded lazily.  A principal starts out with whatever the
//! authentication step already knew (often nothing); the first time a rule
//! needs an authority the bridge asks the authorization provider to load the
//! principal's authorities, and they stay *resident* on the principal for the
//! rest of the connection.  Clones of a principal share the same resident set.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// An opaque permission token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Authority(String);

impl Authority {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when the principal already holds this authority.
    ///
    /// This never loads anything; it only inspects the resident set.
    pub fn matches(&self, principal: &Principal) -> bool {
        principal.has_authority(self)
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Authority {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

#[derive(Debug)]
struct PrincipalInner {
    name: String,
    authorities: Mutex<HashSet<Authority>>,
}

/// An authenticated identity attached to a client connection.
#[derive(Debug, Clone)]
pub struct Principal {
    inner: Arc<PrincipalInner>,
}

impl Principal {
    /// Creates a principal with no resident authorities.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_authorities(name, HashSet::new())
    }

    pub fn with_authorities(name: impl Into<String>, authorities: HashSet<Authority>) -> Self {
        Self {
            inner: Arc::new(PrincipalInner {
                name: name.into(),
                authorities: Mutex::new(authorities),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn has_authority(&self, authority: &Authority) -> bool {
        self.lock().contains(authority)
    }

    /// Adds loaded authorities to the resident set.
    pub fn grant<I>(&self, authorities: I)
    where
        I: IntoIterator<Item = Authority>,
    {
        self.lock().extend(authorities);
    }

    /// Snapshot of the resident authorities.
    pub fn authorities(&self) -> HashSet<Authority> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Authority>> {
        self.inner
            .authorities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
