//! Compiled address-pattern cache.
//!
//! Rules may match addresses with a regular expression.  Compiling a regex is
//! far more expensive than running it, and the same few patterns are checked
//! on every message, so each distinct pattern text is compiled once and the
//! result shared by every connection.
//!
//! Patterns always match the *whole* address: `news\..+` accepts
//! `news.sports` but not `breaking.news.sports`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use tracing::warn;

/// Thread-safe cache of compiled, fully anchored address patterns.
///
/// An invalid pattern is remembered as invalid so the compile error is logged
/// once and the pattern simply never matches.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: Mutex<HashMap<String, Option<Arc<Regex>>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `pattern` matches all of `address`.
    pub fn is_match(&self, pattern: &str, address: &str) -> bool {
        self.get_or_compile(pattern)
            .map(|re| re.is_match(address))
            .unwrap_or(false)
    }

    /// Number of distinct pattern strings seen so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_or_compile(&self, pattern: &str) -> Option<Arc<Regex>> {
        let mut compiled = self.lock();
        if let Some(entry) = compiled.get(pattern) {
            return entry.clone();
        }

        let entry = match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => Some(Arc::new(re)),
            Err(e) => {
                warn!("address pattern {pattern:?} does not compile and will never match: {e}");
                None
            }
        };
        compiled.insert(pattern.to_string(), entry.clone());
        entry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<Arc<Regex>>>> {
        // A poisoned lock only means another thread panicked mid-insert; the
        // map itself is still consistent.
        self.compiled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
