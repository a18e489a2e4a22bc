//! The shared pairing secret.
//!
//! Both humans agree out-of-band on N words (by convention three animal
//! names).  During the handshake the initiator sends its words and the
//! responder compares them with its own.
//!
//! # Comparison rules
//!
//! - Names are trimmed and compared case-insensitively (`"Lion"` == `" lion "`).
//! - [`MatchPolicy::Positional`] (the default) compares `received[i]` with
//!   `local[i]`, so order matters.
//! - [`MatchPolicy::Unordered`] accepts any permutation of the same names.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of names in a secret unless configured otherwise.
pub const DEFAULT_NAME_COUNT: usize = 3;

/// Errors produced when a list of names is not a well-formed secret.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    /// The list holds the wrong number of names.
    #[error("expected exactly {expected} names, got {actual}")]
    WrongCount { expected: usize, actual: usize },

    /// A name is empty or whitespace only.
    #[error("name #{position} is blank")]
    BlankName { position: usize },
}

/// How a received secret is compared with the local one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Names must match position by position.
    #[default]
    Positional,
    /// Names must match as a multiset; order is ignored.
    Unordered,
}

/// An ordered list of secret names.
///
/// The `Debug` implementation never prints the names themselves so a secret
/// can be stored in structs that end up in log lines.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    names: Vec<String>,
}

impl Secret {
    /// Builds a secret from individual names, trimming each one.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_string())
                .collect(),
        }
    }

    /// Parses a comma-separated line as typed by a human.
    ///
    /// Whitespace around each name is dropped.  Blank entries are kept so
    /// that validation can report them; an entirely blank input yields an
    /// empty secret.
    ///
    /// ```rust
    /// use lanchat_core::Secret;
    ///
    /// let s = Secret::parse(" lion , Tiger,bear ");
    /// assert_eq!(s.names(), ["lion", "Tiger", "bear"]);
    /// ```
    pub fn parse(input: &str) -> Self {
        if input.trim().is_empty() {
            return Self { names: Vec::new() };
        }
        Self::new(input.split(','))
    }

    /// Returns the names in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Consumes the secret and returns the names.
    pub fn into_names(self) -> Vec<String> {
        self.names
    }

    /// Returns the number of names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Checks that this secret has exactly `expected` non-blank names.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::WrongCount`] or [`SecretError::BlankName`].
    pub fn validate(&self, expected: usize) -> Result<(), SecretError> {
        validate_names(&self.names, expected)
    }

    /// Compares `received` against this (local) secret under `policy`.
    ///
    /// Callers are expected to have validated `received` first; a length
    /// mismatch simply returns `false`.
    pub fn matches(&self, received: &[String], policy: MatchPolicy) -> bool {
        if received.len() != self.names.len() {
            return false;
        }
        match policy {
            MatchPolicy::Positional => self
                .names
                .iter()
                .zip(received)
                .all(|(local, theirs)| normalize(local) == normalize(theirs)),
            MatchPolicy::Unordered => {
                let mut local: Vec<String> = self.names.iter().map(|n| normalize(n)).collect();
                let mut theirs: Vec<String> = received.iter().map(|n| normalize(n)).collect();
                local.sort_unstable();
                theirs.sort_unstable();
                local == theirs
            }
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({} names)", self.names.len())
    }
}

/// Checks arity and blankness of a raw list of names (e.g. from the wire).
///
/// # Errors
///
/// Returns [`SecretError::WrongCount`] when `names.len() != expected`, or
/// [`SecretError::BlankName`] with the 1-based position of the first blank
/// name.
pub fn validate_names(names: &[String], expected: usize) -> Result<(), SecretError> {
    if names.len() != expected {
        return Err(SecretError::WrongCount {
            expected,
            actual: names.len(),
        });
    }
    if let Some(idx) = names.iter().position(|n| n.trim().is_empty()) {
        return Err(SecretError::BlankName { position: idx + 1 });
    }
    Ok(())
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
