//! Admin credential hashing.

use std::fmt;

use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    constants::{HIGH_WORK_FACTOR, LOW_WORK_FACTOR},
    error::InitError,
    models::{DeploymentFlags, ProxyKind},
};

/// Plaintext password held only until it is hashed; wiped on drop.
pub struct PlaintextPassword(Zeroizing<String>);

impl PlaintextPassword {
    /// Take ownership of a typed or configured password.
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }

    /// The plaintext.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    /// Whether the password is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PlaintextPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextPassword(<redacted>)")
    }
}

impl Clone for PlaintextPassword {
    fn clone(&self) -> Self {
        Self(Zeroizing::new(self.0.as_str().to_string()))
    }
}

/// bcrypt cost selection by deployment variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkFactorPolicy {
    /// Cost for basic auth checked by Caddy.
    pub low: u32,
    /// Cost for everything else.
    pub high: u32,
}

impl Default for WorkFactorPolicy {
    fn default() -> Self {
        Self {
            low: LOW_WORK_FACTOR,
            high: HIGH_WORK_FACTOR,
        }
    }
}

impl WorkFactorPolicy {
    /// Low cost only when Caddy checks the hash itself on every request.
    pub fn select(&self, flags: &DeploymentFlags) -> u32 {
        match (flags.proxy_kind, flags.second_factor) {
            (ProxyKind::Caddy, false) => self.low,
            _ => self.high,
        }
    }
}

/// Admin identity after hashing. The plaintext is gone by the time this
/// exists.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    hash: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Hash `password` with the cost picked for `flags`, consuming it.
    pub fn hash(
        username: impl Into<String>,
        password: PlaintextPassword,
        flags: &DeploymentFlags,
        policy: &WorkFactorPolicy,
    ) -> Result<Self, InitError> {
        let cost = policy.select(flags);
        debug!(cost, proxy = %flags.proxy_kind, "hashing admin password");
        let hash =
            bcrypt::hash(password.as_str(), cost).map_err(InitError::Hash)?;
        drop(password);
        Ok(Self {
            username: username.into(),
            hash,
        })
    }

    /// Admin username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The bcrypt hash as written to the settings file.
    pub fn hash_str(&self) -> &str {
        &self.hash
    }

    /// Hash escaped for compose files, where `$` starts an interpolation.
    pub fn compose_escaped_hash(&self) -> String {
        self.hash.replace('$', "$$")
    }

    /// Whether `candidate` matches the hash.
    pub fn verify(&self, candidate: &str) -> bool {
        bcrypt::verify(candidate, &self.hash).unwrap_or(false)
    }
}
