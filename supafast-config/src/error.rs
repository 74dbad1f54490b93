//! Error types for the generator pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed user input. Recoverable: interactive mode re-prompts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The base URL (or something derived from it) is malformed.
    #[error("invalid base URL `{input}`: {reason}")]
    Format {
        /// Rejected input.
        input: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// Username is not 1-32 ASCII alphanumerics.
    #[error("username must be 1-32 ASCII letters or digits")]
    Username,
    /// Password fails the length or character rules.
    #[error("password {reason}")]
    Password {
        /// Failed rule.
        reason: &'static str,
    },
    /// The two password entries differ.
    #[error("passwords do not match")]
    PasswordMismatch,
    /// Email address does not look like `user@host.tld`.
    #[error("invalid email address `{0}`")]
    Email(String),
    /// Display name is empty, too long or contains control characters.
    #[error("display name {reason}")]
    DisplayName {
        /// Failed rule.
        reason: &'static str,
    },
}

/// Incompatible combination of otherwise valid choices. Recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Second-factor auth was requested for a plaintext base URL.
    #[error(
        "second-factor authentication requires an https:// base URL (got {scheme}://)"
    )]
    SecondFactorNeedsHttps {
        /// Scheme that was supplied.
        scheme: &'static str,
    },
    /// The public host is the second-factor portal host.
    #[error(
        "`{host}` is reserved for the second-factor login portal; use another host"
    )]
    PortalHostCollision {
        /// The colliding host.
        host: String,
    },
}

/// Any failure of a generator run.
#[derive(Debug, Error)]
pub enum InitError {
    /// Malformed input; recoverable.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Incompatible choices; recoverable.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// No container runtime on `PATH`.
    #[error("required tool `{tool}` is not available on PATH")]
    Dependency {
        /// Tools that were looked for.
        tool: String,
    },
    /// Reading or writing an artifact failed.
    #[error("failed to {action} {path}")]
    FileSystem {
        /// What was being done.
        action: &'static str,
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// An artifact could not be serialized.
    #[error("failed to serialize {artifact}")]
    Serialize {
        /// Artifact being rendered.
        artifact: &'static str,
        /// Serializer error.
        #[source]
        source: anyhow::Error,
    },
    /// bcrypt failed.
    #[error("failed to hash the admin password")]
    Hash(#[source] bcrypt::BcryptError),
    /// Terminal I/O failed, or the answer source ran dry.
    #[error("terminal prompt failed")]
    Prompt(#[source] std::io::Error),
    /// The settings-file candidate could not be produced.
    #[error("candidate settings file could not be generated")]
    Candidate(#[source] anyhow::Error),
}

impl InitError {
    /// Errors the user can fix by answering a prompt again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, InitError::Validation(_) | InitError::Policy(_))
    }

    pub(crate) fn fs(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        InitError::FileSystem {
            action,
            path: path.into(),
            source,
        }
    }
}

impl From<dialoguer::Error> for InitError {
    fn from(err: dialoguer::Error) -> Self {
        match err {
            dialoguer::Error::IO(io) => InitError::Prompt(io),
        }
    }
}
