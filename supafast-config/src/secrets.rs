//! Random secret generation.
//!
//! Every secret is drawn independently from the thread-local CSPRNG (ChaCha,
//! seeded from the OS) and hex encoded. There is no seeding
//! hook: two runs must never share a value.

use rand::RngCore;

use crate::models::DeploymentFlags;

/// A generated secret, named by its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecretName {
    /// Database superuser password.
    PostgresPassword,
    /// HS256 key for the API tokens.
    JwtSigningKey,
    /// Realtime and pooler cookie key.
    SecretKeyBase,
    /// pgsodium vault key.
    VaultEncKey,
    /// Auth daemon session cookie key.
    SessionSecret,
    /// Auth daemon storage encryption key.
    StorageEncryptionKey,
    /// Auth daemon password-reset token key.
    ResetPasswordJwtSecret,
    /// Session store password.
    RedisPassword,
}

impl SecretName {
    /// Secrets every deployment needs.
    pub const ALWAYS: [SecretName; 4] = [
        SecretName::PostgresPassword,
        SecretName::JwtSigningKey,
        SecretName::SecretKeyBase,
        SecretName::VaultEncKey,
    ];

    /// Extra secrets for second-factor auth.
    pub const SECOND_FACTOR: [SecretName; 3] = [
        SecretName::SessionSecret,
        SecretName::StorageEncryptionKey,
        SecretName::ResetPasswordJwtSecret,
    ];

    /// Number of random bytes drawn; the hex value is twice as long.
    pub fn byte_len(self) -> usize {
        match self {
            SecretName::PostgresPassword => 16,
            SecretName::JwtSigningKey => 32,
            SecretName::SecretKeyBase => 32,
            SecretName::VaultEncKey => 16,
            SecretName::SessionSecret => 32,
            SecretName::StorageEncryptionKey => 32,
            SecretName::ResetPasswordJwtSecret => 32,
            SecretName::RedisPassword => 16,
        }
    }

    /// Settings file key holding the secret.
    pub fn env_key(self) -> &'static str {
        match self {
            SecretName::PostgresPassword => "POSTGRES_PASSWORD",
            SecretName::JwtSigningKey => "JWT_SECRET",
            SecretName::SecretKeyBase => "SECRET_KEY_BASE",
            SecretName::VaultEncKey => "VAULT_ENC_KEY",
            SecretName::SessionSecret => "AUTHELIA_SESSION_SECRET",
            SecretName::StorageEncryptionKey => {
                "AUTHELIA_STORAGE_ENCRYPTION_KEY"
            }
            SecretName::ResetPasswordJwtSecret => {
                "AUTHELIA_RESET_PASSWORD_JWT_SECRET"
            }
            SecretName::RedisPassword => "REDIS_PASSWORD",
        }
    }

    /// Secrets a run with these flags needs, in settings-file order.
    pub fn required_for(flags: &DeploymentFlags) -> Vec<SecretName> {
        let mut names = Self::ALWAYS.to_vec();
        if flags.second_factor {
            names.extend(Self::SECOND_FACTOR);
        }
        if flags.session_store_active() {
            names.push(SecretName::RedisPassword);
        }
        names
    }
}

/// Generated secrets for one run, in generation order.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretSet {
    entries: Vec<(SecretName, String)>,
}

impl std::fmt::Debug for SecretSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

impl SecretSet {
    /// Draw every secret `flags` requires.
    pub fn generate(flags: &DeploymentFlags) -> Self {
        let entries = SecretName::required_for(flags)
            .into_iter()
            .map(|name| (name, generate_hex_secret(name.byte_len())))
            .collect();
        Self { entries }
    }

    /// Value of `name`, if it was generated.
    pub fn get(&self, name: SecretName) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The JWT signing key; present in every secret set.
    pub fn jwt_signing_key(&self) -> &str {
        self.get(SecretName::JwtSigningKey).unwrap_or_default()
    }

    /// Secrets with their values, in generation order.
    pub fn iter(&self) -> impl Iterator<Item = (SecretName, &str)> {
        self.entries.iter().map(|(n, v)| (*n, v.as_str()))
    }

    /// Number of secrets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no secret was generated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `byte_len` random bytes, hex encoded.
pub fn generate_hex_secret(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
