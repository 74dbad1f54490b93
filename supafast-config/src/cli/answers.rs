//! Answers used in place of prompts.
//!
//! Precedence, lowest first: built-in defaults, the `--answers` TOML file,
//! `SUPAFAST_INIT_*` environment variables. Interactive runs use the merged
//! answers as prompt defaults (the password excepted).

use std::{fs, path::Path};

use serde::Deserialize;
use tracing::debug;

use crate::{
    credentials::PlaintextPassword,
    error::InitError,
    util::{non_empty_var, parse_bool_var},
};

/// Public base URL used when none is given.
pub const DEFAULT_BASE_URL: &str = "https://apps.example.com";
/// Admin username used when none is given.
pub const DEFAULT_USERNAME: &str = "admin";
/// Fixed password for automated verification runs.
pub const DEFAULT_PASSWORD: &str = "supafast-verify-pass";
/// Admin email used when none is given.
pub const DEFAULT_EMAIL: &str = "admin@example.com";
/// Admin display name used when none is given.
pub const DEFAULT_DISPLAY_NAME: &str = "Administrator";

/// Overrides `base_url`.
pub const ENV_BASE_URL: &str = "SUPAFAST_INIT_BASE_URL";
/// Overrides `username`.
pub const ENV_USERNAME: &str = "SUPAFAST_INIT_USERNAME";
/// Overrides `password`; taken verbatim.
pub const ENV_PASSWORD: &str = "SUPAFAST_INIT_PASSWORD";
/// Overrides `email`.
pub const ENV_EMAIL: &str = "SUPAFAST_INIT_EMAIL";
/// Overrides `display_name`.
pub const ENV_DISPLAY_NAME: &str = "SUPAFAST_INIT_DISPLAY_NAME";
/// Overrides `email_autoconfirm`; boolean spellings as in [`parse_bool`](crate::util::parse_bool).
pub const ENV_EMAIL_AUTOCONFIRM: &str = "SUPAFAST_INIT_EMAIL_AUTOCONFIRM";
/// Overrides `session_store`.
pub const ENV_SESSION_STORE: &str = "SUPAFAST_INIT_SESSION_STORE";

/// Shape of the `--answers` file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnswersFile {
    /// Public base URL, `scheme://host`.
    pub base_url: Option<String>,
    /// Admin username.
    pub username: Option<String>,
    /// Admin password.
    pub password: Option<String>,
    /// Admin email, used with second-factor auth.
    pub email: Option<String>,
    /// Admin display name, used with second-factor auth.
    pub display_name: Option<String>,
    /// New accounts skip email confirmation.
    pub email_autoconfirm: Option<bool>,
    /// Keep daemon sessions in Redis.
    pub session_store: Option<bool>,
}

impl AnswersFile {
    /// Parse `path`; unknown keys are an error.
    pub fn load(path: &Path) -> Result<Self, InitError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| InitError::fs("read answers file", path, err))?;
        toml::from_str(&raw).map_err(|err| {
            InitError::fs(
                "parse answers file",
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, err),
            )
        })
    }
}

/// Raw, not yet validated answers to every question the generator asks.
#[derive(Debug, Clone)]
pub struct InitAnswers {
    /// Public base URL.
    pub base_url: String,
    /// Admin username.
    pub username: String,
    /// Admin password.
    pub password: PlaintextPassword,
    /// Admin email.
    pub email: String,
    /// Admin display name.
    pub display_name: String,
    /// New accounts skip email confirmation.
    pub email_autoconfirm: bool,
    /// Keep daemon sessions in Redis.
    pub session_store: bool,
    /// True when the password still is [`DEFAULT_PASSWORD`].
    pub default_password: bool,
}

impl Default for InitAnswers {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: PlaintextPassword::new(DEFAULT_PASSWORD),
            email: DEFAULT_EMAIL.to_string(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            email_autoconfirm: false,
            session_store: false,
            default_password: true,
        }
    }
}

impl InitAnswers {
    /// Defaults, then `answers_path`, then the environment.
    pub fn resolve(answers_path: Option<&Path>) -> Result<Self, InitError> {
        let mut answers = Self::default();
        if let Some(path) = answers_path {
            debug!(path = %path.display(), "loading answers file");
            answers.apply_file(AnswersFile::load(path)?);
        }
        answers.apply_env();
        Ok(answers)
    }

    /// Take every value the file sets.
    pub fn apply_file(&mut self, file: AnswersFile) {
        if let Some(v) = file.base_url {
            self.base_url = v;
        }
        if let Some(v) = file.username {
            self.username = v;
        }
        if let Some(v) = file.password {
            self.set_password(v);
        }
        if let Some(v) = file.email {
            self.email = v;
        }
        if let Some(v) = file.display_name {
            self.display_name = v;
        }
        if let Some(v) = file.email_autoconfirm {
            self.email_autoconfirm = v;
        }
        if let Some(v) = file.session_store {
            self.session_store = v;
        }
    }

    /// Take every `SUPAFAST_INIT_*` variable that is set and non-blank.
    pub fn apply_env(&mut self) {
        if let Some(v) = non_empty_var(ENV_BASE_URL) {
            self.base_url = v;
        }
        if let Some(v) = non_empty_var(ENV_USERNAME) {
            self.username = v;
        }
        // Taken verbatim; passwords are not trimmed.
        if let Ok(v) = std::env::var(ENV_PASSWORD)
            && !v.is_empty()
        {
            self.set_password(v);
        }
        if let Some(v) = non_empty_var(ENV_EMAIL) {
            self.email = v;
        }
        if let Some(v) = non_empty_var(ENV_DISPLAY_NAME) {
            self.display_name = v;
        }
        if let Some(v) = parse_bool_var(ENV_EMAIL_AUTOCONFIRM) {
            self.email_autoconfirm = v;
        }
        if let Some(v) = parse_bool_var(ENV_SESSION_STORE) {
            self.session_store = v;
        }
    }

    fn set_password(&mut self, password: String) {
        self.password = PlaintextPassword::new(password);
        self.default_password = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_defaults_field_by_field() {
        let file: AnswersFile = toml::from_str(
            r#"
base_url = "https://db.acme.io"
session_store = true
"#,
        )
        .unwrap();
        let mut answers = InitAnswers::default();
        answers.apply_file(file);

        assert_eq!(answers.base_url, "https://db.acme.io");
        assert!(answers.session_store);
        assert_eq!(answers.username, DEFAULT_USERNAME);
        assert!(answers.default_password);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: Result<AnswersFile, _> = toml::from_str("bsae_url = \"x\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn debug_does_not_leak_password() {
        let rendered = format!("{:?}", InitAnswers::default());
        assert!(!rendered.contains(DEFAULT_PASSWORD));
    }
}
