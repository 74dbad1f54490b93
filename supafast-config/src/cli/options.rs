//! Run options set by the binary or by tests.

use std::path::PathBuf;

use crate::{credentials::WorkFactorPolicy, models::ProxyKind};

/// Options controlling one generator run.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Directory receiving `.env`, the compose file and `volumes/`.
    pub out_dir: PathBuf,
    /// Proxy to configure.
    pub proxy_kind: ProxyKind,
    /// Put the dashboard behind the second-factor daemon.
    pub second_factor: bool,
    /// Requested session store; dropped when `second_factor` is off.
    pub session_store: bool,
    /// Use resolved answers without prompting.
    pub non_interactive: bool,
    /// TOML answers file layered over the defaults.
    pub answers_path: Option<PathBuf>,
    /// Skip the container runtime lookup.
    pub skip_dependency_check: bool,
    /// bcrypt costs.
    pub work_factor: WorkFactorPolicy,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            proxy_kind: ProxyKind::default(),
            second_factor: false,
            session_store: false,
            non_interactive: false,
            answers_path: None,
            skip_dependency_check: false,
            work_factor: WorkFactorPolicy::default(),
        }
    }
}

impl InitOptions {
    /// Interactive run writing to `out_dir`.
    pub fn new(out_dir: PathBuf, proxy_kind: ProxyKind) -> Self {
        Self {
            out_dir,
            proxy_kind,
            ..Default::default()
        }
    }

    /// Run that never prompts.
    pub fn new_non_interactive(out_dir: PathBuf, proxy_kind: ProxyKind) -> Self {
        Self {
            out_dir,
            proxy_kind,
            non_interactive: true,
            ..Default::default()
        }
    }

    /// Enable second-factor auth, optionally with a session store.
    pub fn with_second_factor(mut self, session_store: bool) -> Self {
        self.second_factor = true;
        self.session_store = session_store;
        self
    }
}
