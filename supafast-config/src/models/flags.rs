//! Deployment switches chosen for one run.

use std::fmt;

use tracing::warn;

use crate::constants::{CADDYFILE_PATH, NGINX_CONF_PATH};

/// Reverse proxy in front of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyKind {
    /// Caddy; enforces basic auth itself when no second factor is used.
    #[default]
    Caddy,
    /// nginx; delegates credential checks to an htpasswd file or the
    /// second-factor daemon.
    Nginx,
}

impl ProxyKind {
    /// Lowercase name, as written to `PROXY_KIND`.
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyKind::Caddy => "caddy",
            ProxyKind::Nginx => "nginx",
        }
    }

    /// Container image for the proxy service.
    pub fn image(self) -> &'static str {
        match self {
            ProxyKind::Caddy => "caddy:2.8-alpine",
            ProxyKind::Nginx => "nginx:1.27-alpine",
        }
    }

    /// Container name for the proxy service.
    pub fn container_name(self) -> String {
        format!("supafast-{}", self.as_str())
    }

    /// Path of the rendered proxy configuration, relative to the output dir.
    pub fn config_path(self) -> &'static str {
        match self {
            ProxyKind::Caddy => CADDYFILE_PATH,
            ProxyKind::Nginx => NGINX_CONF_PATH,
        }
    }

    /// Where the proxy process expects its configuration file.
    pub fn config_mount_target(self) -> &'static str {
        match self {
            ProxyKind::Caddy => "/etc/caddy/Caddyfile",
            ProxyKind::Nginx => "/etc/nginx/nginx.conf",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated deployment switches for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeploymentFlags {
    /// Proxy variant fronting the stack.
    pub proxy_kind: ProxyKind,
    /// Guard the dashboard with the second-factor daemon.
    pub second_factor: bool,
    /// Only honoured together with `second_factor`.
    pub session_store: bool,
}

impl DeploymentFlags {
    /// Build normalized flags.
    pub fn new(
        proxy_kind: ProxyKind,
        second_factor: bool,
        session_store: bool,
    ) -> Self {
        let mut flags = Self {
            proxy_kind,
            second_factor,
            session_store,
        };
        flags.normalize();
        flags
    }

    /// Drop the session store when no second-factor daemon would use it.
    pub fn normalize(&mut self) {
        if self.session_store && !self.second_factor {
            warn!(
                "session store requested without second-factor auth; ignoring"
            );
            self.session_store = false;
        }
    }

    /// True when the session store service is deployed.
    pub fn session_store_active(&self) -> bool {
        self.second_factor && self.session_store
    }

    /// True when the proxy itself checks the admin credential.
    pub fn uses_basic_auth(&self) -> bool {
        !self.second_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_store_requires_second_factor() {
        let flags = DeploymentFlags::new(ProxyKind::Caddy, false, true);
        assert!(!flags.session_store);
        assert!(!flags.session_store_active());

        let flags = DeploymentFlags::new(ProxyKind::Nginx, true, true);
        assert!(flags.session_store_active());
        assert!(!flags.uses_basic_auth());
    }
}
