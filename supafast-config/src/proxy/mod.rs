//! Reverse-proxy configuration.
//!
//! Routing is decided once in a [`RoutePlan`]; the Caddy and nginx modules
//! only translate that plan into their own syntax.

pub mod caddy;
pub mod nginx;

use std::fmt;

use tracing::debug;

use crate::{
    constants::{
        AUTH_DAEMON_PORT, AUTH_DAEMON_SERVICE, GATEWAY_PASSTHROUGH_PREFIX,
        GATEWAY_PORT, GATEWAY_PREFIXES, GATEWAY_SERVICE, IDENTITY_HEADERS,
        STREAMING_PREFIX, STUDIO_PORT, STUDIO_SERVICE, UNLIMITED_BODY_PREFIX,
    },
    domain::{DomainSpec, Scheme},
    models::{DeploymentFlags, ProxyKind},
};

/// Request body cap for every route that does not lift it.
pub const DEFAULT_BODY_LIMIT_MB: u32 = 10;

/// Daemon authorization endpoint used by Caddy `forward_auth`.
pub const FORWARD_AUTH_PATH: &str = "/api/authz/forward-auth";
/// Daemon authorization endpoint used by nginx `auth_request`.
pub const AUTH_REQUEST_PATH: &str = "/api/authz/auth-request";

/// A service the proxy forwards to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upstream {
    /// Compose service name, resolvable on the stack network.
    pub service: &'static str,
    /// Port inside the container.
    pub port: u16,
}

impl Upstream {
    /// The API gateway.
    pub const GATEWAY: Upstream = Upstream {
        service: GATEWAY_SERVICE,
        port: GATEWAY_PORT,
    };
    /// The dashboard.
    pub const STUDIO: Upstream = Upstream {
        service: STUDIO_SERVICE,
        port: STUDIO_PORT,
    };
    /// The second-factor daemon.
    pub const AUTH_DAEMON: Upstream = Upstream {
        service: AUTH_DAEMON_SERVICE,
        port: AUTH_DAEMON_PORT,
    };
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.port)
    }
}

/// An API prefix forwarded to the gateway without authentication at the
/// proxy; the gateway checks API keys itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Path prefix without a trailing slash.
    pub prefix: &'static str,
    /// Where matching requests go.
    pub upstream: Upstream,
    /// Remove the prefix before forwarding.
    pub strip_prefix: bool,
    /// Long-lived upgraded connections (websockets).
    pub streaming: bool,
    /// No request body cap.
    pub unlimited_body: bool,
}

/// How the dashboard catch-all is protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The proxy checks the admin credential from its environment.
    BasicAuth {
        /// Proxy environment variable holding the username.
        username_var: &'static str,
        /// Proxy environment variable holding the bcrypt hash.
        hash_var: &'static str,
    },
    /// The second-factor daemon authorizes every request.
    ForwardAuth {
        /// Daemon asked about each request.
        daemon: Upstream,
        /// Headers copied from the daemon's answer to the upstream request.
        identity_headers: &'static [&'static str],
    },
}

/// Everything not matched by a [`Route`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchAll {
    /// The dashboard.
    pub upstream: Upstream,
    /// Authentication in front of it.
    pub guard: Guard,
}

/// The login portal served by the second-factor daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSite {
    /// Host name of the portal site.
    pub host: String,
    /// The daemon serving it.
    pub upstream: Upstream,
}

/// Proxy-independent routing for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    /// Scheme of the public site; https enables TLS.
    pub scheme: Scheme,
    /// Public host.
    pub host: String,
    /// API routes, matched before the catch-all.
    pub routes: Vec<Route>,
    /// Dashboard route.
    pub catch_all: CatchAll,
    /// Login portal site, with second-factor auth only.
    pub portal: Option<PortalSite>,
    /// Default request body cap in megabytes.
    pub body_limit_mb: u32,
}

impl RoutePlan {
    /// Plan the routes for `domain` under `flags`.
    pub fn new(domain: &DomainSpec, flags: &DeploymentFlags) -> Self {
        let mut routes: Vec<Route> = GATEWAY_PREFIXES
            .iter()
            .map(|&prefix| Route {
                prefix,
                upstream: Upstream::GATEWAY,
                strip_prefix: false,
                streaming: prefix == STREAMING_PREFIX,
                unlimited_body: prefix == UNLIMITED_BODY_PREFIX,
            })
            .collect();
        routes.push(Route {
            prefix: GATEWAY_PASSTHROUGH_PREFIX,
            upstream: Upstream::GATEWAY,
            strip_prefix: true,
            streaming: false,
            unlimited_body: false,
        });

        let (guard, portal) = if flags.second_factor {
            (
                Guard::ForwardAuth {
                    daemon: Upstream::AUTH_DAEMON,
                    identity_headers: IDENTITY_HEADERS,
                },
                Some(PortalSite {
                    host: domain.auth_portal_host(),
                    upstream: Upstream::AUTH_DAEMON,
                }),
            )
        } else {
            (
                Guard::BasicAuth {
                    username_var: "DASHBOARD_USERNAME",
                    hash_var: "DASHBOARD_PASSWORD_HASH",
                },
                None,
            )
        };

        Self {
            scheme: domain.scheme(),
            host: domain.host().to_string(),
            routes,
            catch_all: CatchAll {
                upstream: Upstream::STUDIO,
                guard,
            },
            portal,
            body_limit_mb: DEFAULT_BODY_LIMIT_MB,
        }
    }

    /// Whether the public site terminates TLS.
    pub fn tls(&self) -> bool {
        self.scheme.is_tls()
    }

    /// The API route for `prefix`, if any.
    pub fn route(&self, prefix: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.prefix == prefix)
    }
}

/// Render the plan in the syntax of `kind`.
pub fn render(plan: &RoutePlan, kind: ProxyKind) -> String {
    debug!(
        proxy = %kind,
        routes = plan.routes.len(),
        tls = plan.tls(),
        "rendering proxy configuration"
    );
    match kind {
        ProxyKind::Caddy => caddy::render(plan),
        ProxyKind::Nginx => nginx::render(plan),
    }
}
