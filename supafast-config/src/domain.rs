//! Base URL validation and domain decomposition.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use tracing::warn;

use crate::{
    constants::AUTH_PORTAL_SUBDOMAIN,
    error::{InitError, PolicyError, ValidationError},
};

static HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9-]+\.)+[A-Za-z]{2,}$")
        .expect("host pattern compiles")
});

/// URL scheme of the public base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plaintext listener only.
    Http,
    /// TLS plus a plaintext redirect.
    Https,
}

impl Scheme {
    /// `http` or `https`.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// True when the proxy terminates TLS.
    pub fn is_tls(self) -> bool {
        matches!(self, Scheme::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated public base URL split into the parts downstream artifacts need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSpec {
    scheme: Scheme,
    host: String,
    registered_domain: String,
}

impl DomainSpec {
    /// Parse `scheme://host`.
    ///
    /// The registered domain is the last two labels of the host. No
    /// public-suffix list is consulted, so hosts under multi-label suffixes
    /// such as `co.uk` are split at the wrong label.
    pub fn parse(raw: &str, second_factor: bool) -> Result<Self, InitError> {
        let trimmed = raw.trim();
        let (scheme, rest) = if let Some(rest) = trimmed.strip_prefix("https://")
        {
            (Scheme::Https, rest)
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            return Err(ValidationError::Format {
                input: trimmed.to_string(),
                reason: "must start with http:// or https://",
            }
            .into());
        };

        if !HOST_PATTERN.is_match(rest) {
            return Err(ValidationError::Format {
                input: trimmed.to_string(),
                reason: "host must look like name.example.com",
            }
            .into());
        }

        let host = rest.to_ascii_lowercase();
        let registered_domain = registered_domain_of(&host);
        if looks_like_multi_label_suffix(&registered_domain) {
            warn!(
                host = %host,
                registered_domain = %registered_domain,
                "registered domain may sit on a public suffix; session cookies will be scoped to it"
            );
        }

        if second_factor && !scheme.is_tls() {
            return Err(PolicyError::SecondFactorNeedsHttps {
                scheme: scheme.as_str(),
            }
            .into());
        }

        let spec = Self {
            scheme,
            host,
            registered_domain,
        };
        if second_factor && spec.host == spec.auth_portal_host() {
            return Err(PolicyError::PortalHostCollision { host: spec.host }.into());
        }
        Ok(spec)
    }

    /// Scheme of the base URL.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Lowercased public host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Last two labels of the host; scopes session cookies.
    pub fn registered_domain(&self) -> &str {
        &self.registered_domain
    }

    /// `scheme://host` without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    /// Host serving the second-factor portal.
    pub fn auth_portal_host(&self) -> String {
        format!("{AUTH_PORTAL_SUBDOMAIN}.{}", self.registered_domain)
    }

    /// Base URL of the second-factor portal.
    pub fn auth_portal_url(&self) -> String {
        format!("{}://{}", self.scheme, self.auth_portal_host())
    }
}

fn registered_domain_of(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    labels[labels.len().saturating_sub(2)..].join(".")
}

fn looks_like_multi_label_suffix(registered: &str) -> bool {
    match registered.split_once('.') {
        Some((second, tld)) => tld.len() == 2 && second.len() <= 3,
        None => false,
    }
}
