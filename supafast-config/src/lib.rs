//! Configuration generator for a self-hosted supafast stack.
//!
//! One run produces a `.env` settings file, a compose service topology, a
//! Caddy or nginx reverse-proxy config and, when second-factor auth is on,
//! the Authelia configuration and users database. The `supafast-init`
//! binary drives [`cli::run_init`]; everything it does is available here so
//! tests can exercise the pipeline without a terminal.

pub mod authelia;
pub mod cli;
pub mod compose;
pub mod constants;
pub mod credentials;
pub mod domain;
pub mod env_writer;
pub mod error;
pub mod models;
pub mod proxy;
pub mod secrets;
pub mod token;
pub mod util;

pub use cli::{GeneratedArtifacts, InitOptions, InitReport, ManagedDiff};
pub use domain::DomainSpec;
pub use error::{InitError, PolicyError, ValidationError};
pub use models::{DeploymentFlags, ProxyKind, ServiceTopology};
pub use token::{TokenClaims, TokenError, TokenPair};
