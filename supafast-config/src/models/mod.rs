//! Deployment switches and the service topology.

pub mod flags;
pub mod topology;

pub use flags::{DeploymentFlags, ProxyKind};
pub use topology::{
    Condition, Dependencies, Healthcheck, NamedVolume, RestartPolicy, Service,
    ServiceTopology,
};
