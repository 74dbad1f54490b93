//! Typed service topology serialized as a compose document.
//!
//! The generator only ever writes this structure; nothing reads it back, so
//! the types model the subset of the compose schema the stack uses.

use std::collections::BTreeMap;

use serde::Serialize;

/// A whole compose document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceTopology {
    /// Compose project name.
    pub name: String,
    /// Services by name.
    pub services: BTreeMap<String, Service>,
    /// Named volumes declared at the top level.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, NamedVolume>,
}

impl ServiceTopology {
    /// Empty topology for project `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// Fetch a service for patching, creating an empty one when absent.
    pub fn service_mut(&mut self, name: &str) -> &mut Service {
        self.services.entry(name.to_string()).or_default()
    }

    /// Add or replace a service.
    pub fn insert(&mut self, name: impl Into<String>, service: Service) {
        self.services.insert(name.into(), service);
    }

    /// Declare a named volume; declaring it twice is a no-op.
    pub fn declare_volume(&mut self, name: &str) {
        self.volumes.entry(name.to_string()).or_default();
    }

    /// Whether `from` has a dependency edge to `to`.
    pub fn depends_on(&self, from: &str, to: &str) -> bool {
        self.services
            .get(from)
            .is_some_and(|svc| svc.depends_on.contains(to))
    }

    /// All dependency edges as `(from, to)` pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.services
            .iter()
            .flat_map(|(from, svc)| {
                svc.depends_on
                    .names()
                    .map(move |to| (from.clone(), to.to_string()))
            })
            .collect()
    }

    /// Render as a compose YAML document.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Named volume with default driver settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NamedVolume {}

/// One compose service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Service {
    /// Image reference; empty for services built locally.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Local build context for services without a published image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Fixed container name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Restart policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,
    /// Command override, one argument per entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Published `host:container` ports.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Environment variables, usually `${KEY}` references into `.env`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Volume mounts in compose short syntax.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Services that must start first.
    #[serde(skip_serializing_if = "Dependencies::is_empty")]
    pub depends_on: Dependencies,
    /// Readiness check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
}

impl Service {
    /// Pulled service running `image`.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            restart: Some(RestartPolicy::UnlessStopped),
            ..Default::default()
        }
    }

    /// Service built from a local context instead of pulled.
    pub fn built_from(context: impl Into<String>) -> Self {
        Self {
            build: Some(context.into()),
            restart: Some(RestartPolicy::UnlessStopped),
            ..Default::default()
        }
    }

    /// Set the container name.
    pub fn named(mut self, container_name: impl Into<String>) -> Self {
        self.container_name = Some(container_name.into());
        self
    }

    /// Builder form of [`set_env`](Self::set_env).
    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_env(key, value);
        self
    }

    /// Set an environment variable, replacing any earlier value.
    pub fn set_env(&mut self, key: &str, value: impl Into<String>) {
        self.environment.insert(key.to_string(), value.into());
    }

    /// Builder form of [`add_volume`](Self::add_volume).
    pub fn volume(mut self, spec: impl Into<String>) -> Self {
        self.add_volume(spec);
        self
    }

    /// Add a volume mount unless the exact spec is already present.
    pub fn add_volume(&mut self, spec: impl Into<String>) {
        let spec = spec.into();
        if !self.volumes.contains(&spec) {
            self.volumes.push(spec);
        }
    }

    /// Depend on `service` reaching `condition`.
    pub fn after(mut self, service: &str, condition: Condition) -> Self {
        self.depends_on.add(service, condition);
        self
    }

    /// Attach a readiness check.
    pub fn with_healthcheck(mut self, healthcheck: Healthcheck) -> Self {
        self.healthcheck = Some(healthcheck);
        self
    }

    /// Override the image command.
    pub fn with_command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(args.into_iter().map(Into::into).collect());
        self
    }
}

/// Compose `restart` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Restart unless stopped by hand.
    UnlessStopped,
}

/// How far a dependency must get before a dependent starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The container is running.
    ServiceStarted,
    /// The container's healthcheck passes.
    ServiceHealthy,
}

/// A single `depends_on` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DependsOn {
    /// Required state of the dependency.
    pub condition: Condition,
}

/// Add-only set of dependency edges.
///
/// Edges cannot be removed; re-adding an edge may only strengthen its
/// condition from `service_started` to `service_healthy`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Dependencies(BTreeMap<String, DependsOn>);

impl Dependencies {
    /// Add an edge or strengthen an existing one.
    pub fn add(&mut self, service: &str, condition: Condition) {
        self.0
            .entry(service.to_string())
            .and_modify(|existing| {
                if existing.condition == Condition::ServiceStarted {
                    existing.condition = condition;
                }
            })
            .or_insert(DependsOn { condition });
    }

    /// Whether an edge to `service` exists.
    pub fn contains(&self, service: &str) -> bool {
        self.0.contains_key(service)
    }

    /// Condition on the edge to `service`.
    pub fn condition(&self, service: &str) -> Option<Condition> {
        self.0.get(service).map(|dep| dep.condition)
    }

    /// Dependency names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no edges.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Compose healthcheck.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Healthcheck {
    /// `CMD` or `CMD-SHELL` followed by the check.
    pub test: Vec<String>,
    /// Time between checks.
    pub interval: String,
    /// Time allowed per check.
    pub timeout: String,
    /// Failures before the service is unhealthy.
    pub retries: u32,
    /// Grace period after start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
}

impl Healthcheck {
    /// `CMD` style check with the defaults used across the stack.
    pub fn cmd<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut test = vec!["CMD".to_string()];
        test.extend(args.into_iter().map(Into::into));
        Self {
            test,
            interval: "5s".into(),
            timeout: "5s".into(),
            retries: 10,
            start_period: None,
        }
    }

    /// `CMD-SHELL` check run through the container's shell.
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            test: vec!["CMD-SHELL".into(), command.into()],
            interval: "5s".into(),
            timeout: "5s".into(),
            retries: 10,
            start_period: None,
        }
    }

    /// Set the grace period.
    pub fn start_period(mut self, period: impl Into<String>) -> Self {
        self.start_period = Some(period.into());
        self
    }
}
