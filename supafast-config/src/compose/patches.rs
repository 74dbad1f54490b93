//! Named topology patches.
//!
//! Each patch is a pure function of the topology and the compose context.
//! They run in [`Patch::ORDER`] and only ever add services, env entries,
//! volumes or dependency edges.

use crate::{
    compose::ComposeContext,
    constants::{
        AUTH_DAEMON_PORT, AUTH_DAEMON_SERVICE, AUTHELIA_SCHEMA_SQL_PATH,
        DB_SERVICE, GATEWAY_SERVICE, PROXY_SERVICE, SESSION_STORE_SERVICE,
    },
    models::{
        Condition, DeploymentFlags, Healthcheck, ProxyKind, RestartPolicy,
        Service, ServiceTopology,
    },
};

/// Where the nginx container reads its generated htpasswd file.
pub const HTPASSWD_PATH: &str = "/etc/nginx/.htpasswd";

const CADDY_DATA_VOLUME: &str = "caddy-data";
const CADDY_CONFIG_VOLUME: &str = "caddy-config";

/// A topology change tied to a deployment switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch {
    /// Public proxy service with its config mount.
    Proxy,
    /// Second-factor daemon, gated in front of the dashboard.
    AuthDaemon,
    /// Redis for daemon sessions.
    SessionStore,
    /// Admin username and hash handed to the proxy for basic auth.
    CredentialInjection,
}

impl Patch {
    /// Application order.
    pub const ORDER: [Patch; 4] = [
        Patch::Proxy,
        Patch::AuthDaemon,
        Patch::SessionStore,
        Patch::CredentialInjection,
    ];

    /// Name shown in logs and the run summary.
    pub fn name(self) -> &'static str {
        match self {
            Patch::Proxy => "proxy",
            Patch::AuthDaemon => "auth-daemon",
            Patch::SessionStore => "session-store",
            Patch::CredentialInjection => "credential-injection",
        }
    }

    /// Whether the patch runs for `flags`.
    pub fn applies(self, flags: &DeploymentFlags) -> bool {
        match self {
            Patch::Proxy => true,
            Patch::AuthDaemon => flags.second_factor,
            Patch::SessionStore => flags.session_store_active(),
            Patch::CredentialInjection => flags.uses_basic_auth(),
        }
    }

    /// Apply the patch to `topology`.
    pub fn apply(self, topology: &mut ServiceTopology, ctx: &ComposeContext<'_>) {
        match self {
            Patch::Proxy => patch_proxy(topology, ctx.flags.proxy_kind),
            Patch::AuthDaemon => patch_auth_daemon(topology),
            Patch::SessionStore => patch_session_store(topology),
            Patch::CredentialInjection => patch_credentials(topology, ctx),
        }
    }
}

/// Patches that would run for `flags`, in order.
pub fn plan(flags: &DeploymentFlags) -> Vec<Patch> {
    Patch::ORDER
        .into_iter()
        .filter(|patch| patch.applies(flags))
        .collect()
}

fn patch_proxy(topology: &mut ServiceTopology, kind: ProxyKind) {
    let config_mount = format!(
        "./{}:{}:ro",
        kind.config_path(),
        kind.config_mount_target()
    );

    let proxy = topology.service_mut(PROXY_SERVICE);
    proxy.image = kind.image().to_string();
    proxy.container_name = Some(kind.container_name());
    proxy.restart = Some(RestartPolicy::UnlessStopped);
    for port in ["80:80", "443:443"] {
        if !proxy.ports.iter().any(|p| p == port) {
            proxy.ports.push(port.to_string());
        }
    }
    proxy.add_volume(config_mount);
    proxy.depends_on.add(GATEWAY_SERVICE, Condition::ServiceHealthy);

    match kind {
        ProxyKind::Caddy => {
            proxy.add_volume(format!("{CADDY_DATA_VOLUME}:/data"));
            proxy.add_volume(format!("{CADDY_CONFIG_VOLUME}:/config"));
            topology.declare_volume(CADDY_DATA_VOLUME);
            topology.declare_volume(CADDY_CONFIG_VOLUME);
        }
        ProxyKind::Nginx => {
            proxy.add_volume("./volumes/proxy/certs:/etc/nginx/certs:ro");
        }
    }
}

fn patch_auth_daemon(topology: &mut ServiceTopology) {
    topology.insert(
        AUTH_DAEMON_SERVICE,
        Service::new("authelia/authelia:4.38")
            .named("supafast-authelia")
            .volume("./volumes/authelia:/config")
            .env("AUTHELIA_SESSION_SECRET", "${AUTHELIA_SESSION_SECRET}")
            .env(
                "AUTHELIA_STORAGE_ENCRYPTION_KEY",
                "${AUTHELIA_STORAGE_ENCRYPTION_KEY}",
            )
            .env(
                "AUTHELIA_IDENTITY_VALIDATION_RESET_PASSWORD_JWT_SECRET",
                "${AUTHELIA_RESET_PASSWORD_JWT_SECRET}",
            )
            .env("AUTHELIA_STORAGE_POSTGRES_PASSWORD", "${POSTGRES_PASSWORD}")
            .after(DB_SERVICE, Condition::ServiceHealthy)
            .with_healthcheck(
                Healthcheck::shell(format!(
                    "wget --quiet --tries=1 --spider http://127.0.0.1:{AUTH_DAEMON_PORT}/api/health || exit 1"
                ))
                .start_period("30s"),
            ),
    );

    topology.service_mut(DB_SERVICE).add_volume(format!(
        "./{AUTHELIA_SCHEMA_SQL_PATH}:/docker-entrypoint-initdb.d/migrations/99-authelia.sql:Z"
    ));

    topology
        .service_mut(PROXY_SERVICE)
        .depends_on
        .add(AUTH_DAEMON_SERVICE, Condition::ServiceHealthy);
}

fn patch_session_store(topology: &mut ServiceTopology) {
    topology.insert(
        SESSION_STORE_SERVICE,
        Service::new("redis:7-alpine")
            .named("supafast-redis")
            .env("REDIS_PASSWORD", "${REDIS_PASSWORD}")
            .with_command(["redis-server", "--requirepass", "${REDIS_PASSWORD}"])
            .with_healthcheck(Healthcheck::shell(
                "redis-cli -a \"$$REDIS_PASSWORD\" --no-auth-warning ping | grep PONG",
            )),
    );

    let daemon = topology.service_mut(AUTH_DAEMON_SERVICE);
    daemon.set_env("AUTHELIA_SESSION_REDIS_PASSWORD", "${REDIS_PASSWORD}");
    daemon
        .depends_on
        .add(SESSION_STORE_SERVICE, Condition::ServiceHealthy);
}

fn patch_credentials(topology: &mut ServiceTopology, ctx: &ComposeContext<'_>) {
    let proxy = topology.service_mut(PROXY_SERVICE);
    proxy.set_env("DASHBOARD_USERNAME", ctx.credentials.username());
    proxy.set_env(
        "DASHBOARD_PASSWORD_HASH",
        ctx.credentials.compose_escaped_hash(),
    );

    if ctx.flags.proxy_kind == ProxyKind::Nginx {
        proxy.command = Some(vec![
            "/bin/sh".into(),
            "-c".into(),
            format!(
                "printf '%s:%s\\n' \"$$DASHBOARD_USERNAME\" \"$$DASHBOARD_PASSWORD_HASH\" > {HTPASSWD_PATH} && exec nginx -g 'daemon off;'"
            ),
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compose::compose_topology,
        credentials::{Credentials, PlaintextPassword, WorkFactorPolicy},
    };

    fn run(
        proxy: ProxyKind,
        second_factor: bool,
        session_store: bool,
    ) -> (ServiceTopology, Credentials) {
        let flags =
            DeploymentFlags::new(proxy, second_factor, session_store);
        let credentials = Credentials::hash(
            "admin",
            PlaintextPassword::new("s3cret-pass"),
            &flags,
            &WorkFactorPolicy { low: 4, high: 4 },
        )
        .unwrap();
        let ctx = ComposeContext {
            flags: &flags,
            credentials: &credentials,
        };
        (compose_topology(&ctx), credentials)
    }

    #[test]
    fn patch_order_is_fixed() {
        let flags = DeploymentFlags::new(ProxyKind::Nginx, true, true);
        assert_eq!(
            plan(&flags),
            vec![Patch::Proxy, Patch::AuthDaemon, Patch::SessionStore]
        );
        let flags = DeploymentFlags::new(ProxyKind::Caddy, false, true);
        assert_eq!(plan(&flags), vec![Patch::Proxy, Patch::CredentialInjection]);
    }

    #[test]
    fn second_factor_wires_daemon_for_both_variants() {
        for kind in [ProxyKind::Caddy, ProxyKind::Nginx] {
            let (topology, _) = run(kind, true, false);
            assert!(topology.depends_on(PROXY_SERVICE, AUTH_DAEMON_SERVICE));
            assert!(topology.depends_on(AUTH_DAEMON_SERVICE, DB_SERVICE));
            assert!(topology.depends_on(PROXY_SERVICE, GATEWAY_SERVICE));
            assert!(topology.service(SESSION_STORE_SERVICE).is_none());

            let proxy = topology.service(PROXY_SERVICE).unwrap();
            assert_eq!(proxy.image, kind.image());
            assert!(!proxy.environment.contains_key("DASHBOARD_PASSWORD_HASH"));

            let db = topology.service(DB_SERVICE).unwrap();
            assert!(db.volumes.iter().any(|v| v.contains("authelia.sql")));
        }
    }

    #[test]
    fn session_store_adds_healthy_edge() {
        let (topology, _) = run(ProxyKind::Caddy, true, true);
        assert_eq!(
            topology
                .service(AUTH_DAEMON_SERVICE)
                .unwrap()
                .depends_on
                .condition(SESSION_STORE_SERVICE),
            Some(Condition::ServiceHealthy)
        );
        let redis = topology.service(SESSION_STORE_SERVICE).unwrap();
        assert!(redis.healthcheck.as_ref().unwrap().test[1].contains("ping"));
    }

    #[test]
    fn basic_auth_injects_escaped_hash() {
        let (topology, credentials) = run(ProxyKind::Caddy, false, false);
        let proxy = topology.service(PROXY_SERVICE).unwrap();
        assert_eq!(proxy.environment["DASHBOARD_USERNAME"], "admin");
        assert_eq!(
            proxy.environment["DASHBOARD_PASSWORD_HASH"],
            credentials.compose_escaped_hash()
        );
        assert!(proxy.command.is_none());
        assert!(topology.service(AUTH_DAEMON_SERVICE).is_none());
        assert!(topology.volumes.contains_key(CADDY_DATA_VOLUME));
    }

    #[test]
    fn nginx_basic_auth_writes_htpasswd_at_start() {
        let (topology, _) = run(ProxyKind::Nginx, false, false);
        let proxy = topology.service(PROXY_SERVICE).unwrap();
        let command = proxy.command.as_ref().unwrap().join(" ");
        assert!(command.contains(HTPASSWD_PATH));
        assert!(command.contains("$$DASHBOARD_PASSWORD_HASH"));
        assert!(
            proxy
                .volumes
                .iter()
                .any(|v| v.ends_with("/etc/nginx/nginx.conf:ro"))
        );
    }

    #[test]
    fn reapplying_proxy_patch_adds_nothing() {
        let (mut topology, _) = run(ProxyKind::Caddy, true, false);
        let before = topology.clone();
        patch_proxy(&mut topology, ProxyKind::Caddy);
        assert_eq!(topology, before);
    }
}
