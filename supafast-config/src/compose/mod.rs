//! Deployment topology: the fixed base stack plus flag-driven patches.

pub mod patches;

use tracing::{debug, info};

use crate::{
    constants::{
        DB_PORT, DB_SERVICE, GATEWAY_PORT, GATEWAY_SERVICE, PROJECT_NAME,
        PROXY_SERVICE, STUDIO_PORT, STUDIO_SERVICE,
    },
    credentials::Credentials,
    models::{
        Condition, DeploymentFlags, Healthcheck, Service, ServiceTopology,
    },
};

pub use patches::Patch;

/// Auth API.
pub const AUTH_SERVICE: &str = "auth";
/// PostgREST.
pub const REST_SERVICE: &str = "rest";
/// Realtime websocket server.
pub const REALTIME_SERVICE: &str = "realtime";
/// Object storage API.
pub const STORAGE_SERVICE: &str = "storage";
/// Image transformer used by storage.
pub const IMGPROXY_SERVICE: &str = "imgproxy";
/// Postgres metadata API used by the dashboard.
pub const META_SERVICE: &str = "meta";
/// Edge functions runtime.
pub const FUNCTIONS_SERVICE: &str = "functions";
/// Local model server.
pub const MODEL_SERVICE: &str = "ollama";
/// Sample API service built from `./fastapi`.
pub const DEMO_API_SERVICE: &str = "fastapi";

const DB_DATA_VOLUME: &str = "db-config";
const MODEL_VOLUME: &str = "ollama-models";

/// Everything the patches read besides the topology itself.
#[derive(Debug, Clone, Copy)]
pub struct ComposeContext<'a> {
    /// Switches selecting the patches.
    pub flags: &'a DeploymentFlags,
    /// Hashed admin credential for basic auth.
    pub credentials: &'a Credentials,
}

/// Build the base stack and apply every patch whose flags match, in order.
pub fn compose_topology(ctx: &ComposeContext<'_>) -> ServiceTopology {
    let mut topology = base_topology();
    for patch in Patch::ORDER {
        if patch.applies(ctx.flags) {
            debug!(patch = patch.name(), "applying topology patch");
            patch.apply(&mut topology, ctx);
        }
    }
    info!(
        services = topology.services.len(),
        edges = topology.edges().len(),
        proxy = %ctx.flags.proxy_kind,
        "composed service topology"
    );
    topology
}

fn db_url(user: &str) -> String {
    format!(
        "postgres://{user}:${{POSTGRES_PASSWORD}}@${{POSTGRES_HOST}}:${{POSTGRES_PORT}}/${{POSTGRES_DB}}"
    )
}

/// Services shared by every variant. The proxy is a placeholder that the
/// proxy patch fills in.
pub fn base_topology() -> ServiceTopology {
    let mut topology = ServiceTopology::new(PROJECT_NAME);

    topology.insert(
        DB_SERVICE,
        Service::new("supabase/postgres:15.8.1.060")
            .named("supabase-db")
            .volume("./volumes/db/data:/var/lib/postgresql/data:Z")
            .volume(format!("{DB_DATA_VOLUME}:/etc/postgresql-custom"))
            .env("POSTGRES_HOST", "/var/run/postgresql")
            .env("PGPORT", "${POSTGRES_PORT}")
            .env("POSTGRES_PORT", "${POSTGRES_PORT}")
            .env("PGPASSWORD", "${POSTGRES_PASSWORD}")
            .env("POSTGRES_PASSWORD", "${POSTGRES_PASSWORD}")
            .env("PGDATABASE", "${POSTGRES_DB}")
            .env("POSTGRES_DB", "${POSTGRES_DB}")
            .env("JWT_SECRET", "${JWT_SECRET}")
            .env("JWT_EXP", "${JWT_EXPIRY}")
            .with_healthcheck(Healthcheck::cmd([
                "pg_isready",
                "-U",
                "postgres",
                "-h",
                "localhost",
            ])),
    );
    topology.declare_volume(DB_DATA_VOLUME);

    topology.insert(
        GATEWAY_SERVICE,
        Service::new("kong:2.8.1")
            .named("supabase-kong")
            .volume("./volumes/api/kong.yml:/home/kong/temp.yml:ro")
            .env("KONG_DATABASE", "off")
            .env("KONG_DECLARATIVE_CONFIG", "/home/kong/kong.yml")
            .env("KONG_DNS_ORDER", "LAST,A,CNAME")
            .env(
                "KONG_PLUGINS",
                "request-transformer,cors,key-auth,acl,basic-auth",
            )
            .env("SUPABASE_ANON_KEY", "${ANON_KEY}")
            .env("SUPABASE_SERVICE_KEY", "${SERVICE_ROLE_KEY}")
            .after(AUTH_SERVICE, Condition::ServiceStarted)
            .after(REST_SERVICE, Condition::ServiceStarted)
            .with_healthcheck(Healthcheck::cmd(["kong", "health"])),
    );

    topology.insert(
        AUTH_SERVICE,
        Service::new("supabase/gotrue:v2.170.0")
            .named("supabase-auth")
            .env("GOTRUE_API_HOST", "0.0.0.0")
            .env("GOTRUE_API_PORT", "9999")
            .env("API_EXTERNAL_URL", "${API_EXTERNAL_URL}")
            .env("GOTRUE_DB_DRIVER", "postgres")
            .env("GOTRUE_DB_DATABASE_URL", db_url("supabase_auth_admin"))
            .env("GOTRUE_SITE_URL", "${SITE_URL}")
            .env("GOTRUE_URI_ALLOW_LIST", "${ADDITIONAL_REDIRECT_URLS}")
            .env("GOTRUE_DISABLE_SIGNUP", "${DISABLE_SIGNUP}")
            .env("GOTRUE_JWT_ADMIN_ROLES", "service_role")
            .env("GOTRUE_JWT_AUD", "authenticated")
            .env("GOTRUE_JWT_DEFAULT_GROUP_NAME", "authenticated")
            .env("GOTRUE_JWT_EXP", "${JWT_EXPIRY}")
            .env("GOTRUE_JWT_SECRET", "${JWT_SECRET}")
            .env("GOTRUE_EXTERNAL_EMAIL_ENABLED", "${ENABLE_EMAIL_SIGNUP}")
            .env(
                "GOTRUE_EXTERNAL_ANONYMOUS_USERS_ENABLED",
                "${ENABLE_ANONYMOUS_USERS}",
            )
            .env("GOTRUE_MAILER_AUTOCONFIRM", "${ENABLE_EMAIL_AUTOCONFIRM}")
            .env(
                "GOTRUE_MAILER_URLPATHS_CONFIRMATION",
                "${MAILER_URLPATHS_CONFIRMATION}",
            )
            .env("GOTRUE_MAILER_URLPATHS_INVITE", "${MAILER_URLPATHS_INVITE}")
            .env(
                "GOTRUE_MAILER_URLPATHS_RECOVERY",
                "${MAILER_URLPATHS_RECOVERY}",
            )
            .env(
                "GOTRUE_MAILER_URLPATHS_EMAIL_CHANGE",
                "${MAILER_URLPATHS_EMAIL_CHANGE}",
            )
            .env("GOTRUE_EXTERNAL_PHONE_ENABLED", "${ENABLE_PHONE_SIGNUP}")
            .env("GOTRUE_SMS_AUTOCONFIRM", "${ENABLE_PHONE_AUTOCONFIRM}")
            .after(DB_SERVICE, Condition::ServiceHealthy)
            .with_healthcheck(Healthcheck::cmd([
                "wget",
                "--no-verbose",
                "--tries=1",
                "--spider",
                "http://localhost:9999/health",
            ])),
    );

    topology.insert(
        REST_SERVICE,
        Service::new("postgrest/postgrest:v12.2.8")
            .named("supabase-rest")
            .env("PGRST_DB_URI", db_url("authenticator"))
            .env("PGRST_DB_SCHEMAS", "${PGRST_DB_SCHEMAS}")
            .env("PGRST_DB_ANON_ROLE", "anon")
            .env("PGRST_JWT_SECRET", "${JWT_SECRET}")
            .env("PGRST_DB_USE_LEGACY_GUCS", "false")
            .env("PGRST_APP_SETTINGS_JWT_SECRET", "${JWT_SECRET}")
            .env("PGRST_APP_SETTINGS_JWT_EXP", "${JWT_EXPIRY}")
            .with_command(["postgrest"])
            .after(DB_SERVICE, Condition::ServiceHealthy),
    );

    topology.insert(
        REALTIME_SERVICE,
        Service::new("supabase/realtime:v2.34.43")
            .named("realtime-dev.supabase-realtime")
            .env("PORT", "4000")
            .env("DB_HOST", "${POSTGRES_HOST}")
            .env("DB_PORT", "${POSTGRES_PORT}")
            .env("DB_USER", "supabase_admin")
            .env("DB_PASSWORD", "${POSTGRES_PASSWORD}")
            .env("DB_NAME", "${POSTGRES_DB}")
            .env("DB_AFTER_CONNECT_QUERY", "SET search_path TO _realtime")
            .env("DB_ENC_KEY", "supabaserealtime")
            .env("API_JWT_SECRET", "${JWT_SECRET}")
            .env("SECRET_KEY_BASE", "${SECRET_KEY_BASE}")
            .env("ERL_AFLAGS", "-proto_dist inet_tcp")
            .env("DNS_NODES", "''")
            .env("RLIMIT_NOFILE", "10000")
            .env("APP_NAME", "realtime")
            .env("SEED_SELF_HOST", "true")
            .env("RUN_JANITOR", "true")
            .after(DB_SERVICE, Condition::ServiceHealthy)
            .with_healthcheck(Healthcheck::cmd([
                "curl",
                "-sSfL",
                "--head",
                "-o",
                "/dev/null",
                "-H",
                "Authorization: Bearer ${ANON_KEY}",
                "http://localhost:4000/api/tenants/realtime-dev/health",
            ])),
    );

    topology.insert(
        STORAGE_SERVICE,
        Service::new("supabase/storage-api:v1.19.3")
            .named("supabase-storage")
            .volume("./volumes/storage:/var/lib/storage:z")
            .env("ANON_KEY", "${ANON_KEY}")
            .env("SERVICE_KEY", "${SERVICE_ROLE_KEY}")
            .env("POSTGREST_URL", "http://rest:3000")
            .env("PGRST_JWT_SECRET", "${JWT_SECRET}")
            .env("DATABASE_URL", db_url("supabase_storage_admin"))
            .env("FILE_SIZE_LIMIT", "52428800")
            .env("STORAGE_BACKEND", "file")
            .env("FILE_STORAGE_BACKEND_PATH", "/var/lib/storage")
            .env("TENANT_ID", "stub")
            .env("REGION", "stub")
            .env("GLOBAL_S3_BUCKET", "stub")
            .env("ENABLE_IMAGE_TRANSFORMATION", "true")
            .env("IMGPROXY_URL", "http://imgproxy:5001")
            .after(DB_SERVICE, Condition::ServiceHealthy)
            .after(REST_SERVICE, Condition::ServiceStarted)
            .after(IMGPROXY_SERVICE, Condition::ServiceStarted)
            .with_healthcheck(Healthcheck::cmd([
                "wget",
                "--no-verbose",
                "--tries=1",
                "--spider",
                "http://storage:5000/status",
            ])),
    );

    topology.insert(
        IMGPROXY_SERVICE,
        Service::new("darthsim/imgproxy:v3.8.0")
            .named("supabase-imgproxy")
            .volume("./volumes/storage:/var/lib/storage:z")
            .env("IMGPROXY_BIND", ":5001")
            .env("IMGPROXY_LOCAL_FILESYSTEM_ROOT", "/")
            .env("IMGPROXY_USE_ETAG", "true")
            .env("IMGPROXY_ENABLE_WEBP_DETECTION", "true")
            .with_healthcheck(Healthcheck::cmd(["imgproxy", "health"])),
    );

    topology.insert(
        META_SERVICE,
        Service::new("supabase/postgres-meta:v0.86.1")
            .named("supabase-meta")
            .env("PG_META_PORT", "8080")
            .env("PG_META_DB_HOST", "${POSTGRES_HOST}")
            .env("PG_META_DB_PORT", "${POSTGRES_PORT}")
            .env("PG_META_DB_NAME", "${POSTGRES_DB}")
            .env("PG_META_DB_USER", "supabase_admin")
            .env("PG_META_DB_PASSWORD", "${POSTGRES_PASSWORD}")
            .after(DB_SERVICE, Condition::ServiceHealthy),
    );

    topology.insert(
        STUDIO_SERVICE,
        Service::new("supabase/studio:20250317-6955350")
            .named("supabase-studio")
            .env("STUDIO_PG_META_URL", "http://meta:8080")
            .env("POSTGRES_PASSWORD", "${POSTGRES_PASSWORD}")
            .env("DEFAULT_ORGANIZATION_NAME", "${STUDIO_DEFAULT_ORGANIZATION}")
            .env("DEFAULT_PROJECT_NAME", "${STUDIO_DEFAULT_PROJECT}")
            .env("SUPABASE_URL", format!("http://{GATEWAY_SERVICE}:{GATEWAY_PORT}"))
            .env("SUPABASE_PUBLIC_URL", "${SUPABASE_PUBLIC_URL}")
            .env("SUPABASE_ANON_KEY", "${ANON_KEY}")
            .env("SUPABASE_SERVICE_KEY", "${SERVICE_ROLE_KEY}")
            .env("AUTH_JWT_SECRET", "${JWT_SECRET}")
            .env("PORT", STUDIO_PORT.to_string())
            .after(META_SERVICE, Condition::ServiceStarted)
            .with_healthcheck(Healthcheck::cmd([
                "node",
                "-e",
                "fetch('http://studio:3000/api/platform/profile').then((r) => {if (r.status !== 200) throw new Error(r.status)})",
            ])),
    );

    topology.insert(
        FUNCTIONS_SERVICE,
        Service::new("supabase/edge-runtime:v1.67.4")
            .named("supabase-edge-functions")
            .volume("./volumes/functions:/home/deno/functions:Z")
            .env("JWT_SECRET", "${JWT_SECRET}")
            .env("SUPABASE_URL", format!("http://{GATEWAY_SERVICE}:{GATEWAY_PORT}"))
            .env("SUPABASE_ANON_KEY", "${ANON_KEY}")
            .env("SUPABASE_SERVICE_ROLE_KEY", "${SERVICE_ROLE_KEY}")
            .env("SUPABASE_DB_URL", db_url("postgres"))
            .env("VERIFY_JWT", "${FUNCTIONS_VERIFY_JWT}")
            .with_command(["start", "--main-service", "/home/deno/functions/main"]),
    );

    topology.insert(
        MODEL_SERVICE,
        Service::new("ollama/ollama:0.6.2")
            .named("supafast-ollama")
            .volume(format!("{MODEL_VOLUME}:/root/.ollama")),
    );
    topology.declare_volume(MODEL_VOLUME);

    topology.insert(
        DEMO_API_SERVICE,
        Service::built_from("./fastapi")
            .named("supafast-fastapi")
            .env("SUPABASE_URL", format!("http://{GATEWAY_SERVICE}:{GATEWAY_PORT}"))
            .env("SUPABASE_ANON_KEY", "${ANON_KEY}")
            .env("SUPABASE_SERVICE_ROLE_KEY", "${SERVICE_ROLE_KEY}")
            .env("DATABASE_URL", format!(
                "postgresql://postgres:${{POSTGRES_PASSWORD}}@{DB_SERVICE}:{DB_PORT}/${{POSTGRES_DB}}"
            ))
            .env("OLLAMA_BASE_URL", format!("http://{MODEL_SERVICE}:11434"))
            .after(GATEWAY_SERVICE, Condition::ServiceHealthy)
            .after(MODEL_SERVICE, Condition::ServiceStarted),
    );

    topology.insert(
        PROXY_SERVICE,
        Service::default().after(GATEWAY_SERVICE, Condition::ServiceHealthy),
    );

    topology
}
