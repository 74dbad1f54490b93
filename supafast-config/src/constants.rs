//! Fixed wiring shared by every generated artifact.
//!
//! Service names, ports and paths live here so the topology, the proxy
//! template and the auth daemon configuration can never disagree about where
//! a request is routed.

/// Compose project name written into the topology.
pub const PROJECT_NAME: &str = "supafast";

/// Settings file, relative to the output directory.
pub const ENV_FILE_NAME: &str = ".env";
/// Appended to the settings file name for its backup.
pub const ENV_BACKUP_SUFFIX: &str = ".bak";
/// Compose file, relative to the output directory.
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";
/// Caddy config, relative to the output directory.
pub const CADDYFILE_PATH: &str = "volumes/proxy/Caddyfile";
/// nginx config, relative to the output directory.
pub const NGINX_CONF_PATH: &str = "volumes/proxy/nginx.conf";
/// Auth daemon configuration.
pub const AUTHELIA_CONFIG_PATH: &str = "volumes/authelia/configuration.yml";
/// Auth daemon users database.
pub const AUTHELIA_USERS_PATH: &str = "volumes/authelia/users_database.yml";
/// Init script creating the auth daemon schema.
pub const AUTHELIA_SCHEMA_SQL_PATH: &str = "volumes/db/authelia.sql";

/// Postgres; these names are compose service names.
pub const DB_SERVICE: &str = "db";
/// API gateway.
pub const GATEWAY_SERVICE: &str = "kong";
/// Dashboard.
pub const STUDIO_SERVICE: &str = "studio";
/// Public reverse proxy.
pub const PROXY_SERVICE: &str = "proxy";
/// Second-factor daemon.
pub const AUTH_DAEMON_SERVICE: &str = "authelia";
/// Redis session store.
pub const SESSION_STORE_SERVICE: &str = "redis";

/// Container port of the gateway.
pub const GATEWAY_PORT: u16 = 8000;
/// Container port of the dashboard.
pub const STUDIO_PORT: u16 = 3000;
/// Container port of the second-factor daemon.
pub const AUTH_DAEMON_PORT: u16 = 9091;
/// Container port of the session store.
pub const SESSION_STORE_PORT: u16 = 6379;
/// Container port of Postgres.
pub const DB_PORT: u16 = 5432;

/// Subdomain of the registered domain that serves the auth daemon portal.
pub const AUTH_PORTAL_SUBDOMAIN: &str = "auth";
/// Postgres schema owned by the auth daemon.
pub const AUTH_DAEMON_SCHEMA: &str = "authelia";

/// API prefixes routed straight to the gateway, in routing order.
pub const GATEWAY_PREFIXES: &[&str] =
    &["/rest", "/auth", "/realtime", "/storage", "/functions"];
/// Generic passthrough prefix; stripped before forwarding to the gateway.
pub const GATEWAY_PASSTHROUGH_PREFIX: &str = "/gateway";
/// Prefix carrying websocket upgrades.
pub const STREAMING_PREFIX: &str = "/realtime";
/// Prefix exempt from the request body cap.
pub const UNLIMITED_BODY_PREFIX: &str = "/storage";

/// Identity headers copied back from the second-factor daemon.
pub const IDENTITY_HEADERS: &[&str] =
    &["Remote-User", "Remote-Groups", "Remote-Email", "Remote-Name"];

/// `iss` claim of the generated API tokens.
pub const TOKEN_ISSUER: &str = "supabase";
/// Five years in seconds.
pub const TOKEN_LIFETIME_SECS: i64 = 157_680_000;

/// bcrypt cost used when the proxy checks the hash on every request.
pub const LOW_WORK_FACTOR: u32 = 10;
/// bcrypt cost used for every other deployment variant.
pub const HIGH_WORK_FACTOR: u32 = 12;

/// Groups given to the admin user in the users database.
pub const DEFAULT_GROUPS: &[&str] = &["admins", "dev"];

/// Keys whose values are secrets; redacted in diffs.
pub const SECRET_KEYS: &[&str] = &[
    "POSTGRES_PASSWORD",
    "JWT_SECRET",
    "ANON_KEY",
    "SERVICE_ROLE_KEY",
    "SECRET_KEY_BASE",
    "VAULT_ENC_KEY",
    "DASHBOARD_PASSWORD_HASH",
    "AUTHELIA_SESSION_SECRET",
    "AUTHELIA_STORAGE_ENCRYPTION_KEY",
    "AUTHELIA_RESET_PASSWORD_JWT_SECRET",
    "REDIS_PASSWORD",
];

/// Every key the generator owns. Anything else found in a prior settings file
/// is carried over untouched.
pub const MANAGED_KEYS: &[&str] = &[
    "POSTGRES_PASSWORD",
    "JWT_SECRET",
    "ANON_KEY",
    "SERVICE_ROLE_KEY",
    "SECRET_KEY_BASE",
    "VAULT_ENC_KEY",
    "DASHBOARD_USERNAME",
    "DASHBOARD_PASSWORD_HASH",
    "POSTGRES_HOST",
    "POSTGRES_DB",
    "POSTGRES_PORT",
    "KONG_HTTP_PORT",
    "KONG_HTTPS_PORT",
    "SITE_URL",
    "API_EXTERNAL_URL",
    "SUPABASE_PUBLIC_URL",
    "SUPABASE_GATEWAY_URL",
    "ADDITIONAL_REDIRECT_URLS",
    "PGRST_DB_SCHEMAS",
    "JWT_EXPIRY",
    "DISABLE_SIGNUP",
    "ENABLE_EMAIL_SIGNUP",
    "ENABLE_EMAIL_AUTOCONFIRM",
    "ENABLE_ANONYMOUS_USERS",
    "ENABLE_PHONE_SIGNUP",
    "ENABLE_PHONE_AUTOCONFIRM",
    "MAILER_URLPATHS_CONFIRMATION",
    "MAILER_URLPATHS_INVITE",
    "MAILER_URLPATHS_RECOVERY",
    "MAILER_URLPATHS_EMAIL_CHANGE",
    "STUDIO_DEFAULT_ORGANIZATION",
    "STUDIO_DEFAULT_PROJECT",
    "FUNCTIONS_VERIFY_JWT",
    "PROXY_KIND",
    "PROXY_DOMAIN",
    "SECOND_FACTOR_ENABLED",
    "AUTHELIA_SESSION_SECRET",
    "AUTHELIA_STORAGE_ENCRYPTION_KEY",
    "AUTHELIA_RESET_PASSWORD_JWT_SECRET",
    "AUTHELIA_COOKIE_DOMAIN",
    "AUTHELIA_URL",
    "SESSION_STORE_ENABLED",
    "REDIS_PASSWORD",
    "REDIS_HOST",
    "REDIS_PORT",
];

/// Whether `key` holds a secret.
pub fn is_secret_key(key: &str) -> bool {
    SECRET_KEYS.contains(&key)
}

/// Whether the generator owns `key`.
pub fn is_managed_key(key: &str) -> bool {
    MANAGED_KEYS.contains(&key)
}
