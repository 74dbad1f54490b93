//! Second-factor daemon configuration.
//!
//! Only rendered when second-factor auth is enabled. Secrets never appear in
//! these files; the daemon reads them from its `AUTHELIA_*` environment.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::{
    constants::{
        AUTH_DAEMON_PORT, AUTH_DAEMON_SCHEMA, DB_PORT, DB_SERVICE,
        DEFAULT_GROUPS, SESSION_STORE_PORT, SESSION_STORE_SERVICE,
    },
    credentials::Credentials,
    domain::DomainSpec,
    error::InitError,
    models::DeploymentFlags,
};

/// Directory the daemon container mounts its configuration at.
const CONFIG_DIR: &str = "/config";

/// Admin identity fields only the second-factor daemon needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminProfile {
    /// Address written to the users database.
    pub email: String,
    /// Name shown on the login portal.
    pub display_name: String,
}

#[derive(Debug, Serialize)]
struct UsersDatabase<'a> {
    users: BTreeMap<&'a str, UserEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct UserEntry<'a> {
    disabled: bool,
    displayname: &'a str,
    password: &'a str,
    email: &'a str,
    groups: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct Configuration {
    theme: &'static str,
    server: Server,
    log: Log,
    totp: Totp,
    authentication_backend: AuthenticationBackend,
    access_control: AccessControl,
    session: Session,
    regulation: Regulation,
    storage: Storage,
    notifier: Notifier,
}

#[derive(Debug, Serialize)]
struct Server {
    address: String,
}

#[derive(Debug, Serialize)]
struct Log {
    level: &'static str,
}

#[derive(Debug, Serialize)]
struct Totp {
    issuer: String,
}

#[derive(Debug, Serialize)]
struct AuthenticationBackend {
    file: FileBackend,
}

#[derive(Debug, Serialize)]
struct FileBackend {
    path: String,
    password: PasswordAlgorithm,
}

#[derive(Debug, Serialize)]
struct PasswordAlgorithm {
    algorithm: &'static str,
    bcrypt: BcryptSettings,
}

#[derive(Debug, Serialize)]
struct BcryptSettings {
    variant: &'static str,
    cost: u32,
}

#[derive(Debug, Serialize)]
struct AccessControl {
    default_policy: &'static str,
    rules: Vec<AccessRule>,
}

#[derive(Debug, Serialize)]
struct AccessRule {
    domain: String,
    policy: &'static str,
}

#[derive(Debug, Serialize)]
struct Session {
    cookies: Vec<SessionCookie>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redis: Option<RedisSession>,
}

#[derive(Debug, Serialize)]
struct SessionCookie {
    domain: String,
    authelia_url: String,
    default_redirection_url: String,
}

#[derive(Debug, Serialize)]
struct RedisSession {
    host: &'static str,
    port: u16,
}

#[derive(Debug, Serialize)]
struct Regulation {
    max_retries: u32,
    find_time: &'static str,
    ban_time: &'static str,
}

#[derive(Debug, Serialize)]
struct Storage {
    postgres: PostgresStorage,
}

#[derive(Debug, Serialize)]
struct PostgresStorage {
    address: String,
    database: &'static str,
    schema: &'static str,
    username: &'static str,
}

#[derive(Debug, Serialize)]
struct Notifier {
    filesystem: FilesystemNotifier,
}

#[derive(Debug, Serialize)]
struct FilesystemNotifier {
    filename: String,
}

/// Rendered daemon files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutheliaArtifacts {
    /// `configuration.yml`.
    pub configuration: String,
    /// `users_database.yml`.
    pub users_database: String,
    /// Postgres init script for the daemon schema.
    pub schema_sql: String,
}

/// Render the daemon's files, or `None` when second-factor auth is off.
pub fn render(
    domain: &DomainSpec,
    flags: &DeploymentFlags,
    credentials: &Credentials,
    profile: &AdminProfile,
    work_factor: u32,
) -> Result<Option<AutheliaArtifacts>, InitError> {
    if !flags.second_factor {
        return Ok(None);
    }
    let artifacts = AutheliaArtifacts {
        configuration: configuration(domain, flags, work_factor)?,
        users_database: users_database(credentials, profile)?,
        schema_sql: schema_sql(),
    };
    debug!(
        cookie_domain = %domain.registered_domain(),
        session_store = flags.session_store_active(),
        "rendered second-factor daemon configuration"
    );
    Ok(Some(artifacts))
}

/// File backend users database holding the admin.
pub fn users_database(
    credentials: &Credentials,
    profile: &AdminProfile,
) -> Result<String, InitError> {
    let mut users = BTreeMap::new();
    users.insert(
        credentials.username(),
        UserEntry {
            disabled: false,
            displayname: &profile.display_name,
            password: credentials.hash_str(),
            email: &profile.email,
            groups: DEFAULT_GROUPS.to_vec(),
        },
    );
    serde_yaml::to_string(&UsersDatabase { users }).map_err(|err| {
        InitError::Serialize {
            artifact: "users database",
            source: err.into(),
        }
    })
}

/// Daemon `configuration.yml` for `domain`.
pub fn configuration(
    domain: &DomainSpec,
    flags: &DeploymentFlags,
    work_factor: u32,
) -> Result<String, InitError> {
    let config = Configuration {
        theme: "auto",
        server: Server {
            address: format!("tcp://0.0.0.0:{AUTH_DAEMON_PORT}/"),
        },
        log: Log { level: "info" },
        totp: Totp {
            issuer: domain.registered_domain().to_string(),
        },
        authentication_backend: AuthenticationBackend {
            file: FileBackend {
                path: format!("{CONFIG_DIR}/users_database.yml"),
                password: PasswordAlgorithm {
                    algorithm: "bcrypt",
                    bcrypt: BcryptSettings {
                        variant: "standard",
                        cost: work_factor,
                    },
                },
            },
        },
        access_control: AccessControl {
            default_policy: "deny",
            rules: vec![AccessRule {
                domain: domain.host().to_string(),
                policy: "two_factor",
            }],
        },
        session: Session {
            cookies: vec![SessionCookie {
                domain: domain.registered_domain().to_string(),
                authelia_url: domain.auth_portal_url(),
                default_redirection_url: domain.base_url(),
            }],
            redis: flags.session_store_active().then_some(RedisSession {
                host: SESSION_STORE_SERVICE,
                port: SESSION_STORE_PORT,
            }),
        },
        regulation: Regulation {
            max_retries: 3,
            find_time: "2m",
            ban_time: "5m",
        },
        storage: Storage {
            postgres: PostgresStorage {
                address: format!("tcp://{DB_SERVICE}:{DB_PORT}"),
                database: "postgres",
                schema: AUTH_DAEMON_SCHEMA,
                username: "postgres",
            },
        },
        notifier: Notifier {
            filesystem: FilesystemNotifier {
                filename: format!("{CONFIG_DIR}/notification.txt"),
            },
        },
    };
    serde_yaml::to_string(&config).map_err(|err| InitError::Serialize {
        artifact: "auth daemon configuration",
        source: err.into(),
    })
}

/// Database start-up script creating the daemon's schema.
pub fn schema_sql() -> String {
    format!(
        "-- Generated by supafast-init.\nCREATE SCHEMA IF NOT EXISTS {AUTH_DAEMON_SCHEMA} AUTHORIZATION postgres;\n"
    )
}
