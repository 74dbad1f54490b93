//! The generator pipeline shared by `supafast-init` and the integration tests.
//!
//! Stages run strictly in order: dependency check, input collection, secret
//! and token generation, credential hashing, settings composition, topology
//! and proxy rendering, then writing. Nothing is written before every
//! artifact has been rendered in memory.

pub mod answers;
pub mod options;
pub mod prompt;
pub mod validation;

use std::{
    collections::HashMap,
    fmt::Write as _,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use dialoguer::console::Term;
use tracing::{debug, info, warn};
use url::Url;

pub use options::*;

use crate::{
    authelia::{self, AdminProfile, AutheliaArtifacts},
    compose::{self, ComposeContext, Patch, patches},
    constants::{
        AUTH_DAEMON_SERVICE, AUTHELIA_CONFIG_PATH, AUTHELIA_SCHEMA_SQL_PATH,
        AUTHELIA_USERS_PATH, COMPOSE_FILE_NAME, DB_PORT, DB_SERVICE,
        ENV_FILE_NAME, GATEWAY_PASSTHROUGH_PREFIX, GATEWAY_PORT, MANAGED_KEYS,
        SESSION_STORE_PORT, SESSION_STORE_SERVICE, is_secret_key,
    },
    credentials::Credentials,
    domain::DomainSpec,
    env_writer::{
        CommitState, EnvOverrides, EnvTransaction, FileMode, commit_env_file,
        read_env_map, write_atomically,
    },
    error::{InitError, ValidationError},
    models::{DeploymentFlags, ServiceTopology},
    proxy::{self, RoutePlan},
    secrets::{SecretName, SecretSet},
    token::TokenPair,
};

use answers::{DEFAULT_DISPLAY_NAME, DEFAULT_EMAIL, InitAnswers};
use prompt::{CollectedInput, collect_interactive, collect_non_interactive};

/// Tools accepted as the container runtime, in preference order.
pub const CONTAINER_RUNTIMES: &[&str] = &["docker", "podman"];

/// Every artifact of one run, rendered but not yet written.
#[derive(Debug)]
pub struct GeneratedArtifacts {
    /// Normalized switches for the run.
    pub flags: DeploymentFlags,
    /// Settings file contents.
    pub env: EnvOverrides,
    /// Patched topology.
    pub topology: ServiceTopology,
    /// `topology` as YAML.
    pub compose_yaml: String,
    /// Caddyfile or nginx.conf.
    pub proxy_config: String,
    /// Daemon files, with second-factor auth only.
    pub authelia: Option<AutheliaArtifacts>,
    /// Patches applied, in order.
    pub patches: Vec<Patch>,
}

impl GeneratedArtifacts {
    /// The settings file as it will be written.
    pub fn env_contents(&self) -> String {
        self.env.render()
    }
}

/// Values the settings-file steps read.
#[derive(Debug)]
pub struct EnvContext<'a> {
    /// Parsed base URL.
    pub domain: &'a DomainSpec,
    /// Switches for the run.
    pub flags: &'a DeploymentFlags,
    /// Fresh secrets.
    pub secrets: &'a SecretSet,
    /// API keys signed with the JWT secret.
    pub tokens: &'a TokenPair,
    /// Hashed admin credential.
    pub credentials: &'a Credentials,
    /// New accounts skip email confirmation.
    pub email_autoconfirm: bool,
}

/// Managed-key changes between the current settings file and a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedDiff {
    /// Keys absent before, with their new value.
    pub additions: Vec<(String, String)>,
    /// Changed keys as `(key, old, new)`.
    pub updates: Vec<(String, String, String)>,
    /// Keys the candidate drops.
    pub removals: Vec<String>,
}

impl ManagedDiff {
    /// Compare managed keys of `before` and `after`.
    pub fn compute(
        before: &HashMap<String, String>,
        after: &[(String, String)],
    ) -> Self {
        let after: HashMap<&str, &str> =
            after.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let mut diff = Self::default();
        for key in MANAGED_KEYS {
            let key = *key;
            match (before.get(key), after.get(key)) {
                (None, Some(new)) => {
                    diff.additions.push((key.to_string(), new.to_string()))
                }
                (Some(old), Some(new)) if old != new => diff.updates.push((
                    key.to_string(),
                    old.clone(),
                    new.to_string(),
                )),
                (Some(_), None) => diff.removals.push(key.to_string()),
                _ => {}
            }
        }
        diff
    }

    /// Whether no managed key changes.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
            && self.updates.is_empty()
            && self.removals.is_empty()
    }

    /// Human-readable listing; secret values are redacted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.additions.is_empty() {
            out.push_str("  Added managed keys:\n");
            for (k, v) in &self.additions {
                let _ = writeln!(out, "    + {k}={}", shown(k, v));
            }
        }
        if !self.updates.is_empty() {
            out.push_str("  Updated managed keys:\n");
            for (k, old, new) in &self.updates {
                let _ = writeln!(
                    out,
                    "    ~ {k}: {} -> {}",
                    shown(k, old),
                    shown(k, new)
                );
            }
        }
        if !self.removals.is_empty() {
            out.push_str("  Removed managed keys:\n");
            for k in &self.removals {
                let _ = writeln!(out, "    - {k}");
            }
        }
        out
    }
}

fn shown<'a>(key: &str, value: &'a str) -> &'a str {
    if is_secret_key(key) { "<redacted>" } else { value }
}

/// A run that has rendered everything and is waiting to be written.
#[derive(Debug)]
pub struct PreparedRun {
    /// Everything to be written.
    pub artifacts: GeneratedArtifacts,
    /// Changes to the settings file.
    pub diff: ManagedDiff,
    /// Settings file path.
    pub env_path: PathBuf,
}

/// What a run wrote.
#[derive(Debug, Clone)]
pub struct InitReport {
    /// Settings file path.
    pub env_path: PathBuf,
    /// States the settings-file commit went through.
    pub env_history: Vec<CommitState>,
    /// Every file written, settings file first.
    pub files: Vec<PathBuf>,
    /// Switches the run used.
    pub flags: DeploymentFlags,
    /// Patches applied, in order.
    pub patches: Vec<Patch>,
}

/// Path of the first available container runtime.
pub fn check_container_runtime() -> Result<PathBuf, InitError> {
    for tool in CONTAINER_RUNTIMES {
        if let Ok(path) = which::which(tool) {
            debug!(tool, path = %path.display(), "found container runtime");
            return Ok(path);
        }
    }
    Err(InitError::Dependency {
        tool: CONTAINER_RUNTIMES.join(" or "),
    })
}

/// Collect input, generate every artifact and diff the settings file.
/// Nothing is written.
pub fn prepare(opts: &InitOptions) -> Result<PreparedRun, InitError> {
    if opts.skip_dependency_check {
        debug!("skipping container runtime check");
    } else {
        check_container_runtime()?;
    }

    let env_path = opts.out_dir.join(ENV_FILE_NAME);
    let existing = existing_settings(&env_path)?;
    let before = if env_path.exists() {
        read_env_map(&env_path)?
    } else {
        read_env_map(&EnvTransaction::backup_path_for(&env_path))?
    };

    let answers = InitAnswers::resolve(opts.answers_path.as_deref())?;
    let input = if opts.non_interactive {
        collect_non_interactive(answers, opts.second_factor)?
    } else {
        collect_interactive(answers, opts.second_factor, &Term::stderr())?
    };
    if input.default_password {
        warn!("using the built-in default admin password; change it before exposing the stack");
    }

    let now = chrono::Utc::now().timestamp();
    let artifacts = generate_artifacts(input, opts, now, existing.as_deref())?;
    let diff = ManagedDiff::compute(&before, &artifacts.env.pairs());
    Ok(PreparedRun {
        artifacts,
        diff,
        env_path,
    })
}

/// Prepare, ask `confirm`, write. Returns `None` when the run was declined.
pub fn run_init<F>(
    opts: &InitOptions,
    confirm: F,
) -> Result<Option<InitReport>, InitError>
where
    F: FnOnce(&PreparedRun) -> Result<bool, InitError>,
{
    let prepared = prepare(opts)?;
    if !confirm(&prepared)? {
        info!(path = %prepared.env_path.display(), "declined; nothing written");
        return Ok(None);
    }
    write_artifacts(&opts.out_dir, &prepared.artifacts).map(Some)
}

/// Previous settings file contents, falling back to a stale backup.
fn existing_settings(env_path: &Path) -> Result<Option<String>, InitError> {
    for path in [
        env_path.to_path_buf(),
        EnvTransaction::backup_path_for(env_path),
    ] {
        match fs::read_to_string(&path) {
            Ok(raw) => return Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(InitError::fs("read", path, err)),
        }
    }
    Ok(None)
}

/// Turn validated input into every artifact. `now` is the token issue time
/// in Unix seconds.
pub fn generate_artifacts(
    input: CollectedInput,
    opts: &InitOptions,
    now: i64,
    existing_env: Option<&str>,
) -> Result<GeneratedArtifacts, InitError> {
    let flags = DeploymentFlags::new(
        opts.proxy_kind,
        opts.second_factor,
        opts.session_store || input.session_store,
    );
    info!(
        proxy = %flags.proxy_kind,
        second_factor = flags.second_factor,
        session_store = flags.session_store_active(),
        host = %input.domain.host(),
        "generating deployment artifacts"
    );

    let secrets = SecretSet::generate(&flags);
    debug!(secrets = ?secrets, "generated secrets");
    let tokens = TokenPair::mint(secrets.jwt_signing_key(), now).map_err(
        |err| InitError::Serialize {
            artifact: "API tokens",
            source: err.into(),
        },
    )?;

    let work_factor = opts.work_factor.select(&flags);
    let credentials = Credentials::hash(
        input.username,
        input.password,
        &flags,
        &opts.work_factor,
    )?;

    let mut env = EnvOverrides::new();
    compose_env(
        &mut env,
        &EnvContext {
            domain: &input.domain,
            flags: &flags,
            secrets: &secrets,
            tokens: &tokens,
            credentials: &credentials,
            email_autoconfirm: input.email_autoconfirm,
        },
    )?;
    if let Some(existing) = existing_env {
        env.preserve_unmanaged(existing);
    }

    let ctx = ComposeContext {
        flags: &flags,
        credentials: &credentials,
    };
    let topology = compose::compose_topology(&ctx);
    let compose_yaml =
        topology.to_yaml().map_err(|err| InitError::Serialize {
            artifact: "service topology",
            source: err.into(),
        })?;

    let plan = RoutePlan::new(&input.domain, &flags);
    let proxy_config = proxy::render(&plan, flags.proxy_kind);

    let profile = input.profile.unwrap_or_else(|| AdminProfile {
        email: DEFAULT_EMAIL.to_string(),
        display_name: DEFAULT_DISPLAY_NAME.to_string(),
    });
    let authelia = authelia::render(
        &input.domain,
        &flags,
        &credentials,
        &profile,
        work_factor,
    )?;

    Ok(GeneratedArtifacts {
        flags,
        env,
        topology,
        compose_yaml,
        proxy_config,
        authelia,
        patches: patches::plan(&flags),
    })
}

/// Run every settings-file step in order.
pub fn compose_env(
    env: &mut EnvOverrides,
    ctx: &EnvContext<'_>,
) -> Result<(), InitError> {
    push_secrets(env, ctx);
    push_database(env);
    push_urls(env, ctx.domain)?;
    push_auth_policy(env, ctx.email_autoconfirm);
    push_studio(env);
    push_proxy(env, ctx);
    if ctx.flags.second_factor {
        push_second_factor(env, ctx);
    }
    debug!(keys = env.pairs().len(), "composed settings file");
    Ok(())
}

fn push_secrets(env: &mut EnvOverrides, ctx: &EnvContext<'_>) {
    env.section("Secrets");
    for name in SecretName::ALWAYS {
        if let Some(value) = ctx.secrets.get(name) {
            env.push(name.env_key(), value);
        }
    }
    env.push("ANON_KEY", ctx.tokens.anon.as_str());
    env.push("SERVICE_ROLE_KEY", ctx.tokens.service_role.as_str());
}

fn push_database(env: &mut EnvOverrides) {
    env.section("Database");
    env.push("POSTGRES_HOST", DB_SERVICE);
    env.push("POSTGRES_DB", "postgres");
    env.push("POSTGRES_PORT", DB_PORT.to_string());

    env.section("API gateway");
    env.push("KONG_HTTP_PORT", GATEWAY_PORT.to_string());
    env.push("KONG_HTTPS_PORT", "8443");
    env.push("PGRST_DB_SCHEMAS", "public,storage,graphql_public");
}

fn push_urls(env: &mut EnvOverrides, domain: &DomainSpec) -> Result<(), InitError> {
    let base = domain.base_url();
    let gateway = Url::parse(&base)
        .and_then(|url| url.join(GATEWAY_PASSTHROUGH_PREFIX))
        .map_err(|_| ValidationError::Format {
            input: base.clone(),
            reason: "cannot derive the gateway URL",
        })?;

    env.section("URLs");
    env.push("SITE_URL", base.as_str());
    env.push("API_EXTERNAL_URL", base.as_str());
    env.push("SUPABASE_PUBLIC_URL", base.as_str());
    env.push("SUPABASE_GATEWAY_URL", gateway.as_str());
    env.push("ADDITIONAL_REDIRECT_URLS", "");
    Ok(())
}

fn push_auth_policy(env: &mut EnvOverrides, email_autoconfirm: bool) {
    env.section("Auth");
    env.push("JWT_EXPIRY", "3600");
    env.push("DISABLE_SIGNUP", "false");
    env.push("ENABLE_EMAIL_SIGNUP", "true");
    env.push("ENABLE_EMAIL_AUTOCONFIRM", email_autoconfirm.to_string());
    env.push("ENABLE_ANONYMOUS_USERS", "false");
    env.push("ENABLE_PHONE_SIGNUP", "true");
    env.push("ENABLE_PHONE_AUTOCONFIRM", "true");
    for key in [
        "MAILER_URLPATHS_CONFIRMATION",
        "MAILER_URLPATHS_INVITE",
        "MAILER_URLPATHS_RECOVERY",
        "MAILER_URLPATHS_EMAIL_CHANGE",
    ] {
        env.push(key, "/auth/v1/verify");
    }
}

fn push_studio(env: &mut EnvOverrides) {
    env.section("Studio");
    env.push("STUDIO_DEFAULT_ORGANIZATION", "Default Organization");
    env.push("STUDIO_DEFAULT_PROJECT", "Default Project");
    env.push("FUNCTIONS_VERIFY_JWT", "false");
}

fn push_proxy(env: &mut EnvOverrides, ctx: &EnvContext<'_>) {
    env.section("Reverse proxy");
    env.push("PROXY_KIND", ctx.flags.proxy_kind.as_str());
    env.push("PROXY_DOMAIN", ctx.domain.host());
    env.push("SECOND_FACTOR_ENABLED", ctx.flags.second_factor.to_string());
    if ctx.flags.uses_basic_auth() {
        env.push("DASHBOARD_USERNAME", ctx.credentials.username());
        env.push("DASHBOARD_PASSWORD_HASH", ctx.credentials.hash_str());
    }
}

fn push_second_factor(env: &mut EnvOverrides, ctx: &EnvContext<'_>) {
    env.section("Second factor");
    for name in SecretName::SECOND_FACTOR {
        if let Some(value) = ctx.secrets.get(name) {
            env.push(name.env_key(), value);
        }
    }
    env.push("AUTHELIA_COOKIE_DOMAIN", ctx.domain.registered_domain());
    env.push("AUTHELIA_URL", ctx.domain.auth_portal_url());
    env.push(
        "SESSION_STORE_ENABLED",
        ctx.flags.session_store_active().to_string(),
    );
    if ctx.flags.session_store_active()
        && let Some(password) = ctx.secrets.get(SecretName::RedisPassword)
    {
        env.push("REDIS_PASSWORD", password);
        env.push("REDIS_HOST", SESSION_STORE_SERVICE);
        env.push("REDIS_PORT", SESSION_STORE_PORT.to_string());
    }
}

/// Write every artifact under `out_dir`. The settings file goes first
/// through the backup/commit/restore transaction; the rest are replaced
/// atomically without a backup.
pub fn write_artifacts(
    out_dir: &Path,
    artifacts: &GeneratedArtifacts,
) -> Result<InitReport, InitError> {
    let env_path = out_dir.join(ENV_FILE_NAME);
    let env_history =
        commit_env_file(&env_path, || Ok(artifacts.env_contents()))?;

    let mut files = vec![env_path.clone()];
    let mut write = |relative: &str, contents: &str, mode: FileMode| {
        let path = out_dir.join(relative);
        write_atomically(&path, contents, mode)?;
        info!(path = %path.display(), "wrote artifact");
        files.push(path);
        Ok::<_, InitError>(())
    };

    write(COMPOSE_FILE_NAME, &artifacts.compose_yaml, FileMode::Private)?;
    write(
        artifacts.flags.proxy_kind.config_path(),
        &artifacts.proxy_config,
        FileMode::Shared,
    )?;
    if let Some(daemon) = &artifacts.authelia {
        debug!(service = AUTH_DAEMON_SERVICE, "writing daemon files");
        write(AUTHELIA_CONFIG_PATH, &daemon.configuration, FileMode::Shared)?;
        write(AUTHELIA_USERS_PATH, &daemon.users_database, FileMode::Private)?;
        write(AUTHELIA_SCHEMA_SQL_PATH, &daemon.schema_sql, FileMode::Shared)?;
    }

    Ok(InitReport {
        env_path,
        env_history,
        files,
        flags: artifacts.flags,
        patches: artifacts.patches.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::{PlaintextPassword, WorkFactorPolicy},
        models::ProxyKind,
        token,
    };

    const NOW: i64 = 1_700_000_000;

    fn input(raw: &str, second_factor: bool) -> CollectedInput {
        CollectedInput {
            domain: DomainSpec::parse(raw, second_factor).unwrap(),
            username: "admin".into(),
            password: PlaintextPassword::new("plain-text-password"),
            email_autoconfirm: true,
            profile: second_factor.then(|| AdminProfile {
                email: "ops@example.com".into(),
                display_name: "Ops".into(),
            }),
            session_store: false,
            default_password: false,
        }
    }

    fn opts(kind: ProxyKind) -> InitOptions {
        InitOptions {
            work_factor: WorkFactorPolicy { low: 4, high: 5 },
            ..InitOptions::new_non_interactive(PathBuf::from("."), kind)
        }
    }

    #[test]
    fn settings_carry_tokens_that_verify() {
        let artifacts = generate_artifacts(
            input("https://apps.example.com", false),
            &opts(ProxyKind::Caddy),
            NOW,
            None,
        )
        .unwrap();
        let key = artifacts.env.get("JWT_SECRET").unwrap();
        assert_eq!(key.len(), 64);
        for (name, role) in
            [("ANON_KEY", "anon"), ("SERVICE_ROLE_KEY", "service_role")]
        {
            let claims =
                token::verify(artifacts.env.get(name).unwrap(), key, NOW)
                    .unwrap();
            assert_eq!(claims.role, role);
            assert_eq!(claims.iat, NOW);
        }
        assert_eq!(
            artifacts.env.get("SUPABASE_GATEWAY_URL"),
            Some("https://apps.example.com/gateway")
        );
        assert_eq!(artifacts.env.get("ENABLE_EMAIL_AUTOCONFIRM"), Some("true"));
    }

    #[test]
    fn basic_auth_variant_selection() {
        let artifacts = generate_artifacts(
            input("http://apps.example.com", false),
            &opts(ProxyKind::Caddy),
            NOW,
            None,
        )
        .unwrap();
        assert!(artifacts.authelia.is_none());
        assert!(
            artifacts
                .env
                .get("DASHBOARD_PASSWORD_HASH")
                .unwrap()
                .starts_with("$2b$04$")
        );
        assert!(artifacts.env.get("AUTHELIA_SESSION_SECRET").is_none());
        assert_eq!(
            artifacts.patches,
            vec![Patch::Proxy, Patch::CredentialInjection]
        );
        assert!(!artifacts.env_contents().contains("plain-text-password"));
        assert!(!artifacts.compose_yaml.contains("plain-text-password"));
    }

    #[test]
    fn second_factor_variant_selection() {
        let options = opts(ProxyKind::Nginx).with_second_factor(true);
        let artifacts = generate_artifacts(
            input("https://apps.example.com", true),
            &options,
            NOW,
            None,
        )
        .unwrap();

        let daemon = artifacts.authelia.as_ref().unwrap();
        assert!(daemon.users_database.contains("$2b$05$"));
        assert!(artifacts.env.get("DASHBOARD_PASSWORD_HASH").is_none());
        assert_eq!(artifacts.env.get("AUTHELIA_COOKIE_DOMAIN"), Some("example.com"));
        assert_eq!(artifacts.env.get("REDIS_HOST"), Some("redis"));
        assert_eq!(artifacts.env.get("REDIS_PASSWORD").map(str::len), Some(32));
        assert!(artifacts.topology.depends_on("authelia", "redis"));
        assert!(artifacts.proxy_config.contains("auth_request"));
    }

    #[test]
    fn diff_redacts_secret_values() {
        let mut before = HashMap::new();
        before.insert("JWT_SECRET".to_string(), "old-secret".to_string());
        before.insert("SITE_URL".to_string(), "https://old.example.com".to_string());
        before.insert("REDIS_HOST".to_string(), "redis".to_string());
        let after = vec![
            ("JWT_SECRET".to_string(), "new-secret".to_string()),
            ("SITE_URL".to_string(), "https://new.example.com".to_string()),
            ("PROXY_KIND".to_string(), "caddy".to_string()),
        ];

        let diff = ManagedDiff::compute(&before, &after);
        assert_eq!(diff.removals, vec!["REDIS_HOST".to_string()]);
        let rendered = diff.render();
        assert!(rendered.contains("JWT_SECRET: <redacted> -> <redacted>"));
        assert!(!rendered.contains("new-secret"));
        assert!(rendered.contains("https://old.example.com -> https://new.example.com"));
        assert!(rendered.contains("+ PROXY_KIND=caddy"));
    }
}
