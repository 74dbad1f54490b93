//! End-to-end runs of the init pipeline against temporary output directories.

use std::{
    collections::HashMap,
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use once_cell::sync::Lazy;
use supafast_config::{
    DeploymentFlags, InitError, InitOptions, PolicyError, ProxyKind,
    cli::{self, answers},
    credentials::WorkFactorPolicy,
    env_writer::read_env_map,
    token,
};
use tempfile::tempdir;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn env_guard() -> MutexGuard<'static, ()> {
    let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    for key in [
        answers::ENV_BASE_URL,
        answers::ENV_USERNAME,
        answers::ENV_PASSWORD,
        answers::ENV_EMAIL,
        answers::ENV_DISPLAY_NAME,
        answers::ENV_EMAIL_AUTOCONFIRM,
        answers::ENV_SESSION_STORE,
    ] {
        unsafe { std::env::remove_var(key) };
    }
    guard
}

fn options(out_dir: &Path, kind: ProxyKind) -> InitOptions {
    let mut opts = InitOptions::new_non_interactive(out_dir.to_path_buf(), kind);
    opts.skip_dependency_check = true;
    opts.work_factor = WorkFactorPolicy { low: 4, high: 4 };
    opts
}

fn run(opts: &InitOptions) -> Vec<PathBuf> {
    cli::run_init(opts, |_| Ok(true))
        .expect("init run")
        .expect("confirmed run writes")
        .files
}

fn env_of(dir: &Path) -> HashMap<String, String> {
    read_env_map(&dir.join(".env")).expect("read .env")
}

#[test]
fn basic_caddy_run_writes_every_artifact() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");

    let files = run(&options(dir.path(), ProxyKind::Caddy));
    let relative: Vec<_> = files
        .iter()
        .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
        .collect();
    assert_eq!(
        relative,
        vec![
            PathBuf::from(".env"),
            PathBuf::from("docker-compose.yml"),
            PathBuf::from("volumes/proxy/Caddyfile"),
        ]
    );
    assert!(!dir.path().join("volumes/authelia").exists());
    assert!(!dir.path().join(".env.bak").exists());

    let env = env_of(dir.path());
    assert_eq!(env["SITE_URL"], answers::DEFAULT_BASE_URL);
    assert_eq!(env["PROXY_KIND"], "caddy");
    assert_eq!(env["PROXY_DOMAIN"], "apps.example.com");
    assert_eq!(env["SECOND_FACTOR_ENABLED"], "false");
    assert_eq!(env["DASHBOARD_USERNAME"], answers::DEFAULT_USERNAME);
    assert!(env["DASHBOARD_PASSWORD_HASH"].starts_with("$2b$04$"));
    assert!(
        bcrypt::verify(answers::DEFAULT_PASSWORD, &env["DASHBOARD_PASSWORD_HASH"])
            .unwrap()
    );

    let now = chrono::Utc::now().timestamp();
    let anon = token::verify(&env["ANON_KEY"], &env["JWT_SECRET"], now).unwrap();
    let service =
        token::verify(&env["SERVICE_ROLE_KEY"], &env["JWT_SECRET"], now).unwrap();
    assert_eq!(anon.role, token::ANON_ROLE);
    assert_eq!(service.role, token::SERVICE_ROLE);

    let mode = fs::metadata(dir.path().join(".env"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);

    let caddyfile =
        fs::read_to_string(dir.path().join("volumes/proxy/Caddyfile")).unwrap();
    assert!(caddyfile.contains("basic_auth"));
    assert!(caddyfile.contains("apps.example.com"));
}

#[test]
fn no_artifact_contains_the_plaintext_password() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path(), ProxyKind::Nginx).with_second_factor(true);

    for path in run(&opts) {
        let contents = fs::read_to_string(&path).unwrap();
        assert!(
            !contents.contains(answers::DEFAULT_PASSWORD),
            "{} leaks the password",
            path.display()
        );
    }
}

#[test]
fn second_factor_nginx_run_writes_daemon_files() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path(), ProxyKind::Nginx).with_second_factor(true);

    let files = run(&opts);
    for relative in [
        "volumes/proxy/nginx.conf",
        "volumes/authelia/configuration.yml",
        "volumes/authelia/users_database.yml",
        "volumes/db/authelia.sql",
    ] {
        assert!(files.contains(&dir.path().join(relative)), "missing {relative}");
    }

    let env = env_of(dir.path());
    assert_eq!(env["SECOND_FACTOR_ENABLED"], "true");
    assert_eq!(env["SESSION_STORE_ENABLED"], "true");
    assert_eq!(env["AUTHELIA_COOKIE_DOMAIN"], "example.com");
    assert_eq!(env["AUTHELIA_URL"], "https://auth.example.com");
    assert!(!env.contains_key("DASHBOARD_PASSWORD_HASH"));
    assert_eq!(env["REDIS_PASSWORD"].len(), 32);

    let config: serde_yaml::Value = serde_yaml::from_str(
        &fs::read_to_string(dir.path().join("volumes/authelia/configuration.yml"))
            .unwrap(),
    )
    .unwrap();
    let cookie = &config["session"]["cookies"][0];
    assert_eq!(cookie["domain"].as_str(), Some("example.com"));
    assert_eq!(
        cookie["default_redirection_url"].as_str(),
        Some("https://apps.example.com")
    );
    assert_eq!(config["session"]["redis"]["host"].as_str(), Some("redis"));
    assert_eq!(config["access_control"]["default_policy"].as_str(), Some("deny"));

    let compose: serde_yaml::Value = serde_yaml::from_str(
        &fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap(),
    )
    .unwrap();
    assert!(compose["services"]["authelia"].is_mapping());
    assert!(compose["services"]["redis"].is_mapping());
    assert_eq!(
        compose["services"]["proxy"]["image"].as_str(),
        Some(ProxyKind::Nginx.image())
    );

    let users =
        fs::read_to_string(dir.path().join("volumes/authelia/users_database.yml"))
            .unwrap();
    assert!(users.contains("admin@example.com"));
    assert!(!users.contains("AUTHELIA_SESSION_SECRET"));
}

#[test]
fn rerun_preserves_unmanaged_keys_and_rotates_secrets() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");
    let env_path = dir.path().join(".env");
    fs::write(
        &env_path,
        "CUSTOM_FLAG=keep-me\nPOSTGRES_PASSWORD=old-password\n# a comment\n",
    )
    .unwrap();

    let opts = options(dir.path(), ProxyKind::Caddy);
    run(&opts);
    let first = env_of(dir.path());
    assert_eq!(first["CUSTOM_FLAG"], "keep-me");
    assert_ne!(first["POSTGRES_PASSWORD"], "old-password");

    run(&opts);
    let second = env_of(dir.path());
    assert_eq!(second["CUSTOM_FLAG"], "keep-me");
    assert_ne!(second["JWT_SECRET"], first["JWT_SECRET"]);

    let raw = fs::read_to_string(&env_path).unwrap();
    assert_eq!(raw.matches("CUSTOM_FLAG=").count(), 1);
    assert!(!dir.path().join(".env.bak").exists());
}

#[test]
fn stale_backup_is_restored_before_the_run() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join(".env.bak"), "LEFT_BEHIND=yes\n").unwrap();

    run(&options(dir.path(), ProxyKind::Caddy));

    let env = env_of(dir.path());
    assert_eq!(env["LEFT_BEHIND"], "yes");
    assert!(!dir.path().join(".env.bak").exists());
}

#[test]
fn environment_overrides_beat_the_answers_file() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");
    let answers_path = dir.path().join("answers.toml");
    fs::write(
        &answers_path,
        r#"
base_url = "https://file.acme.io"
username = "fileadmin"
email_autoconfirm = true
"#,
    )
    .unwrap();
    unsafe {
        std::env::set_var(answers::ENV_BASE_URL, "https://db.acme.io");
        std::env::set_var(answers::ENV_PASSWORD, "a much better secret");
    }

    let mut opts = options(dir.path(), ProxyKind::Caddy);
    opts.answers_path = Some(answers_path);
    let result = cli::run_init(&opts, |_| Ok(true));

    unsafe {
        std::env::remove_var(answers::ENV_BASE_URL);
        std::env::remove_var(answers::ENV_PASSWORD);
    }
    result.expect("init run").expect("written");

    let env = env_of(dir.path());
    assert_eq!(env["SITE_URL"], "https://db.acme.io");
    assert_eq!(env["SUPABASE_GATEWAY_URL"], "https://db.acme.io/gateway");
    assert_eq!(env["DASHBOARD_USERNAME"], "fileadmin");
    assert_eq!(env["ENABLE_EMAIL_AUTOCONFIRM"], "true");
    assert!(
        bcrypt::verify("a much better secret", &env["DASHBOARD_PASSWORD_HASH"])
            .unwrap()
    );
}

#[test]
fn declined_run_writes_nothing() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");

    let outcome = cli::run_init(&options(dir.path(), ProxyKind::Caddy), |prepared| {
        assert!(!prepared.diff.is_empty());
        let secret = prepared.artifacts.env.get("JWT_SECRET").unwrap();
        assert!(!prepared.diff.render().contains(secret));
        Ok(false)
    })
    .expect("init run");

    assert!(outcome.is_none());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn second_factor_over_http_is_rejected_before_writing() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");
    unsafe { std::env::set_var(answers::ENV_BASE_URL, "http://apps.example.com") };

    let opts = options(dir.path(), ProxyKind::Caddy).with_second_factor(false);
    let result = cli::run_init(&opts, |_| Ok(true));
    unsafe { std::env::remove_var(answers::ENV_BASE_URL) };

    assert!(matches!(
        result,
        Err(InitError::Policy(PolicyError::SecondFactorNeedsHttps { .. }))
    ));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn invalid_answers_file_is_a_filesystem_error() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");
    let answers_path = dir.path().join("answers.toml");
    fs::write(&answers_path, "unknown_key = 1\n").unwrap();

    let mut opts = options(dir.path(), ProxyKind::Caddy);
    opts.answers_path = Some(answers_path);
    let err = cli::run_init(&opts, |_| Ok(true)).unwrap_err();
    assert!(matches!(err, InitError::FileSystem { .. }));
    assert!(!err.is_recoverable());
    assert!(!dir.path().join(".env").exists());
}

#[test]
fn run_mode_is_not_a_deployment_flag() {
    let _guard = env_guard();
    let dir = tempdir().expect("tempdir");
    let opts = options(dir.path(), ProxyKind::Nginx).with_second_factor(true);

    let report = cli::run_init(&opts, |_| Ok(true))
        .expect("init run")
        .expect("written");
    assert_eq!(report.flags, DeploymentFlags::new(ProxyKind::Nginx, true, true));
}
