//! Black-box tests that spawn the real `supafast-init` binary.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn supafast_init() -> Command {
    let mut cmd = Command::cargo_bin("supafast-init").expect("binary built");
    for key in [
        "SUPAFAST_INIT_BASE_URL",
        "SUPAFAST_INIT_USERNAME",
        "SUPAFAST_INIT_PASSWORD",
        "SUPAFAST_INIT_EMAIL",
        "SUPAFAST_INIT_DISPLAY_NAME",
        "SUPAFAST_INIT_EMAIL_AUTOCONFIRM",
        "SUPAFAST_INIT_SESSION_STORE",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn help_lists_subcommands() {
    supafast_init()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("init")
                .and(predicate::str::contains("show-keys"))
                .and(predicate::str::contains("verify-token")),
        );
}

#[test]
fn init_help_lists_flags() {
    supafast_init()
        .args(["init", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--second-factor")
                .and(predicate::str::contains("--session-store"))
                .and(predicate::str::contains("--print-only"))
                .and(predicate::str::contains("nginx")),
        );
}

#[test]
fn session_store_requires_second_factor() {
    supafast_init()
        .args(["init", "--session-store", "--non-interactive"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--second-factor"));
}

#[test]
fn non_interactive_run_then_verify_tokens() {
    let dir = tempdir().expect("tempdir");
    let out = dir.path().to_str().unwrap();

    supafast_init()
        .args([
            "init",
            "--out-dir",
            out,
            "--proxy",
            "nginx",
            "--non-interactive",
            "--skip-dependency-check",
        ])
        .env("SUPAFAST_INIT_PASSWORD", "cli-test-password")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 3 files"));

    let env_file = dir.path().join(".env");
    let raw = fs::read_to_string(&env_file).unwrap();
    assert!(raw.contains("PROXY_KIND=nginx"));
    assert!(!raw.contains("cli-test-password"));
    assert!(dir.path().join("volumes/proxy/nginx.conf").exists());

    supafast_init()
        .args(["verify-token", "--env-file", env_file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ANON_KEY: ok (role=anon")
                .and(predicate::str::contains("SERVICE_ROLE_KEY: ok (role=service_role")),
        );

    supafast_init()
        .args(["show-keys", "--env-file", env_file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ANON_KEY=ey"));

    supafast_init()
        .args([
            "verify-token",
            "--env-file",
            env_file.to_str().unwrap(),
            "--token",
            "not.a-real.token",
        ])
        .assert()
        .failure();
}

#[test]
fn print_only_writes_nothing() {
    let dir = tempdir().expect("tempdir");

    supafast_init()
        .args([
            "init",
            "--out-dir",
            dir.path().to_str().unwrap(),
            "--non-interactive",
            "--skip-dependency-check",
            "--print-only",
        ])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("JWT_SECRET=")
                .and(predicate::str::contains("SITE_URL=https://apps.example.com")),
        );

    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn second_factor_over_http_fails() {
    let dir = tempdir().expect("tempdir");

    supafast_init()
        .args([
            "init",
            "--out-dir",
            dir.path().to_str().unwrap(),
            "--second-factor",
            "--non-interactive",
            "--skip-dependency-check",
        ])
        .env("SUPAFAST_INIT_BASE_URL", "http://apps.example.com")
        .assert()
        .failure()
        .stderr(predicate::str::contains("https"));

    assert!(!dir.path().join(".env").exists());
}
