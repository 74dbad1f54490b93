//! `supafast-init`: generate, inspect and verify a supafast deployment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, console::Term};
use supafast_config::{
    InitOptions, ProxyKind,
    cli::{self, PreparedRun},
    token::{self, ANON_ROLE, SERVICE_ROLE},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const AUTO_CONFIRM_VAR: &str = "SUPAFAST_INIT_AUTO_CONFIRM";

#[derive(Parser)]
#[command(
    name = "supafast-init",
    about = "Generate settings, topology and proxy config for a supafast stack"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate every artifact and write it under --out-dir
    Init {
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        #[arg(long, value_enum, default_value = "caddy")]
        proxy: ProxyArg,
        /// Put the dashboard behind Authelia (requires an https base URL)
        #[arg(long)]
        second_factor: bool,
        /// Keep Authelia sessions in Redis (needs --second-factor)
        #[arg(long, requires = "second_factor")]
        session_store: bool,
        #[arg(long)]
        non_interactive: bool,
        /// TOML file with answers used in place of the defaults
        #[arg(long)]
        answers: Option<PathBuf>,
        #[arg(long)]
        skip_dependency_check: bool,
        /// Print the generated settings file without writing anything
        #[arg(long)]
        print_only: bool,
    },
    /// Print ANON_KEY and SERVICE_ROLE_KEY from an env file
    ShowKeys {
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
    },
    /// Verify API tokens against JWT_SECRET
    VerifyToken {
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
        /// Token to check instead of the stored ones
        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProxyArg {
    Caddy,
    Nginx,
}

impl From<ProxyArg> for ProxyKind {
    fn from(val: ProxyArg) -> Self {
        match val {
            ProxyArg::Caddy => ProxyKind::Caddy,
            ProxyArg::Nginx => ProxyKind::Nginx,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Init {
            out_dir,
            proxy,
            second_factor,
            session_store,
            non_interactive,
            answers,
            skip_dependency_check,
            print_only,
        } => {
            let mut opts = if non_interactive {
                InitOptions::new_non_interactive(out_dir, proxy.into())
            } else {
                InitOptions::new(out_dir, proxy.into())
            };
            if second_factor {
                opts = opts.with_second_factor(session_store);
            }
            opts.answers_path = answers;
            opts.skip_dependency_check = skip_dependency_check;

            if print_only {
                let prepared = cli::prepare(&opts)
                    .context("failed to generate deployment artifacts")?;
                print!("{}", prepared.artifacts.env_contents());
                return Ok(());
            }

            let auto_confirm = std::env::var(AUTO_CONFIRM_VAR).is_ok();
            let skip_confirm = non_interactive || auto_confirm;
            let report = cli::run_init(&opts, |prepared| {
                if skip_confirm {
                    return Ok(true);
                }
                confirm_changes(prepared)
            })
            .context("supafast-init failed")?;

            match report {
                Some(report) => {
                    println!(
                        "Wrote {} files under {} (proxy: {}, second factor: {}, patches: {})",
                        report.files.len(),
                        opts.out_dir.display(),
                        report.flags.proxy_kind,
                        report.flags.second_factor,
                        report
                            .patches
                            .iter()
                            .map(|patch| patch.name())
                            .collect::<Vec<_>>()
                            .join(", "),
                    );
                    for path in &report.files {
                        println!("  {}", path.display());
                    }
                }
                None => println!("Aborted; nothing was written."),
            }
        }
        Command::ShowKeys { env_file } => {
            for key in ["ANON_KEY", "SERVICE_ROLE_KEY"] {
                match load_env_value(&env_file, key)? {
                    Some(value) if !value.trim().is_empty() => {
                        println!("{key}={value}")
                    }
                    _ => println!("{key} not found in {}", env_file.display()),
                }
            }
        }
        Command::VerifyToken { env_file, token } => {
            let Some(secret) = load_env_value(&env_file, "JWT_SECRET")? else {
                bail!("JWT_SECRET not found in {}", env_file.display());
            };
            let candidates = match token {
                Some(token) => vec![("--token".to_string(), token)],
                None => {
                    let mut stored = Vec::new();
                    for key in ["ANON_KEY", "SERVICE_ROLE_KEY"] {
                        let value = load_env_value(&env_file, key)?
                            .with_context(|| {
                                format!("{key} not found in {}", env_file.display())
                            })?;
                        stored.push((key.to_string(), value));
                    }
                    stored
                }
            };

            let now = chrono::Utc::now().timestamp();
            for (label, candidate) in &candidates {
                let claims = token::verify(candidate, &secret, now)
                    .with_context(|| format!("{label} failed verification"))?;
                let expected = match label.as_str() {
                    "ANON_KEY" => Some(ANON_ROLE),
                    "SERVICE_ROLE_KEY" => Some(SERVICE_ROLE),
                    _ => None,
                };
                if let Some(expected) = expected
                    && claims.role != expected
                {
                    bail!("{label} carries role `{}`, expected `{expected}`", claims.role);
                }
                println!(
                    "{label}: ok (role={}, iss={}, exp={})",
                    claims.role, claims.iss, claims.exp
                );
            }
        }
    }

    Ok(())
}

fn confirm_changes(
    prepared: &PreparedRun,
) -> Result<bool, supafast_config::InitError> {
    let path = prepared.env_path.display();
    if prepared.diff.is_empty() {
        println!("No changes to managed keys in {path}.");
    } else {
        println!();
        println!("Proposed changes to {path}:");
        println!();
        print!("{}", prepared.diff.render());
    }
    println!();
    println!(
        "The compose file and proxy config under {} will be replaced.",
        prepared
            .env_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .display()
    );
    let confirmed = Confirm::new()
        .with_prompt("Confirm and write the generated files?")
        .default(true)
        .interact_on(&Term::stderr())?;
    Ok(confirmed)
}

fn load_env_value(path: &Path, key: &str) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    for entry in dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read {}", path.display()))?
    {
        let (k, v) = entry?;
        if k == key {
            return Ok(Some(v));
        }
    }

    Ok(None)
}
