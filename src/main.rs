//! certgate - mTLS / bearer-token authentication gateway
//!
//! Serves the authenticated API and provides the operator tooling around it
//! (token hashing, secret rotation, private CA bootstrap).

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use certgate::{
    cli::{CertRole, Cli, Command, SecretCommand, TlsCommand, TokenCommand},
    config::Config,
    mtls::{CaParams, CertGenerator, LeafCertParams, LeafUsage},
    secrets::{FileSecretStore, SecretStore},
    server, setup_tracing,
    token::hash_token,
};

#[tokio::main]
async fn main() -> ExitCode {
    let mut cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command.take() {
        Some(Command::Token(cmd)) => run_token_command(cmd),
        Some(Command::Secret(cmd)) => run_secret_command(cmd, &cli),
        Some(Command::Tls(cmd)) => run_tls_command(cmd),
        Some(Command::Serve) | None => run_server(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load configuration, applying CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }

    Ok(config)
}

/// Run the server
async fn run_server(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.bind_addr(),
        auth = config.auth_enabled(),
        tls = config.tls_enabled(),
        "Starting certgate"
    );

    server::run(config).await.context("Server error")
}

fn run_token_command(cmd: TokenCommand) -> Result<()> {
    match cmd {
        TokenCommand::Hash { token } => {
            println!("{}", hex::encode(hash_token(&token)));
            Ok(())
        }
    }
}

fn run_secret_command(cmd: SecretCommand, cli: &Cli) -> Result<()> {
    match cmd {
        SecretCommand::Rotate => {
            let config = load_config(cli)?;
            let (store, key) = FileSecretStore::for_file(&config.auth.secret_path)?;
            store.rotate(&key).context("Failed to rotate secret")?;
            println!("✅ Rotated signing secret at {}", config.auth.secret_path);
            println!("   Outstanding tokens no longer validate; restart the server to pick it up.");
            Ok(())
        }
    }
}

fn run_tls_command(cmd: TlsCommand) -> Result<()> {
    match cmd {
        TlsCommand::InitCa { dir, cn, days } => {
            let ca = CertGenerator::init_ca(&CaParams {
                cn: &cn,
                validity_days: days,
            })?;
            CertGenerator::write_to_dir(&ca, &dir, "ca")?;
            println!("✅ CA '{cn}' written to {}", dir.display());
            println!("   Set tls.ca_cert to {}", dir.join("ca.crt").display());
            Ok(())
        }
        TlsCommand::Issue {
            dir,
            cn,
            org,
            role,
            dns,
            days,
        } => {
            let (ca_cert, ca_key) = read_ca(&dir)?;
            let usage = match role {
                CertRole::Client => LeafUsage::Client,
                CertRole::Server => LeafUsage::Server,
            };
            let leaf = CertGenerator::issue_leaf(
                &LeafCertParams {
                    cn: &cn,
                    org: org.as_deref(),
                    san_dns: dns,
                    usage,
                    validity_days: days,
                },
                &ca_cert,
                &ca_key,
            )?;
            let stem = file_stem_for(&cn);
            CertGenerator::write_to_dir(&leaf, &dir, &stem)?;
            println!(
                "✅ Issued {role:?} certificate for '{cn}': {}",
                dir.join(format!("{stem}.crt")).display()
            );
            Ok(())
        }
    }
}

fn read_ca(dir: &Path) -> Result<(String, String)> {
    let cert_path = dir.join("ca.crt");
    let key_path = dir.join("ca.key");
    let cert = fs::read_to_string(&cert_path)
        .with_context(|| format!("Cannot read {}", cert_path.display()))?;
    let key = fs::read_to_string(&key_path)
        .with_context(|| format!("Cannot read {}", key_path.display()))?;
    Ok((cert, key))
}

/// File-system-safe stem for a CN (`Alice Smith` → `Alice_Smith`).
fn file_stem_for(cn: &str) -> String {
    cn.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
