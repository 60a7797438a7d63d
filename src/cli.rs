//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// certgate: mTLS / bearer-token authentication gateway with a security audit log
#[derive(Parser, Debug)]
#[command(name = "certgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CERTGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CERTGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CERTGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CERTGATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CERTGATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default)
    Serve,

    /// Bearer token utilities
    #[command(subcommand)]
    Token(TokenCommand),

    /// Signing secret management
    #[command(subcommand)]
    Secret(SecretCommand),

    /// Private CA and certificate issuance
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// Token subcommands
#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    /// Print the SHA-256 (hex) a token is stored under
    Hash {
        /// Raw bearer token
        #[arg(required = true)]
        token: String,
    },
}

/// Secret subcommands
#[derive(Subcommand, Debug)]
pub enum SecretCommand {
    /// Replace the signing secret; every outstanding token stops validating
    Rotate,
}

/// Certificate role for `tls issue`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertRole {
    /// mTLS client certificate (the CN becomes the caller identity)
    Client,
    /// TLS server certificate
    Server,
}

/// TLS subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Create a self-signed CA as `<dir>/ca.crt` + `<dir>/ca.key`
    InitCa {
        /// Output directory
        #[arg(required = true)]
        dir: PathBuf,

        /// CA Common Name
        #[arg(long, default_value = "certgate Root CA")]
        cn: String,

        /// Validity in days
        #[arg(long, default_value_t = 3650)]
        days: u32,
    },

    /// Issue a leaf signed by `<dir>/ca.crt`, written as `<dir>/<cn>.crt/.key`
    Issue {
        /// Directory holding the CA (output goes here too)
        #[arg(required = true)]
        dir: PathBuf,

        /// Common Name
        #[arg(long, required = true)]
        cn: String,

        /// Organisation included in the subject
        #[arg(long)]
        org: Option<String>,

        /// Client or server certificate
        #[arg(long, value_enum, default_value_t = CertRole::Client)]
        role: CertRole,

        /// DNS subject alternative names (servers)
        #[arg(long = "dns")]
        dns: Vec<String>,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,
    },
}
