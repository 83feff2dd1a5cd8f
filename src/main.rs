//! Keymaster - biometric gatekeeper for a per-user secret vault
//!
//! Usage:
//!   keymaster get    <key>
//!   keymaster set    <key> <secret>
//!   keymaster delete <key>
//!
//! A successful device-owner check is remembered for `KEYMASTER_TTL`
//! seconds (default 300), so calls within that window skip the prompt.

use std::borrow::Cow;
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use keymaster::auth::CommandAuthenticator;
use keymaster::backend::{KeychainBackend, PassBackend, Vault};
use keymaster::config::{BackendKind, Config, VaultConfig};
use keymaster::dispatcher::{Dispatcher, Intent, Outcome};
use keymaster::session::{self, FileSessionStore};
use keymaster::EXIT_USAGE;

const USAGE: &str = "usage: keymaster <get <key> | set <key> <secret> | delete <key>>";

#[derive(Parser, Debug)]
#[command(name = "keymaster")]
#[command(author, version, about = "Biometric gatekeeper for a per-user secret vault", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "KEYMASTER_CONFIG")]
    config: Option<PathBuf>,

    /// Session reuse window in seconds
    #[arg(long, env = "KEYMASTER_TTL", hide = true)]
    ttl: Option<OsString>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a stored secret
    Get {
        /// Secret key name
        #[arg(allow_hyphen_values = true)]
        key: String,
    },

    /// Store a new secret (fails if the key already exists)
    Set {
        /// Secret key name
        #[arg(allow_hyphen_values = true)]
        key: String,
        /// Secret value
        #[arg(allow_hyphen_values = true)]
        secret: String,
    },

    /// Delete a stored secret
    Delete {
        /// Secret key name
        #[arg(allow_hyphen_values = true)]
        key: String,
    },
}

impl From<Command> for Intent {
    fn from(command: Command) -> Self {
        match command {
            Command::Get { key } => Intent::Get { key },
            Command::Set { key, secret } => Intent::Set {
                key,
                secret: SecretString::from(secret),
            },
            Command::Delete { key } => Intent::Delete { key },
        }
    }
}

/// What the command line asks for
enum Invocation {
    Run(Args),
    /// `--help` or `--version`; clap prints and exits on its own
    Builtin(clap::Error),
    Usage,
}

fn parse_invocation<I, T>(argv: I) -> Invocation
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Args::try_parse_from(argv) {
        Ok(args) => Invocation::Run(args),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            Invocation::Builtin(e)
        }
        Err(_) => Invocation::Usage,
    }
}

/// Print the usage line; returns the exit status for a malformed invocation
fn usage(out: &mut impl Write) -> u8 {
    // nothing useful left to do if stdout is gone
    let _ = writeln!(out, "{USAGE}");
    EXIT_USAGE
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match parse_invocation(std::env::args_os()) {
        Invocation::Run(args) => args,
        Invocation::Builtin(e) => e.exit(),
        Invocation::Usage => return ExitCode::from(usage(&mut std::io::stdout())),
    };

    init_logging(args.verbose, args.json_logs);

    let dispatcher = match build_dispatcher(&args) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let json = args.json;
    let result = dispatcher.run(args.command.into()).await;
    ExitCode::from(report(result, json, &mut std::io::stdout()))
}

/// Print the outcome (or the error on stderr) and pick the exit status
fn report(result: keymaster::Result<Outcome>, json: bool, out: &mut impl Write) -> u8 {
    match result {
        Ok(outcome) => match print_outcome(&outcome, json, out) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("error: {e:#}");
                1
            }
        },
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

fn init_logging(verbose: u8, json_logs: bool) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("keymaster={log_level},warn")));

    // stdout carries results only
    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_dispatcher(args: &Args) -> anyhow::Result<Dispatcher> {
    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(config = ?config, "loaded configuration");

    let window = session::resolve_window(ttl_override(args).as_deref(), config.session_ttl());

    Ok(Dispatcher::new(
        Arc::new(FileSessionStore::new(&config.session.path)),
        Arc::new(CommandAuthenticator::new(&config.authenticator)),
        vault_for(&config.vault),
        window,
    ))
}

/// `KEYMASTER_TTL` as text; bytes that are not UTF-8 make it unparseable, not fatal
fn ttl_override(args: &Args) -> Option<Cow<'_, str>> {
    args.ttl.as_ref().map(|raw| raw.to_string_lossy())
}

fn vault_for(config: &VaultConfig) -> Arc<dyn Vault> {
    match config.backend {
        BackendKind::Keyring => Arc::new(KeychainBackend::new(&config.service)),
        BackendKind::Pass => Arc::new(PassBackend::new(&config.pass)),
    }
}

fn print_outcome(outcome: &Outcome, json: bool, out: &mut impl Write) -> anyhow::Result<()> {
    if json {
        let value = match outcome {
            Outcome::Retrieved { key, secret } => {
                serde_json::json!({ "key": key, "value": secret.expose_secret() })
            }
            Outcome::Stored { key } => serde_json::json!({ "key": key, "status": "stored" }),
            Outcome::Deleted { key } => serde_json::json!({ "key": key, "status": "deleted" }),
        };
        writeln!(out, "{}", serde_json::to_string(&value)?)?;
        return Ok(());
    }

    match outcome {
        Outcome::Retrieved { secret, .. } => writeln!(out, "{}", secret.expose_secret())?,
        Outcome::Stored { key } => writeln!(out, "stored {key}")?,
        Outcome::Deleted { key } => writeln!(out, "deleted {key}")?,
    }
    Ok(())
}
