//! Strongroom - at-rest protection for sensitive uploads

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use strongroom_cli::{execute, load_config, Command, Overrides};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "strongroom")]
#[command(about = "Encrypt, deliver and erase sensitive uploads")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "STRONGROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Key store directory (use a ramdisk in production)
    #[arg(long, env = "STRONGROOM_KEY_STORE_DIR")]
    key_store_dir: Option<PathBuf>,

    /// Parent directory of ephemeral PGP keyrings
    #[arg(long, env = "STRONGROOM_PGP_ROOT")]
    pgp_root: Option<PathBuf>,

    /// AES key size in bytes (16, 24 or 32)
    #[arg(long, env = "STRONGROOM_KEY_SIZE")]
    key_size: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, env = "STRONGROOM_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logs go to stderr so command output stays clean
    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("strongroom_cli={0},strongroom_crypto={0}", log_level).into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    let overrides = Overrides {
        key_store_dir: args.key_store_dir,
        pgp_root: args.pgp_root,
        key_size: args.key_size,
    };

    let result = load_config(args.config.as_deref(), &overrides)
        .and_then(|config| execute(args.command, &config, &mut std::io::stdout().lock()));

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            eprintln!("error[{}]: {}", e.code(), e);
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}
