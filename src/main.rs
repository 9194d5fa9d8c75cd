/*!
 * Kiosklink CLI
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use kiosklink::{
    config::KioskConfig,
    error::{KioskError, EXIT_FATAL, EXIT_SUCCESS},
    logging, runner, RunOptions,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "kiosklink")]
#[command(version, about = "Kiosk display client with a self-healing backend connection", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and stream diagnostics and backend events as JSON lines
    Run {
        /// Configuration file (defaults to the user config directory)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Override the backend endpoint
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,

        /// Override the auth token
        #[arg(long, value_name = "TOKEN", env = "KIOSKLINK_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Exit after the initial connection phase (exit code 1 if degraded)
        #[arg(long)]
        once: bool,
    },

    /// Write an example configuration file
    Init {
        /// Where to write (defaults to the user config directory)
        #[arg(short, long, value_name = "PATH")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Report the host's active network interfaces and reachability
    Probe {
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match execute(cli).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<KioskError>()
                .map(KioskError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };

    std::process::exit(code);
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            config,
            endpoint,
            token,
            once,
        } => {
            let mut config = load(config.as_deref())?;
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            if token.is_some() {
                config.identity.auth_token = token;
            }
            config.verbose |= cli.verbose;

            logging::init_logging(&config)?;
            runner::run(&config, RunOptions { once }).await?;
        }

        Commands::Init { path, force } => {
            let path = match path {
                Some(path) => path,
                None => KioskConfig::default_path().ok_or_else(|| {
                    KioskError::Config("no configuration directory on this host".to_string())
                })?,
            };
            if path.exists() && !force {
                return Err(KioskError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ))
                .into());
            }

            KioskConfig::example()
                .to_file(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {}", path.display());
        }

        Commands::Probe { config } => {
            // Probing works without a config file
            let config = match config {
                Some(path) => load(Some(&path))?,
                None => KioskConfig::default(),
            };
            runner::probe(&config).await;
        }

        Commands::CheckConfig { config } => {
            let loaded = load(config.as_deref())?;
            loaded.validate()?;
            println!(
                "Configuration OK: {} as {}/{}",
                loaded.endpoint, loaded.identity.store_id, loaded.identity.display_id
            );
        }
    }

    Ok(())
}

fn load(path: Option<&Path>) -> anyhow::Result<KioskConfig> {
    let config = KioskConfig::load(path).context("loading configuration")?;
    Ok(config)
}
