//! Portico - a configuration-driven web server with automatic HTTPS
//!
//! This is the main entry point for the Portico CLI.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Portico - modular web server with automatic HTTPS
#[derive(Parser)]
#[command(name = "portico")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server with a configuration file
    Run {
        /// Path to the JSON config
        #[arg(default_value = "portico.json")]
        config: String,
    },

    /// Validate a configuration file without binding listeners
    Validate {
        /// Path to the JSON config
        #[arg(default_value = "portico.json")]
        config: String,
    },

    /// Show version information
    Version,
}

/// Top-level configuration: one object per app.
#[derive(Default, Deserialize)]
struct Config {
    #[serde(default)]
    apps: Apps,
}

#[derive(Default, Deserialize)]
struct Apps {
    #[serde(default)]
    http: portico_core::App,

    #[serde(default)]
    tls: portico_tls::TlsConfig,
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config {path}: {e}"))?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("parsing config {path}: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Run { config: path } => {
            tracing::info!(config = %path, "Starting Portico");
            let config = load_config(&path)?;

            let tls = portico_tls::TlsApp::new(config.apps.tls)?;
            let mut app = config.apps.http;
            app.provision(portico_core::Registry::global(), &tls)?;
            app.start(tls).await?;

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            app.stop().await;
        }

        Commands::Validate { config: path } => {
            let config = load_config(&path)?;
            let tls = portico_tls::TlsApp::new(config.apps.tls)?;
            let mut app = config.apps.http;
            app.provision(portico_core::Registry::global(), &tls)?;
            println!("Valid configuration");
        }

        Commands::Version => {
            println!("portico {}", portico_core::VERSION);
        }
    }

    Ok(())
}
