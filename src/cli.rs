//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::auth::{CredentialProvider, EnvCredentialProvider, InstalledFlowProvider, REQUIRED_SCOPES};
use crate::client::{GmailClient, ProductionGmailClient};
use crate::config::Config;
use crate::error::Result;
use crate::models::CycleReport;
use crate::poller::Poller;

#[derive(Parser, Debug)]
#[command(name = "gmail-autoreply")]
#[command(version)]
#[command(about = "Replies to unread Gmail messages and files them under a label", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Read the OAuth2 client from GMAIL_CLIENT_ID / GMAIL_CLIENT_SECRET instead of a file
    #[arg(long)]
    pub env_credentials: bool,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-autoreply/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Start the auto-reply loop
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Wait for an HTTP request before starting the auto-reply loop
    Serve,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Credential provider selected by the flags
    pub fn credential_provider(&self) -> Arc<dyn CredentialProvider> {
        if self.env_credentials {
            Arc::new(EnvCredentialProvider {
                token_cache_path: self.token_cache.clone(),
            })
        } else {
            Arc::new(InstalledFlowProvider::new(
                self.credentials.clone(),
                self.token_cache.clone(),
            ))
        }
    }
}

/// Authorize, resolve the target label and build the poller
///
/// Both steps are fatal: without a credential or a label there is nothing to do.
pub async fn connect(provider: &dyn CredentialProvider, config: &Config) -> Result<Poller> {
    let hub = provider.authorize(REQUIRED_SCOPES).await?;
    let client: Arc<dyn GmailClient> = Arc::new(ProductionGmailClient::new(hub));
    Poller::initialize(client, config).await
}

/// `run` subcommand
pub async fn run(cli: &Cli, once: bool) -> Result<()> {
    let config = Config::load(&cli.config).await?;
    let provider = cli.credential_provider();
    let mut poller = connect(provider.as_ref(), &config).await?;

    if once {
        let report = poller.run_cycle().await;
        print_report(&report);
        return Ok(());
    }

    info!("Running until interrupted");
    poller.run().await;
    Ok(())
}

/// `serve` subcommand
pub async fn serve(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.config).await?;
    let addr = config.trigger_addr()?;
    let launcher = Arc::new(crate::trigger::GmailLauncher::new(
        cli.credential_provider(),
        config,
    ));
    crate::trigger::serve(addr, launcher).await
}

fn print_report(report: &CycleReport) {
    println!("\n========================================");
    println!("Cycle Summary");
    println!("========================================");
    println!("Cycle ID: {}", report.cycle_id);
    println!("Started: {}", report.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Unread in inbox: {}", report.listed);
    println!("Replied: {}", report.replied);
    println!("Already replied: {}", report.already_replied);
    println!("Failed: {}", report.failed);
    if let Some(secs) = report.rate_limited_for {
        println!("Rate limited: back off {}s", secs);
    }
    println!("========================================");
}
