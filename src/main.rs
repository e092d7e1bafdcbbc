use anyhow::Result;
use clap::Parser;
use gmail_autoreply::cli::{self, Cli, Commands};
use gmail_autoreply::client::{GmailClient, ProductionGmailClient};
use gmail_autoreply::config::Config;
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: gmail-autoreply --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // This is necessary because multiple dependencies use different crypto providers
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_autoreply=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_autoreply=info,warn"))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!("Gmail auto-reply starting...");

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub = cli
                .credential_provider()
                .authorize(gmail_autoreply::auth::REQUIRED_SCOPES)
                .await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            let address = ProductionGmailClient::new(hub).get_profile_address().await?;
            println!("Connected to account: {}", address);

            Ok(())
        }

        Commands::Run { once } => {
            cli::run(&cli, once).await?;
            Ok(())
        }

        Commands::Serve => {
            cli::serve(&cli).await?;
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Config file {:?} already exists (use --force to overwrite)",
                    output
                );
            }

            Config::create_example(&output).await?;
            println!("Created example configuration at {:?}", output);
            Ok(())
        }
    }
}
