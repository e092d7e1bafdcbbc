//! Gmail Auto-Reply
//!
//! Polls a Gmail account on a randomized interval, answers unread inbox
//! messages that are not already part of a reply thread with a fixed
//! auto-reply, and moves each answered message out of the inbox under a
//! dedicated label so it is never answered twice.
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_autoreply::{auth::InstalledFlowProvider, cli, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let provider = InstalledFlowProvider::new(
//!         "credentials.json",
//!         ".gmail-autoreply/token.json",
//!     );
//!
//!     let poller = cli::connect(&provider, &config).await?;
//!     poller.run().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 credential providers
//! - [`client`] - Gmail API client trait and production adapter
//! - [`cli`] - Command-line interface
//! - [`composer`] - Auto-reply construction
//! - [`config`] - Configuration management
//! - [`detector`] - Already-replied detection
//! - [`error`] - Error types and result aliases
//! - [`label_manager`] - Idempotent label resolution
//! - [`models`] - Core data structures
//! - [`poller`] - The poll loop
//! - [`trigger`] - HTTP startup hook

pub mod auth;
pub mod cli;
pub mod client;
pub mod composer;
pub mod config;
pub mod detector;
pub mod error;
pub mod label_manager;
pub mod models;
pub mod poller;
pub mod trigger;

pub use error::{GmailError, Result};

pub use models::{CycleReport, Header, Label, LabelVisibility, Message, MessageOutcome, RawReply};

pub use auth::{CredentialProvider, EnvCredentialProvider, InstalledFlowProvider};
pub use client::{GmailClient, ProductionGmailClient};
pub use composer::compose_reply;
pub use config::Config;
pub use detector::has_replied;
pub use label_manager::LabelManager;
pub use poller::{PollSchedule, PollState, Poller};
