//! OAuth2 credential providers producing the authorized Gmail hub

use async_trait::async_trait;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;
use yup_oauth2::ApplicationSecret;

use crate::error::{GmailError, Result};

/// Gmail API scopes the auto-reply loop needs
///
/// - gmail.readonly: list and fetch unread messages
/// - gmail.send: send the auto-reply
/// - gmail.labels: create and list the archive label
/// - gmail.modify: move messages out of the inbox
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.labels",
    "https://www.googleapis.com/auth/gmail.modify",
];

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Source of an authorized Gmail hub, obtained once at startup
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authorize(&self, scopes: &[&str]) -> Result<GmailHub>;
}

/// Installed-app flow reading the client secret from a credentials JSON file
///
/// The first run opens a browser for consent; tokens are then cached on disk.
#[derive(Debug, Clone)]
pub struct InstalledFlowProvider {
    pub credentials_path: PathBuf,
    pub token_cache_path: PathBuf,
}

impl InstalledFlowProvider {
    pub fn new(credentials_path: impl Into<PathBuf>, token_cache_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            token_cache_path: token_cache_path.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for InstalledFlowProvider {
    async fn authorize(&self, scopes: &[&str]) -> Result<GmailHub> {
        let secret = yup_oauth2::read_application_secret(&self.credentials_path)
            .await
            .map_err(|e| GmailError::AuthError(format!("Failed to read credentials: {}", e)))?;

        build_hub(secret, &self.token_cache_path, scopes).await
    }
}

/// Installed-app flow with client id and secret taken from the environment
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    pub token_cache_path: PathBuf,
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn authorize(&self, scopes: &[&str]) -> Result<GmailHub> {
        let secret = load_credentials_from_env()?;
        build_hub(secret, &self.token_cache_path, scopes).await
    }
}

/// Build the authenticator and Gmail hub for an application secret
///
/// Tokens are persisted to `token_cache_path` and a token for `scopes` is
/// fetched up front so consent happens before the poll loop starts.
async fn build_hub(
    secret: ApplicationSecret,
    token_cache_path: &Path,
    scopes: &[&str],
) -> Result<GmailHub> {
    if let Some(parent) = token_cache_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // HTTPRedirect opens a browser for user authorization
    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    auth.token(scopes)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if token_cache_path.exists() {
        secure_token_file(token_cache_path).await?;
    }
    info!("Authorized Gmail access for {} scopes", scopes.len());

    // Use HTTP/1 for compatibility (HTTP/2 is default but HTTP/1 works better with google-gmail1)
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| {
                    GmailError::AuthError(format!("Failed to load TLS roots: {}", e))
                })?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

/// Load OAuth2 credentials from environment variables
///
/// # Environment Variables
/// - `GMAIL_CLIENT_ID`: OAuth2 client ID
/// - `GMAIL_CLIENT_SECRET`: OAuth2 client secret
/// - `GMAIL_REDIRECT_URI`: Redirect URI (optional, defaults to http://localhost:8080)
pub fn load_credentials_from_env() -> Result<ApplicationSecret> {
    let client_id = env::var("GMAIL_CLIENT_ID")
        .map_err(|_| GmailError::ConfigError("GMAIL_CLIENT_ID not set".to_string()))?;
    let client_secret = env::var("GMAIL_CLIENT_SECRET")
        .map_err(|_| GmailError::ConfigError("GMAIL_CLIENT_SECRET not set".to_string()))?;
    let redirect_uri = env::var("GMAIL_REDIRECT_URI")
        .unwrap_or_else(|_| "http://localhost:8080".to_string());

    Ok(ApplicationSecret {
        client_id,
        client_secret,
        auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
        token_uri: "https://oauth2.googleapis.com/token".to_string(),
        redirect_uris: vec![redirect_uri],
        ..Default::default()
    })
}

/// Restrict the token file to its owner (0600)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows relies on the default ACLs of the user profile
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
