//! Resolves the id of the label replied messages are archived under
use crate::client::GmailClient;
use crate::config::PollConfig;
use crate::error::{GmailError, Result};
use crate::models::{Label, LabelVisibility};
use crate::poller::with_timeout;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ensures well-known labels exist, creating each at most once
pub struct LabelManager {
    client: Arc<dyn GmailClient>,
    call_timeout: Duration,
    label_cache: HashMap<String, String>, // name -> id mapping
}

impl LabelManager {
    pub fn new(client: Arc<dyn GmailClient>) -> Self {
        Self {
            client,
            call_timeout: PollConfig::default().call_timeout(),
            label_cache: HashMap::new(),
        }
    }

    /// Bound each create/list call by `limit` instead of the default
    pub fn with_call_timeout(mut self, limit: Duration) -> Self {
        self.call_timeout = limit;
        self
    }

    /// Returns the id of the label called `name`, creating it if needed.
    ///
    /// Creation is attempted first with default visibility. A conflict means
    /// the label already exists, so the id is looked up by name instead. Any
    /// other failure is returned to the caller unchanged.
    ///
    /// # Example
    /// ```ignore
    /// let label_id = manager.ensure_label("Auto-Reply").await?;
    /// ```
    pub async fn ensure_label(&mut self, name: &str) -> Result<String> {
        if let Some(id) = self.label_cache.get(name) {
            debug!("Label '{}' already resolved to {}", name, id);
            return Ok(id.clone());
        }

        let created = with_timeout(
            self.call_timeout,
            "create label",
            self.client.create_label(name, &LabelVisibility::default()),
        )
        .await;

        let label_id = match created {
            Ok(id) => {
                info!("Created label '{}' with ID: {}", name, id);
                id
            }
            Err(GmailError::Conflict(reason)) => {
                debug!("Label '{}' already exists ({}), looking it up", name, reason);
                self.find_label_id(name).await?
            }
            Err(e) => {
                warn!("Failed to create label '{}': {}", name, e);
                return Err(e);
            }
        };

        self.label_cache.insert(name.to_string(), label_id.clone());
        Ok(label_id)
    }

    async fn find_label_id(&self, name: &str) -> Result<String> {
        let labels =
            with_timeout(self.call_timeout, "list labels", self.client.list_labels()).await?;

        match matching_label(&labels, name) {
            Some(label) => {
                info!("Using existing label '{}' with ID: {}", label.name, label.id);
                Ok(label.id.clone())
            }
            None => {
                warn!("Label '{}' reported as existing but not found in label list", name);
                Err(GmailError::LabelError(format!(
                    "Label '{}' conflicts with an existing label but was not found",
                    name
                )))
            }
        }
    }
}

/// Exact name first; Gmail compares label names case-insensitively, so fall back to that
fn matching_label<'a>(labels: &'a [Label], name: &str) -> Option<&'a Label> {
    labels
        .iter()
        .find(|label| label.name == name)
        .or_else(|| labels.iter().find(|label| label.name.eq_ignore_ascii_case(name)))
}
