//! Gmail API client: the mail-service operations the auto-reply loop consumes

use async_trait::async_trait;
use google_gmail1::api;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

use crate::auth::GmailHub;
use crate::error::{GmailError, Result};
use crate::models::{Header, Label, LabelVisibility, Message, RawReply, INBOX_LABEL};

const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
const LABELS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.labels";
const SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Query used together with the INBOX label filter
pub const UNREAD_QUERY: &str = "is:unread";

/// Trait defining the mail-service operations, for easier testing
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// List ids of unread messages that carry the INBOX label
    async fn list_unread_inbox_ids(&self) -> Result<Vec<String>>;

    /// Fetch a full message
    async fn get_message(&self, id: &str) -> Result<Message>;

    /// Send a raw RFC 822 message as the authenticated user, returning the sent id
    async fn send_raw_message(&self, reply: &RawReply) -> Result<String>;

    /// Add and remove labels on one message
    async fn modify_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;

    /// Create a label, returning its id. Fails with `GmailError::Conflict` if the name is taken
    async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<String>;

    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<Label>>;

    /// Email address of the authenticated account, used as the reply sender
    async fn get_profile_address(&self) -> Result<String>;
}

/// Production Gmail client backed by the `google-gmail1` hub
pub struct ProductionGmailClient {
    hub: GmailHub,
}

impl ProductionGmailClient {
    pub fn new(hub: GmailHub) -> Self {
        Self { hub }
    }
}

/// Convert an API message into our Message, keeping header order
///
/// Headers missing a name are dropped; a missing value reads as empty.
fn parse_message(msg: api::Message) -> Result<Message> {
    let id = msg
        .id
        .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|h| {
            let name = h.name?;
            Some(Header {
                name,
                value: h.value.unwrap_or_default(),
            })
        })
        .collect();

    Ok(Message {
        id,
        thread_id: msg.thread_id,
        label_ids: msg.label_ids.unwrap_or_default(),
        headers,
    })
}

fn parse_label(label: api::Label) -> Option<Label> {
    let defaults = LabelVisibility::default();
    Some(Label {
        id: label.id?,
        name: label.name?,
        visibility: LabelVisibility {
            label_list: label.label_list_visibility.unwrap_or(defaults.label_list),
            message_list: label.message_list_visibility.unwrap_or(defaults.message_list),
        },
    })
}

/// `None` for an empty slice, so the request omits the field
fn non_empty(ids: &[String]) -> Option<Vec<String>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.to_vec())
    }
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_unread_inbox_ids(&self) -> Result<Vec<String>> {
        let mut all_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .add_label_ids(INBOX_LABEL)
                .q(UNREAD_QUERY)
                .max_results(100);

            if let Some(token) = page_token.as_ref() {
                call = call.page_token(token);
            }

            let (_, response) = call.add_scope(MODIFY_SCOPE).doit().await?;

            all_ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!("Listed {} unread inbox messages", all_ids.len());
        Ok(all_ids)
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .add_scope(MODIFY_SCOPE)
            .doit()
            .await?;

        parse_message(msg)
    }

    async fn send_raw_message(&self, reply: &RawReply) -> Result<String> {
        let mime_type: mime::Mime = "message/rfc822"
            .parse()
            .map_err(|e| GmailError::ApiError(format!("Invalid upload MIME type: {}", e)))?;

        let request = api::Message {
            thread_id: reply.thread_id.clone(),
            ..Default::default()
        };

        let (_, sent) = self
            .hub
            .users()
            .messages_send(request, "me")
            .add_scope(SEND_SCOPE)
            .upload(Cursor::new(reply.bytes.clone()), mime_type)
            .await?;

        sent.id
            .ok_or_else(|| GmailError::InvalidMessageFormat("Sent message has no ID".to_string()))
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let modify_request = api::ModifyMessageRequest {
            add_label_ids: non_empty(add_label_ids),
            remove_label_ids: non_empty(remove_label_ids),
        };

        self.hub
            .users()
            .messages_modify(modify_request, "me", message_id)
            .add_scope(MODIFY_SCOPE)
            .doit()
            .await?;

        Ok(())
    }

    async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<String> {
        let label = api::Label {
            name: Some(name.to_string()),
            label_list_visibility: Some(visibility.label_list.clone()),
            message_list_visibility: Some(visibility.message_list.clone()),
            ..Default::default()
        };

        let (_, created_label) = self
            .hub
            .users()
            .labels_create(label, "me")
            .add_scope(LABELS_SCOPE)
            .doit()
            .await?;

        created_label
            .id
            .ok_or_else(|| GmailError::LabelError("Created label has no ID".to_string()))
    }

    async fn list_labels(&self) -> Result<Vec<Label>> {
        let (_, response) = self
            .hub
            .users()
            .labels_list("me")
            .add_scope(LABELS_SCOPE)
            .doit()
            .await?;

        Ok(response
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(parse_label)
            .collect())
    }

    async fn get_profile_address(&self) -> Result<String> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile("me")
            .add_scope(READONLY_SCOPE)
            .doit()
            .await?;

        profile
            .email_address
            .ok_or_else(|| GmailError::AuthError("Profile has no email address".to_string()))
    }
}

// Shared ownership: the trigger and the poll task hold the same client
#[async_trait]
impl<T: GmailClient + ?Sized> GmailClient for Arc<T> {
    async fn list_unread_inbox_ids(&self) -> Result<Vec<String>> {
        self.as_ref().list_unread_inbox_ids().await
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        self.as_ref().get_message(id).await
    }

    async fn send_raw_message(&self, reply: &RawReply) -> Result<String> {
        self.as_ref().send_raw_message(reply).await
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.as_ref()
            .modify_labels(message_id, add_label_ids, remove_label_ids)
            .await
    }

    async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<String> {
        self.as_ref().create_label(name, visibility).await
    }

    async fn list_labels(&self) -> Result<Vec<Label>> {
        self.as_ref().list_labels().await
    }

    async fn get_profile_address(&self) -> Result<String> {
        self.as_ref().get_profile_address().await
    }
}
