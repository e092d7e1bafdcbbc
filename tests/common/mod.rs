//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use gmail_autoreply::client::GmailClient;
use gmail_autoreply::error::{GmailError, Result};
use gmail_autoreply::models::{Header, Label, LabelVisibility, Message, RawReply, INBOX_LABEL};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

pub const UNREAD_LABEL: &str = "UNREAD";

/// Address of the account the fake mailbox belongs to
pub const ACCOUNT_ADDRESS: &str = "me@example.com";

/// Create an unread inbox message with the given headers
pub fn create_test_message(id: &str, headers: &[(&str, &str)]) -> Message {
    Message {
        id: id.to_string(),
        thread_id: Some(format!("thread_{}", id)),
        label_ids: vec![INBOX_LABEL.to_string(), UNREAD_LABEL.to_string()],
        headers: headers.iter().map(|(n, v)| Header::new(*n, *v)).collect(),
    }
}

/// A fresh message from a sender, not part of any thread
pub fn create_new_message(id: &str, from: &str, subject: &str) -> Message {
    let message_id = format!("<{}@mail.example.com>", id);
    create_test_message(
        id,
        &[
            ("From", from),
            ("Subject", subject),
            ("Message-ID", message_id.as_str()),
        ],
    )
}

/// A message that answers an earlier one
pub fn create_reply_message(id: &str, from: &str, subject: &str) -> Message {
    create_test_message(
        id,
        &[
            ("From", from),
            ("Subject", subject),
            ("In-Reply-To", "<earlier@mail.example.com>"),
        ],
    )
}

#[derive(Default)]
struct MailboxState {
    messages: BTreeMap<String, Message>,
    labels: Vec<Label>,
    sent: Vec<RawReply>,
    create_label_calls: usize,
    modify_calls: Vec<String>,
    fail_send_for: HashSet<String>,
    fail_list: bool,
}

/// In-memory account that answers the Gmail calls the way the API does:
/// the unread query only sees messages labelled INBOX and UNREAD, and
/// creating a label whose name is taken, ignoring case, is a conflict.
#[derive(Default)]
pub struct InMemoryMailbox {
    state: Mutex<MailboxState>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        let mailbox = Self::new();
        for message in messages {
            mailbox.deliver(message);
        }
        mailbox
    }

    pub fn deliver(&self, message: Message) {
        let mut state = self.state.lock().unwrap();
        state.messages.insert(message.id.clone(), message);
    }

    pub fn add_existing_label(&self, id: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.labels.push(Label {
            id: id.to_string(),
            name: name.to_string(),
            visibility: LabelVisibility::default(),
        });
    }

    pub fn fail_send_for(&self, subject: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_send_for
            .insert(subject.to_string());
    }

    pub fn clear_send_failures(&self) {
        self.state.lock().unwrap().fail_send_for.clear();
    }

    pub fn set_list_failure(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    pub fn sent(&self) -> Vec<RawReply> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn labels(&self) -> Vec<Label> {
        self.state.lock().unwrap().labels.clone()
    }

    pub fn create_label_calls(&self) -> usize {
        self.state.lock().unwrap().create_label_calls
    }

    pub fn modify_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().modify_calls.clone()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.state.lock().unwrap().messages.get(id).cloned()
    }
}

#[async_trait]
impl GmailClient for InMemoryMailbox {
    async fn list_unread_inbox_ids(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(GmailError::NetworkError("connection reset".to_string()));
        }

        Ok(state
            .messages
            .values()
            .filter(|m| {
                m.label_ids.iter().any(|l| l == INBOX_LABEL)
                    && m.label_ids.iter().any(|l| l == UNREAD_LABEL)
            })
            .map(|m| m.id.clone())
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        self.message(id)
            .ok_or_else(|| GmailError::MessageNotFound(id.to_string()))
    }

    async fn send_raw_message(&self, reply: &RawReply) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let text = reply.as_text().into_owned();
        if state
            .fail_send_for
            .iter()
            .any(|subject| text.contains(&format!("Subject: Re: {}\r\n", subject)))
        {
            return Err(GmailError::ServerError {
                status: 503,
                message: "Backend Error".to_string(),
            });
        }

        state.sent.push(reply.clone());
        Ok(format!("sent_{}", state.sent.len()))
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.modify_calls.push(message_id.to_string());
        let message = state
            .messages
            .get_mut(message_id)
            .ok_or_else(|| GmailError::MessageNotFound(message_id.to_string()))?;

        message.label_ids.retain(|l| !remove_label_ids.contains(l));
        for label in add_label_ids {
            if !message.label_ids.contains(label) {
                message.label_ids.push(label.clone());
            }
        }
        Ok(())
    }

    async fn create_label(&self, name: &str, visibility: &LabelVisibility) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.create_label_calls += 1;

        if state.labels.iter().any(|l| l.name.eq_ignore_ascii_case(name)) {
            return Err(GmailError::Conflict(
                "Label name exists or conflicts".to_string(),
            ));
        }

        let id = format!("Label_{}", state.labels.len() + 1);
        state.labels.push(Label {
            id: id.clone(),
            name: name.to_string(),
            visibility: visibility.clone(),
        });
        Ok(id)
    }

    async fn list_labels(&self) -> Result<Vec<Label>> {
        Ok(self.labels())
    }

    async fn get_profile_address(&self) -> Result<String> {
        Ok(ACCOUNT_ADDRESS.to_string())
    }
}
