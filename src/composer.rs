//! Builds the fixed auto-reply for an incoming message

use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::Mailbox;
use lettre::Address;

use crate::error::{GmailError, Result};
use crate::models::{Message, RawReply};

/// Body sent in every auto-reply
pub const AUTO_REPLY_BODY: &str =
    "Thank you for your email. I'm currently unavailable and will reply to you when I return.";

/// Builds an RFC 822 reply from `sender` to the sender of `message`.
///
/// `To` is the original `From`, `Subject` is `"Re: "` plus the original
/// subject. When the original has a `Message-ID` the reply references it so
/// clients thread the two together. Non-ASCII header text is RFC 2047 encoded.
///
/// # Errors
/// `GmailError::MissingHeader` when `From` or `Subject` is absent, and
/// `GmailError::InvalidMessageFormat` when `From` holds no usable address.
pub fn compose_reply(message: &Message, sender: &Mailbox) -> Result<RawReply> {
    let from = required_header(message, "From")?;
    let subject = required_header(message, "Subject")?;
    let recipient = parse_recipient(message, from)?;

    let mut builder = lettre::Message::builder()
        .from(sender.clone())
        .to(recipient)
        .subject(format!("Re: {}", single_line(subject)));

    if let Some(message_id) = message.header("Message-ID") {
        let message_id = single_line(message_id);
        builder = builder
            .in_reply_to(message_id.clone())
            .references(message_id);
    }

    let reply = builder
        .header(ContentType::TEXT_PLAIN)
        .header(ContentTransferEncoding::SevenBit)
        .body(format!("{}\r\n", AUTO_REPLY_BODY))
        .map_err(|e| {
            GmailError::InvalidMessageFormat(format!(
                "Failed to build reply to {}: {}",
                message.id, e
            ))
        })?;

    Ok(RawReply {
        bytes: reply.formatted(),
        thread_id: message.thread_id.clone(),
    })
}

fn required_header<'a>(message: &'a Message, name: &'static str) -> Result<&'a str> {
    message.header(name).ok_or_else(|| GmailError::MissingHeader {
        message_id: message.id.clone(),
        header: name,
    })
}

/// Line breaks in a header value become spaces
fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

/// Mailbox from a `From` value such as `a@x.com` or `"Ann" <a@x.com>`
fn parse_recipient(message: &Message, from: &str) -> Result<Mailbox> {
    let from = single_line(from);
    if let Ok(mailbox) = from.trim().parse::<Mailbox>() {
        return Ok(mailbox);
    }

    // Display names the strict parser rejects still carry a usable address
    let invalid = |reason: String| {
        GmailError::InvalidMessageFormat(format!(
            "Message {} has an unusable From header {:?}: {}",
            message.id, from, reason
        ))
    };
    let (name, rest) = from
        .rsplit_once('<')
        .ok_or_else(|| invalid("no address".to_string()))?;
    let address = rest
        .trim()
        .trim_end_matches('>')
        .trim()
        .parse::<Address>()
        .map_err(|e| invalid(e.to_string()))?;

    let name = name.trim().trim_matches('"').trim();
    let name = if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    };
    Ok(Mailbox::new(name, address))
}
