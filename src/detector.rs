//! Decides whether a message already belongs to a reply thread

use crate::models::Message;

/// Header whose presence marks a message as part of a reply thread
pub const IN_REPLY_TO: &str = "In-Reply-To";

/// Returns true iff the message carries an `In-Reply-To` header.
///
/// A message with no headers is treated as not replied.
pub fn has_replied(message: &Message) -> bool {
    message.has_header(IN_REPLY_TO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Header;

    fn message(headers: Vec<Header>) -> Message {
        Message {
            id: "m1".to_string(),
            headers,
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_message_is_not_replied() {
        let msg = message(vec![Header::new("From", "a@x.com"), Header::new("Subject", "Hi")]);
        assert!(!has_replied(&msg));
    }

    #[test]
    fn test_in_reply_to_marks_replied() {
        let msg = message(vec![
            Header::new("From", "a@x.com"),
            Header::new("In-Reply-To", "<id@x.com>"),
        ]);
        assert!(has_replied(&msg));
    }

    #[test]
    fn test_header_name_case_is_ignored() {
        let msg = message(vec![Header::new("in-reply-to", "<id@x.com>")]);
        assert!(has_replied(&msg));
    }

    #[test]
    fn test_no_headers_is_not_replied() {
        assert!(!has_replied(&message(Vec::new())));
    }

    #[test]
    fn test_references_alone_is_not_replied() {
        let msg = message(vec![Header::new("References", "<id@x.com>")]);
        assert!(!has_replied(&msg));
    }
}
