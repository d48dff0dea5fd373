//! Mailbox access: the `Mailbox` session trait, its connector, and the
//! helpers that turn raw RFC 822 mail into `Message`s.

pub mod imap;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::SecretString;

use crate::error::MailboxError;
use crate::pipeline::types::{Candidate, Message, TimeWindow};

pub use imap::{ImapConfig, ImapConnector, ImapMailbox};

/// Subject used when a message carries none.
pub const NO_SUBJECT: &str = "(No Subject)";

/// An authenticated session on one candidate's mailbox.
///
/// Message ids must be stable and unique per mailbox across calls.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Messages received within `window`.
    async fn list_messages(&self, window: &TimeWindow) -> Result<Vec<Message>, MailboxError>;

    /// Attach `label` to a message.
    async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), MailboxError>;

    /// Store an unsent reply in the drafts folder.
    async fn create_draft(&self, to: &str, subject: &str, body: &str)
    -> Result<(), MailboxError>;

    /// End the session. Errors are logged, not returned.
    async fn close(&self) {}
}

/// Opens `Mailbox` sessions for candidates.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, candidate: &Candidate) -> Result<Box<dyn Mailbox>, MailboxError>;
}

// ── Credentials ─────────────────────────────────────────────────────

/// Resolve a credential reference to a secret.
///
/// `env:NAME` reads the environment variable `NAME`; anything else is the
/// secret itself. Non-ASCII characters are dropped either way, since
/// copied app passwords often carry non-breaking spaces.
pub fn resolve_credential(reference: &str) -> Result<SecretString, MailboxError> {
    let raw = match reference.strip_prefix("env:") {
        Some(name) => std::env::var(name.trim()).map_err(|e| MailboxError::Credential {
            reference: reference.to_string(),
            reason: e.to_string(),
        })?,
        None => reference.to_string(),
    };

    let sanitized = sanitize_secret(&raw);
    if sanitized.is_empty() {
        return Err(MailboxError::Credential {
            reference: redact(reference),
            reason: "credential is empty".into(),
        });
    }
    Ok(SecretString::from(sanitized))
}

fn sanitize_secret(raw: &str) -> String {
    raw.chars().filter(char::is_ascii).collect::<String>().trim().to_string()
}

/// Literal secrets must not leak into error messages.
fn redact(reference: &str) -> String {
    if reference.starts_with("env:") {
        reference.to_string()
    } else {
        "<literal>".to_string()
    }
}

// ── Message parsing ─────────────────────────────────────────────────

/// Parse a raw RFC 822 message into a `Message` with the given id.
pub fn parse_message(id: &str, raw: &[u8]) -> Option<Message> {
    let parsed = MessageParser::default().parse(raw)?;

    let subject = parsed
        .subject()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SUBJECT)
        .to_string();
    let date = parsed.date().map(|d| d.to_rfc822()).unwrap_or_default();

    Some(Message {
        id: id.to_string(),
        subject,
        sender: extract_sender(&parsed),
        date,
        body: extract_text(&parsed),
    })
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Extract readable text from a parsed email.
///
/// Plain text wins over HTML. Returns an empty string when nothing is
/// readable.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0)
        && !text.trim().is_empty()
    {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.trim().to_string();
        }
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn strip_html_removes_tags_and_collapses_whitespace() {
        let html = "<p>Hello<br>there</p>\n\n<b>Interview</b>   on Monday";
        assert_eq!(strip_html(html), "Hello there Interview on Monday");
    }

    #[test]
    fn literal_credentials_drop_non_ascii() {
        let secret = resolve_credential("abcd\u{a0}efgh ijkl").unwrap();
        assert_eq!(secret.expose_secret(), "abcdefgh ijkl");
    }

    #[test]
    fn empty_credential_is_rejected_without_echo() {
        let err = resolve_credential("\u{a0}\u{a0}").unwrap_err();
        assert!(!err.to_string().contains('\u{a0}'));
    }

    #[test]
    fn missing_env_credential_is_an_error() {
        let err = resolve_credential("env:JOB_TRIAGE_TEST_SURELY_UNSET").unwrap_err();
        assert!(matches!(err, MailboxError::Credential { .. }));
    }

    #[test]
    fn parses_plain_text_message() {
        let raw = b"From: Recruiter <hr@acme.com>\r\n\
                    To: ada@example.com\r\n\
                    Subject: Interview invitation\r\n\
                    Date: Tue, 14 May 2024 09:30:00 +0000\r\n\
                    Content-Type: text/plain; charset=utf-8\r\n\
                    \r\n\
                    We would like to schedule an interview for next week.\r\n";
        let msg = parse_message("42", raw).unwrap();
        assert_eq!(msg.id, "42");
        assert_eq!(msg.sender, "hr@acme.com");
        assert_eq!(msg.subject, "Interview invitation");
        assert_eq!(msg.body, "We would like to schedule an interview for next week.");
        assert!(msg.received_at().is_some());
    }

    #[test]
    fn missing_subject_gets_placeholder() {
        let raw = b"From: hr@acme.com\r\n\r\nhello\r\n";
        let msg = parse_message("7", raw).unwrap();
        assert_eq!(msg.subject, NO_SUBJECT);
        assert!(msg.date.is_empty());
    }

    #[test]
    fn html_only_message_is_stripped() {
        let raw = b"From: hr@acme.com\r\n\
                    Subject: Offer\r\n\
                    Content-Type: text/html; charset=utf-8\r\n\
                    \r\n\
                    <html><body><p>We are pleased to offer</p></body></html>\r\n";
        let msg = parse_message("8", raw).unwrap();
        assert!(msg.body.contains("We are pleased to offer"));
        assert!(!msg.body.contains('<'));
    }
}
