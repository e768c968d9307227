//! Core types for mail dispatch.
//!
//! This module provides:
//! - [`MessageBuilder`], the fluent description of a message before dispatch
//! - [`Message`], the validated, read-only form handed to a transport
//! - Transport settings, credentials, and send results

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::config::MailDefaults;
use crate::errors::{MailError, MailResult, RequiredField};

/// SMTP credentials.
#[derive(Clone)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Where and how a message is transmitted.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Negotiate an encrypted connection.
    pub use_encryption: bool,
    /// Optional credentials.
    pub credentials: Option<Credentials>,
}

impl TransportSettings {
    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Fluent description of a message being composed.
///
/// Every setter consumes and returns the builder, so calls chain in any
/// order. Recipient and attachment setters append; `subject` and `body`
/// replace the previous value. Nothing is checked until dispatch.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    settings: TransportSettings,
    from: String,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    subject: String,
    body: String,
    is_html: bool,
    attachments: Vec<PathBuf>,
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::with_defaults(&MailDefaults::default())
    }
}

impl MessageBuilder {
    /// Creates an empty builder using the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder pre-populated with transport and sender defaults.
    pub fn with_defaults(defaults: &MailDefaults) -> Self {
        Self {
            settings: TransportSettings {
                host: defaults.host.clone(),
                port: defaults.port,
                use_encryption: defaults.use_encryption,
                credentials: defaults.credentials.clone(),
            },
            from: defaults.from.clone(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            body: String::new(),
            is_html: false,
            attachments: Vec::new(),
        }
    }

    /// Sets the SMTP server.
    pub fn transport(mut self, host: impl Into<String>, port: u16, use_encryption: bool) -> Self {
        self.settings.host = host.into();
        self.settings.port = port;
        self.settings.use_encryption = use_encryption;
        self
    }

    /// Sets SMTP credentials. An empty username clears them.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let username = username.into();
        self.settings.credentials = if username.is_empty() {
            None
        } else {
            Some(Credentials::new(username, password))
        };
        self
    }

    /// Sets the sender address.
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = address.into();
        self
    }

    /// Adds a primary recipient.
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Adds multiple primary recipients.
    pub fn to_many<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Adds a CC recipient.
    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    /// Adds multiple CC recipients.
    pub fn cc_many<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cc.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Adds a BCC recipient.
    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    /// Adds multiple BCC recipients.
    pub fn bcc_many<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bcc.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the body and whether it is HTML.
    pub fn body(mut self, body: impl Into<String>, is_html: bool) -> Self {
        self.body = body.into();
        self.is_html = is_html;
        self
    }

    /// Sets a plain text body.
    pub fn text_body(self, body: impl Into<String>) -> Self {
        self.body(body, false)
    }

    /// Sets an HTML body.
    pub fn html_body(self, body: impl Into<String>) -> Self {
        self.body(body, true)
    }

    /// Adds a file attachment. The file is read at transmission time.
    pub fn attach(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    /// Adds multiple file attachments.
    pub fn attach_many<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.attachments.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Checks required fields and freezes the description.
    ///
    /// Fields are checked in a fixed order: transport host, sender,
    /// recipients, subject, body. The first missing one is reported.
    pub(crate) fn validate(self) -> MailResult<Message> {
        if self.settings.host.is_empty() {
            return Err(MailError::missing(RequiredField::TransportHost));
        }
        if self.from.is_empty() {
            return Err(MailError::missing(RequiredField::From));
        }
        if self.to.is_empty() {
            return Err(MailError::missing(RequiredField::Recipients));
        }
        if self.subject.is_empty() {
            return Err(MailError::missing(RequiredField::Subject));
        }
        if self.body.is_empty() {
            return Err(MailError::missing(RequiredField::Body));
        }

        let message_id = generate_message_id(&self.from);

        Ok(Message {
            settings: self.settings,
            from: self.from,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            subject: self.subject,
            body: self.body,
            is_html: self.is_html,
            attachments: self.attachments,
            message_id,
        })
    }
}

/// Generates a message ID of the form `uuid.timestamp@domain`.
fn generate_message_id(from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('>').trim())
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost");
    let uuid = uuid::Uuid::new_v4();
    format!("{}.{}@{}", uuid, chrono::Utc::now().timestamp(), domain)
}

/// A validated message, read-only from here on.
#[derive(Debug, Clone)]
pub struct Message {
    settings: TransportSettings,
    from: String,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    subject: String,
    body: String,
    is_html: bool,
    attachments: Vec<PathBuf>,
    message_id: String,
}

impl Message {
    /// Transport settings for this message.
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Sender address.
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Primary recipients, in the order added.
    pub fn to(&self) -> &[String] {
        &self.to
    }

    /// CC recipients.
    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    /// BCC recipients.
    pub fn bcc(&self) -> &[String] {
        &self.bcc
    }

    /// Subject line.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Body text.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// True if the body is HTML.
    pub fn is_html(&self) -> bool {
        self.is_html
    }

    /// Attachment paths.
    pub fn attachments(&self) -> &[PathBuf] {
        &self.attachments
    }

    /// Client-generated message ID.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Returns all recipients (to + cc + bcc).
    pub fn all_recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .map(String::as_str)
    }

    /// Returns the count of all recipients.
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Returns true if the message has attachments.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// File name used for an attachment path.
    pub fn attachment_name(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string())
    }
}

/// Result of dispatching one message.
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Client-generated message ID.
    pub message_id: String,
    /// Server reply reported by the transport.
    pub response: String,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Time from first attempt to completion.
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn complete() -> MessageBuilder {
        MessageBuilder::new()
            .transport("smtp.example.com", 587, true)
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Test")
            .body("Hello!", false)
    }

    #[test]
    fn test_builder_produces_message() {
        let message = complete()
            .credentials("user", "secret")
            .cc("cc@example.com")
            .bcc("bcc@example.com")
            .attach("/tmp/report.pdf")
            .validate()
            .unwrap();

        assert_eq!(message.settings().address(), "smtp.example.com:587");
        assert!(message.settings().use_encryption);
        let creds = message.settings().credentials.as_ref().unwrap();
        assert_eq!(creds.username, "user");
        assert_eq!(creds.password.expose_secret(), "secret");
        assert_eq!(message.from(), "sender@example.com");
        assert_eq!(message.recipient_count(), 3);
        assert_eq!(
            message.all_recipients().collect::<Vec<_>>(),
            vec!["recipient@example.com", "cc@example.com", "bcc@example.com"]
        );
        assert!(message.has_attachments());
        assert!(message.message_id().ends_with("@example.com"));
    }

    #[test]
    fn test_recipients_append_and_keep_duplicates() {
        let message = complete()
            .to("recipient@example.com")
            .to_many(["a@example.com", "b@example.com"])
            .cc_many(vec!["c@example.com".to_string()])
            .bcc_many(["d@example.com", "d@example.com"])
            .attach_many(["one.txt", "two.txt"])
            .validate()
            .unwrap();

        assert_eq!(
            message.to(),
            ["recipient@example.com", "recipient@example.com", "a@example.com", "b@example.com"]
        );
        assert_eq!(message.cc(), ["c@example.com"]);
        assert_eq!(message.bcc().len(), 2);
        assert_eq!(message.attachments().len(), 2);
    }

    #[test]
    fn test_subject_and_body_are_replaced() {
        let message = complete()
            .subject("First")
            .subject("Second")
            .html_body("<p>first</p>")
            .text_body("plain")
            .validate()
            .unwrap();

        assert_eq!(message.subject(), "Second");
        assert_eq!(message.body(), "plain");
        assert!(!message.is_html());

        let message = complete().body("<h1>Hi</h1>", true).validate().unwrap();
        assert!(message.is_html());
    }

    #[test]
    fn test_validation_reports_first_missing_field() {
        let cases = [
            (complete().transport("", 25, false), RequiredField::TransportHost),
            (complete().from(""), RequiredField::From),
            (
                MessageBuilder::new()
                    .transport("smtp.example.com", 25, false)
                    .from("sender@example.com")
                    .subject("Test")
                    .text_body("Hello"),
                RequiredField::Recipients,
            ),
            (complete().subject(""), RequiredField::Subject),
            (complete().text_body(""), RequiredField::Body),
        ];

        for (builder, expected) in cases {
            let err = builder.validate().unwrap_err();
            assert_eq!(err.missing_field(), Some(expected));
        }

        // Everything missing: the host is reported first.
        let err = MessageBuilder::new().validate().unwrap_err();
        assert_eq!(err.missing_field(), Some(RequiredField::TransportHost));
    }

    #[test]
    fn test_with_defaults() {
        let defaults = MailDefaults {
            host: "relay.example.com".to_string(),
            port: 2525,
            use_encryption: true,
            credentials: Some(Credentials::new("relay", "pw")),
            from: "no-reply@example.com".to_string(),
        };

        let message = MessageBuilder::with_defaults(&defaults)
            .to("someone@example.com")
            .subject("Hi")
            .text_body("Body")
            .validate()
            .unwrap();

        assert_eq!(message.settings().host, "relay.example.com");
        assert_eq!(message.settings().port, 2525);
        assert_eq!(message.from(), "no-reply@example.com");
        assert!(message.settings().credentials.is_some());
    }

    #[test]
    fn test_message_id_domain_fallback() {
        assert!(generate_message_id("no-domain").ends_with("@localhost"));
        assert!(generate_message_id("Name <me@mail.example.org>").ends_with("@mail.example.org"));
    }

    #[test]
    fn test_empty_username_clears_credentials() {
        let message = complete()
            .credentials("user", "secret")
            .credentials("", "")
            .validate()
            .unwrap();
        assert!(message.settings().credentials.is_none());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let debug = format!("{:?}", Credentials::new("user", "hunter2"));
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }
}
