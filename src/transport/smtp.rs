//! SMTP transport backed by `lettre`.
//!
//! Connection handling, STARTTLS, authentication, and MIME encoding all
//! happen inside `lettre`; this adapter only maps a [`Message`] onto a
//! `lettre` message and maps failures back onto [`TransportError`].

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use secrecy::ExposeSecret;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::errors::{TransportError, TransportErrorKind};
use crate::transport::{Session, Transport};
use crate::types::{Message, TransportSettings};

type Mailer = AsyncSmtpTransport<Tokio1Executor>;

/// Transport that delivers through an SMTP relay.
#[derive(Debug, Clone, Default)]
pub struct SmtpTransport {
    timeout: Option<Duration>,
}

impl SmtpTransport {
    /// Creates a transport with `lettre`'s default connection timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection and command timeout used by each session.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn create_session(
        &self,
        settings: &TransportSettings,
    ) -> Result<Box<dyn Session>, TransportError> {
        let builder = if settings.use_encryption {
            Mailer::starttls_relay(&settings.host).map_err(map_smtp_error)?
        } else {
            Mailer::builder_dangerous(&settings.host)
        };

        let mut builder = builder.port(settings.port);
        if self.timeout.is_some() {
            builder = builder.timeout(self.timeout);
        }
        if let Some(credentials) = smtp_credentials(settings) {
            builder = builder.credentials(credentials);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(
            address = %settings.address(),
            encrypted = settings.use_encryption,
            "Opened SMTP session"
        );

        Ok(Box::new(SmtpSession {
            mailer: Some(builder.build()),
            address: settings.address(),
        }))
    }
}

/// Credentials for AUTH; none when no username is configured.
fn smtp_credentials(settings: &TransportSettings) -> Option<SmtpCredentials> {
    settings
        .credentials
        .as_ref()
        .filter(|credentials| !credentials.username.is_empty())
        .map(|credentials| {
            SmtpCredentials::new(
                credentials.username.clone(),
                credentials.password.expose_secret().clone(),
            )
        })
}

/// One-shot session over a dedicated `lettre` transport.
struct SmtpSession {
    mailer: Option<Mailer>,
    address: String,
}

impl fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSession")
            .field("address", &self.address)
            .field("released", &self.mailer.is_none())
            .finish()
    }
}

#[async_trait]
impl Session for SmtpSession {
    async fn transmit(&mut self, message: &Message) -> Result<String, TransportError> {
        let mailer = self
            .mailer
            .as_ref()
            .ok_or_else(|| TransportError::connection("Session already released"))?;

        let email = build_email(message).await?;
        let response = mailer.send(email).await.map_err(map_smtp_error)?;

        let text: Vec<String> = response.message().map(|line| line.to_string()).collect();
        Ok(format!("{} {}", response.code(), text.join(" ")))
    }

    async fn release(&mut self) {
        self.mailer.take();
    }
}

/// Maps a validated message onto a `lettre` message, reading attachments.
async fn build_email(message: &Message) -> Result<lettre::Message, TransportError> {
    let mut builder = lettre::Message::builder()
        .from(parse_mailbox(message.from())?)
        .subject(message.subject())
        .message_id(Some(format!("<{}>", message.message_id())));

    for address in message.to() {
        builder = builder.to(parse_mailbox(address)?);
    }
    for address in message.cc() {
        builder = builder.cc(parse_mailbox(address)?);
    }
    for address in message.bcc() {
        builder = builder.bcc(parse_mailbox(address)?);
    }

    let body = if message.is_html() {
        SinglePart::html(message.body().to_string())
    } else {
        SinglePart::plain(message.body().to_string())
    };

    let built = if message.has_attachments() {
        let mut parts = MultiPart::mixed().singlepart(body);
        for path in message.attachments() {
            parts = parts.singlepart(read_attachment(path).await?);
        }
        builder.multipart(parts)
    } else {
        builder.singlepart(body)
    };

    built.map_err(|e| {
        TransportError::invalid_message(format!("Cannot assemble message: {}", e)).with_cause(e)
    })
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address.parse::<Mailbox>().map_err(|e| {
        TransportError::invalid_message(format!("Invalid address '{}'", address)).with_cause(e)
    })
}

async fn read_attachment(path: &Path) -> Result<SinglePart, TransportError> {
    let data = tokio::fs::read(path).await.map_err(|e| {
        TransportError::attachment(format!("Cannot read attachment {}", path.display())).with_cause(e)
    })?;

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type = ContentType::parse(mime.as_ref()).map_err(|_| {
        TransportError::attachment(format!(
            "Unsupported content type {} for {}",
            mime,
            path.display()
        ))
    })?;

    Ok(Attachment::new(Message::attachment_name(path)).body(data, content_type))
}

/// Maps a `lettre` SMTP error onto a transport error, keeping it as the cause.
fn map_smtp_error(error: lettre::transport::smtp::Error) -> TransportError {
    let code = error
        .status()
        .and_then(|code| code.to_string().parse::<u16>().ok());

    let mapped = match code {
        Some(code) if error.is_transient() || error.is_permanent() => {
            TransportError::from_smtp_reply(code, error.to_string())
        }
        _ => {
            let kind = if error.is_timeout() {
                TransportErrorKind::Timeout
            } else if error.is_tls() {
                TransportErrorKind::Tls
            } else if error.is_client() {
                TransportErrorKind::InvalidMessage
            } else {
                TransportErrorKind::Connection
            };
            TransportError::new(kind, error.to_string())
        }
    };

    mapped.with_cause(error)
}
