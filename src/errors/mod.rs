//! Error types for mail dispatch.
//!
//! Three failure families reach the caller:
//! - [`MailError::Configuration`]: a required field was missing at validation time.
//! - [`MailError::Transport`]: the transport could not open a session or transmit.
//! - [`MailError::Batch`]: one or more members of a batch dispatch failed.
//!
//! Only transport failures are retryable.

use std::fmt;
use thiserror::Error;

/// Result type for dispatch operations.
pub type MailResult<T> = Result<T, MailError>;

/// Boxed underlying cause carried by a [`TransportError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Fields that must be set before a message can be dispatched.
///
/// Declaration order is the order in which validation checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequiredField {
    /// SMTP server host name.
    TransportHost,
    /// Sender address.
    From,
    /// At least one primary recipient.
    Recipients,
    /// Message subject.
    Subject,
    /// Message body.
    Body,
}

impl RequiredField {
    /// Returns the field name as used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            RequiredField::TransportHost => "transport host",
            RequiredField::From => "from address",
            RequiredField::Recipients => "recipients",
            RequiredField::Subject => "subject",
            RequiredField::Body => "body",
        }
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Could not reach or keep a connection to the server.
    Connection,
    /// TLS negotiation failed.
    Tls,
    /// The server rejected the credentials.
    Authentication,
    /// The server rejected the message with a transient (4xx) reply.
    TransientRejection,
    /// The server rejected the message with a permanent (5xx) reply.
    PermanentRejection,
    /// An attempt exceeded its deadline.
    Timeout,
    /// The message could not be turned into a transmittable form.
    InvalidMessage,
    /// An attachment could not be read.
    Attachment,
    /// Anything else, including a dispatch task that panicked.
    Unknown,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connection => write!(f, "Connection failed"),
            TransportErrorKind::Tls => write!(f, "TLS negotiation failed"),
            TransportErrorKind::Authentication => write!(f, "Authentication failed"),
            TransportErrorKind::TransientRejection => write!(f, "Transient rejection"),
            TransportErrorKind::PermanentRejection => write!(f, "Permanent rejection"),
            TransportErrorKind::Timeout => write!(f, "Timed out"),
            TransportErrorKind::InvalidMessage => write!(f, "Invalid message"),
            TransportErrorKind::Attachment => write!(f, "Attachment error"),
            TransportErrorKind::Unknown => write!(f, "Unknown transport error"),
        }
    }
}

/// Failure reported by the transport collaborator.
#[derive(Error, Debug)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    smtp_code: Option<u16>,
    #[source]
    cause: Option<BoxError>,
}

impl TransportError {
    /// Creates a new transport error.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if the server sent one.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the underlying cause, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connection, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    /// Creates an invalid-message error.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::InvalidMessage, message)
    }

    /// Creates an attachment error.
    pub fn attachment(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Attachment, message)
    }

    /// Creates an error from an SMTP reply.
    pub fn from_smtp_reply(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            530 | 534 | 535 => TransportErrorKind::Authentication,
            400..=499 => TransportErrorKind::TransientRejection,
            500..=599 => TransportErrorKind::PermanentRejection,
            _ => TransportErrorKind::Unknown,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        Ok(())
    }
}

/// A single failed member of a batch dispatch.
#[derive(Debug)]
pub struct BatchFailure {
    /// Zero-based position of the message in the submitted batch.
    pub index: usize,
    /// Why it failed.
    pub error: MailError,
}

/// Aggregate failure of a batch dispatch.
///
/// Produced only after every member has reached a terminal state.
#[derive(Error, Debug)]
pub struct BatchError {
    total: usize,
    failures: Vec<BatchFailure>,
}

impl BatchError {
    /// Creates a batch error. Failures are kept sorted by index.
    pub fn new(total: usize, mut failures: Vec<BatchFailure>) -> Self {
        failures.sort_by_key(|f| f.index);
        Self { total, failures }
    }

    /// Number of messages submitted in the batch.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The failed members, in input order.
    pub fn failures(&self) -> &[BatchFailure] {
        &self.failures
    }

    /// Consumes the error, returning the failed members.
    pub fn into_failures(self) -> Vec<BatchFailure> {
        self.failures
    }

    /// Indices of the messages that must be resent.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} messages failed", self.failures.len(), self.total)?;
        for failure in &self.failures {
            write!(f, "; [{}] {}", failure.index, failure.error)?;
        }
        Ok(())
    }
}

/// Top-level dispatch error.
#[derive(Error, Debug)]
pub enum MailError {
    /// A required field is missing.
    #[error("Invalid configuration: {field} is not set")]
    Configuration {
        /// The first missing field, in validation order.
        field: RequiredField,
    },

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// One or more batch members failed.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl MailError {
    /// Creates a configuration error for a missing field.
    pub fn missing(field: RequiredField) -> Self {
        MailError::Configuration { field }
    }

    /// Returns true if another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MailError::Transport(_))
    }

    /// Returns the missing field for configuration errors.
    pub fn missing_field(&self) -> Option<RequiredField> {
        match self {
            MailError::Configuration { field } => Some(*field),
            _ => None,
        }
    }

    /// Returns the transport error, if this is one.
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            MailError::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the batch error, if this is one.
    pub fn as_batch(&self) -> Option<&BatchError> {
        match self {
            MailError::Batch(e) => Some(e),
            _ => None,
        }
    }
}
