//! Transport layer.
//!
//! The dispatcher never speaks SMTP itself. It asks a [`Transport`] for a
//! fresh [`Session`] per attempt, transmits through it, and releases it
//! whatever the outcome.

use async_trait::async_trait;
use std::fmt;

use crate::errors::TransportError;
use crate::types::{Message, TransportSettings};

pub mod smtp;

pub use smtp::SmtpTransport;

/// Factory for transmission sessions.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Opens a session to the server described by `settings`.
    async fn create_session(
        &self,
        settings: &TransportSettings,
    ) -> Result<Box<dyn Session>, TransportError>;
}

/// A transport handle scoped to one transmission attempt.
///
/// Implementations must also free their resources on drop, so an attempt
/// abandoned by a timeout or a panic does not leak a connection.
#[async_trait]
pub trait Session: Send + fmt::Debug {
    /// Transmits a message, returning the server's reply on success.
    async fn transmit(&mut self, message: &Message) -> Result<String, TransportError>;

    /// Releases the session.
    async fn release(&mut self);
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn create_session(
        &self,
        settings: &TransportSettings,
    ) -> Result<Box<dyn Session>, TransportError> {
        (**self).create_session(settings).await
    }
}

/// Runs one attempt: open a session, transmit, release.
///
/// The session is released on both success and failure before this returns.
pub async fn transmit_once<T: Transport + ?Sized>(
    transport: &T,
    message: &Message,
) -> Result<String, TransportError> {
    let mut session = transport.create_session(message.settings()).await?;
    let result = session.transmit(message).await;
    session.release().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{test_message, MockTransport};
    use std::sync::Arc;

    #[test]
    fn test_transmit_once_releases_on_failure() {
        let transport = MockTransport::new();
        transport.queue_error(TransportError::from_smtp_reply(452, "Insufficient storage"));
        let message = test_message().validate().unwrap();

        let err = tokio_test::block_on(transmit_once(&transport, &message)).unwrap_err();

        assert_eq!(err.smtp_code(), Some(452));
        assert_eq!(transport.sessions_created(), 1);
        assert_eq!(transport.sessions_released(), 1);
    }

    #[test]
    fn test_shared_transport() {
        let transport = MockTransport::new();
        let shared: Arc<MockTransport> = Arc::new(transport.clone());
        let message = test_message().validate().unwrap();

        let reply = tokio_test::block_on(transmit_once(&shared, &message)).unwrap();

        assert_eq!(reply, "250 OK");
        assert_eq!(transport.transmit_calls(), 1);
    }
}
