//! # Mail Dispatch Integration Library
//!
//! Fluent construction and dispatch of e-mail messages through an SMTP
//! transport, with:
//! - Up-front validation of required fields, never retried
//! - A fresh transport session per attempt, always released
//! - Retry with fixed or exponential delay for transport failures
//! - Concurrent batch dispatch with per-member failure reporting
//! - Configuration from key/value sources, JSON, or the environment
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_mail_dispatch::{Dispatcher, MessageBuilder, RetryPolicy, SmtpTransport};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new(SmtpTransport::new());
//!
//!     let result = MessageBuilder::new()
//!         .transport("smtp.example.com", 587, true)
//!         .credentials("user@example.com", "password")
//!         .from("sender@example.com")
//!         .to("recipient@example.com")
//!         .subject("Hello from Rust!")
//!         .text_body("This is a test email.")
//!         .send_with_retry(&dispatcher, &RetryPolicy::new(3, Duration::from_secs(3)))
//!         .await?;
//!
//!     println!("Message sent with ID: {}", result.message_id);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Transport layer
pub mod transport;

// Resilience
pub mod resilience;

// Observability
pub mod observability;

// Dispatch
pub mod dispatch;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use config::{
    ConfigError, ConfigSource, ConfigSourceExt, DispatchConfig, EnvConfigSource,
    JsonConfigSource, MailDefaults, MemoryConfigSource, RetryPolicy,
};
pub use dispatch::{Dispatcher, DispatcherBuilder};
pub use errors::{
    BatchError, BatchFailure, MailError, MailResult, RequiredField, TransportError,
    TransportErrorKind,
};
pub use observability::{DispatchMetrics, MetricsSnapshot};
pub use resilience::RetryExecutor;
pub use transport::{Session, SmtpTransport, Transport};
pub use types::{Credentials, Message, MessageBuilder, SendResult, TransportSettings};
