//! Basic Mail Dispatch Example
//!
//! Demonstrates how to:
//! - Load transport defaults from the environment (`MAIL_SMTP_HOST`, ...)
//! - Describe a message with the fluent builder
//! - Send it with retry and inspect the result
//!
//! Run with `MAIL_SMTP_HOST=localhost MAIL_SMTP_PORT=1025 cargo run --example basic_send`.

use integrations_mail_dispatch::{
    Dispatcher, EnvConfigSource, MailDefaults, MailError, MessageBuilder, RetryPolicy,
    SmtpTransport,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "integrations_mail_dispatch=debug".into()),
        )
        .init();

    let defaults = MailDefaults::from_source(&EnvConfigSource::new("MAIL_"))?;
    let dispatcher = Dispatcher::new(SmtpTransport::new().with_timeout(Duration::from_secs(30)));
    let policy = RetryPolicy::new(3, Duration::from_secs(3));

    println!("Sending through {}:{}...", defaults.host, defaults.port);

    let result = MessageBuilder::with_defaults(&defaults)
        .from(if defaults.from.is_empty() { "sender@example.com" } else { defaults.from.as_str() })
        .to("recipient@example.com")
        .subject("Hello from Rust!")
        .text_body("This is a simple text email.\n\nBest regards,\nThe Mail Bot")
        .send_with_retry(&dispatcher, &policy)
        .await;

    match result {
        Ok(sent) => {
            println!("Email sent successfully!");
            println!("  Message ID: {}", sent.message_id);
            println!("  Server reply: {}", sent.response);
            println!("  Attempts: {}", sent.attempts);
        }
        Err(MailError::Configuration { field }) => {
            eprintln!("Message incomplete: {} is not set", field);
        }
        Err(e) => {
            eprintln!("Failed to send email: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
