//! Batch Dispatch Example
//!
//! Sends a personalised message to several recipients concurrently, at most
//! four at a time, and reports which ones need to be resent.

use integrations_mail_dispatch::{
    DispatchConfig, Dispatcher, EnvConfigSource, MailDefaults, MailError, MessageBuilder,
    SmtpTransport,
};

const SETTINGS: &str = r#"{
    "max_concurrency": 4,
    "retry": { "max_attempts": 3, "delay": "2s", "multiplier": 2.0, "max_delay": "10s" }
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "integrations_mail_dispatch=info".into()),
        )
        .init();

    let defaults = MailDefaults::from_source(&EnvConfigSource::new("MAIL_"))?;
    let config = DispatchConfig::from_json_str(SETTINGS)?;
    let dispatcher = Dispatcher::from_config(SmtpTransport::new(), &config);

    let recipients = [
        ("Ada", "ada@example.com"),
        ("Grace", "grace@example.com"),
        ("Linus", "linus@example.com"),
        ("Barbara", "barbara@example.com"),
        ("Ken", "ken@example.com"),
    ];

    let batch: Vec<MessageBuilder> = recipients
        .iter()
        .map(|(name, address)| {
            MessageBuilder::with_defaults(&defaults)
                .to(*address)
                .subject(format!("Welcome aboard, {}", name))
                .html_body(format!("<p>Hi {},</p><p>Your account is ready.</p>", name))
        })
        .collect();

    match dispatcher.send_batch_with_default_retry(batch).await {
        Ok(results) => {
            for result in results {
                println!("{} sent after {} attempt(s)", result.message_id, result.attempts);
            }
        }
        Err(MailError::Batch(batch)) => {
            eprintln!("{} of {} messages failed:", batch.failures().len(), batch.total());
            for failure in batch.failures() {
                eprintln!("  {} -> {}", recipients[failure.index].1, failure.error);
            }
        }
        Err(e) => return Err(e.into()),
    }

    let metrics = dispatcher.metrics().snapshot();
    println!(
        "Sent {}, failed {}, retries {}",
        metrics.messages_sent, metrics.messages_failed, metrics.retries
    );

    Ok(())
}
