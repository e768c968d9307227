//! Tests for configuration sources and message defaults.

use integrations_mail_dispatch::mocks::MockTransport;
use integrations_mail_dispatch::{
    ConfigError, ConfigSource, ConfigSourceExt, Dispatcher, EnvConfigSource, JsonConfigSource, MailDefaults,
    MemoryConfigSource, MessageBuilder, RequiredField,
};
use secrecy::ExposeSecret;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_json_file_source() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "SmtpHost": "smtp.example.com",
            "SmtpPort": 587,
            "EnableSsl": true,
            "Username": "mailer",
            "Password": "s3cret",
            "FromEmail": "no-reply@example.com",
            "RetryDelay": "2s"
        }}"#
    )
    .unwrap();

    let source = JsonConfigSource::from_path(file.path()).unwrap();
    assert_eq!(source.get_typed::<u16>("SmtpPort").unwrap(), 587);
    assert_eq!(source.get_duration("RetryDelay").unwrap(), Duration::from_secs(2));

    let defaults = MailDefaults::from_source(&source).unwrap();
    assert_eq!(defaults.host, "smtp.example.com");
    assert_eq!(defaults.port, 587);
    assert!(defaults.use_encryption);
    assert_eq!(defaults.from, "no-reply@example.com");
    let credentials = defaults.credentials.unwrap();
    assert_eq!(credentials.username, "mailer");
    assert_eq!(credentials.password.expose_secret(), "s3cret");
}

#[test]
fn test_missing_json_file_is_io_error() {
    let err = JsonConfigSource::from_path("/definitely/not/here.json").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_env_source() {
    std::env::set_var("MAILTEST_SMTP_HOST", "env.example.com");
    std::env::set_var("MAILTEST_SMTP_PORT", "2525");
    std::env::set_var("MAILTEST_ENABLE_SSL", "yes");

    let source = EnvConfigSource::new("MAILTEST_");
    let defaults = MailDefaults::from_source(&source).unwrap();

    assert_eq!(defaults.host, "env.example.com");
    assert_eq!(defaults.port, 2525);
    assert!(defaults.use_encryption);
    assert!(defaults.credentials.is_none());
    assert!(source.get_string("FromEmail").unwrap_err().is_not_found());
}

#[test]
fn test_unconvertible_port_is_reported() {
    let source = MemoryConfigSource::new().with("SmtpPort", "submission");

    match MailDefaults::from_source(&source).unwrap_err() {
        ConfigError::Conversion { key, value, .. } => {
            assert_eq!(key, "SmtpPort");
            assert_eq!(value, "submission");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(source.get_or("SmtpPort", 25u16), 25);
}

#[tokio::test]
async fn test_defaults_flow_into_dispatch() {
    let source: MemoryConfigSource = [
        ("SmtpHost", "relay.example.com"),
        ("SmtpPort", "465"),
        ("FromEmail", "reports@example.com"),
    ]
    .into_iter()
    .collect();
    let defaults = MailDefaults::from_source(&source).unwrap();

    let transport = MockTransport::new();
    let dispatcher = Dispatcher::new(transport.clone());

    MessageBuilder::with_defaults(&defaults)
        .to("team@example.com")
        .subject("Weekly report")
        .text_body("All green.")
        .send(&dispatcher)
        .await
        .unwrap();

    let sent = &transport.transmitted()[0];
    assert_eq!(sent.settings().address(), "relay.example.com:465");
    assert_eq!(sent.from(), "reports@example.com");

    // Without a configured host the message is rejected up front.
    let err = MessageBuilder::with_defaults(&MailDefaults::default())
        .from("reports@example.com")
        .to("team@example.com")
        .subject("Weekly report")
        .text_body("All green.")
        .send(&dispatcher)
        .await
        .unwrap_err();
    assert_eq!(err.missing_field(), Some(RequiredField::TransportHost));
}
