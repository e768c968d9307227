//! Tests for single-message dispatch.

use integrations_mail_dispatch::mocks::{test_message, MockTransport};
use integrations_mail_dispatch::{
    Dispatcher, MessageBuilder, RequiredField, RetryPolicy, TransportError, TransportErrorKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(elapsed >= expected, "elapsed {:?} < {:?}", elapsed, expected);
    assert!(
        elapsed < expected + Duration::from_millis(10),
        "elapsed {:?} > {:?}",
        elapsed,
        expected
    );
}

#[tokio::test]
async fn test_missing_fields_fail_without_opening_a_session() {
    let complete = || {
        MessageBuilder::new()
            .transport("smtp.example.com", 25, false)
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Subject")
            .text_body("Body")
    };
    let no_recipients = MessageBuilder::new()
        .transport("smtp.example.com", 25, false)
        .from("sender@example.com")
        .subject("Subject")
        .text_body("Body");

    let cases = vec![
        (complete().transport("", 25, false), RequiredField::TransportHost),
        (complete().from(""), RequiredField::From),
        (no_recipients, RequiredField::Recipients),
        (complete().subject(""), RequiredField::Subject),
        (complete().text_body(""), RequiredField::Body),
    ];

    let transport = MockTransport::new();
    let dispatcher = Dispatcher::new(transport.clone());

    for (builder, field) in cases {
        let err = dispatcher.send(builder).await.unwrap_err();
        assert_eq!(err.missing_field(), Some(field));
    }

    assert_eq!(transport.sessions_created(), 0);
    assert_eq!(transport.transmit_calls(), 0);
}

#[tokio::test]
async fn test_valid_message_is_transmitted_exactly_once() {
    let transport = MockTransport::new();
    let dispatcher = Dispatcher::new(transport.clone());

    let result = test_message()
        .cc("copy@example.com")
        .send(&dispatcher)
        .await
        .unwrap();

    assert_eq!(result.attempts, 1);
    assert_eq!(transport.transmit_calls(), 1);

    let sent = transport.transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject(), "Test Subject");
    assert_eq!(sent[0].cc(), ["copy@example.com"]);
    assert_eq!(sent[0].settings().address(), "smtp.example.com:587");
}

#[tokio::test]
async fn test_send_fails_when_transport_fails() {
    let transport = MockTransport::new();
    transport.queue_error(TransportError::from_smtp_reply(550, "No such user"));
    let dispatcher = Dispatcher::new(transport.clone());

    let err = dispatcher.send(test_message()).await.unwrap_err();
    let transport_err = err.as_transport().unwrap();

    assert_eq!(transport_err.kind(), TransportErrorKind::PermanentRejection);
    assert_eq!(transport_err.smtp_code(), Some(550));
    assert_eq!(transport.transmit_calls(), 1);
    assert_eq!(transport.sessions_released(), 1);
}

#[tokio::test]
async fn test_session_creation_failure_is_transport_error() {
    let transport = MockTransport::new();
    transport.fail_next_session(TransportError::connection("Connection refused"));
    let dispatcher = Dispatcher::new(transport.clone());

    let err = dispatcher.send(test_message()).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(transport.transmit_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_on_third_attempt() {
    let transport = MockTransport::new();
    transport
        .queue_error(TransportError::connection("Connection reset"))
        .queue_error(TransportError::from_smtp_reply(451, "Local error"))
        .queue_ok("250 OK");
    let dispatcher = Dispatcher::new(transport.clone());
    let policy = RetryPolicy::new(3, Duration::from_millis(500));

    let start = Instant::now();
    let result = dispatcher.send_with_retry(test_message(), &policy).await.unwrap();

    assert_eq!(result.attempts, 3);
    assert_eq!(transport.transmit_calls(), 3);
    assert_elapsed(start, Duration::from_millis(1000));
    assert_eq!(dispatcher.metrics().snapshot().retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_returns_last_error() {
    let transport = MockTransport::new();
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    transport.fail_when(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Some(TransportError::connection(format!("attempt {} refused", n)))
    });

    let dispatcher = Dispatcher::new(transport.clone());
    let policy = RetryPolicy::new(4, Duration::from_millis(250));

    let start = Instant::now();
    let err = test_message()
        .send_with_retry(&dispatcher, &policy)
        .await
        .unwrap_err();

    assert_eq!(err.as_transport().unwrap().message(), "attempt 4 refused");
    assert_eq!(transport.transmit_calls(), 4);
    assert_elapsed(start, Duration::from_millis(750));
}

#[tokio::test(start_paused = true)]
async fn test_configuration_error_is_never_retried() {
    let transport = MockTransport::new();
    let dispatcher = Dispatcher::new(transport.clone());
    let policy = RetryPolicy::new(5, Duration::from_secs(3));

    let start = Instant::now();
    let err = dispatcher
        .send_with_retry(test_message().subject(""), &policy)
        .await
        .unwrap_err();

    assert_eq!(err.missing_field(), Some(RequiredField::Subject));
    assert_eq!(transport.sessions_created(), 0);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_session_per_attempt_and_all_released() {
    let transport = MockTransport::new();
    transport.always_fail();
    let dispatcher = Dispatcher::new(transport.clone());

    let _ = dispatcher
        .send_with_retry(test_message(), &RetryPolicy::new(3, Duration::from_millis(10)))
        .await;

    assert_eq!(transport.sessions_created(), 3);
    assert_eq!(transport.sessions_released(), 3);

    transport.clear();
    dispatcher.send(test_message()).await.unwrap();
    assert_eq!(transport.sessions_created(), 1);
    assert_eq!(transport.sessions_released(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_releases_abandoned_session() {
    let transport = MockTransport::new();
    transport.set_latency(Duration::from_secs(60));
    let dispatcher = Dispatcher::new(transport.clone());
    let policy = RetryPolicy::new(2, Duration::from_millis(100))
        .attempt_timeout(Duration::from_secs(1));

    let err = dispatcher
        .send_with_retry(test_message(), &policy)
        .await
        .unwrap_err();

    assert_eq!(err.as_transport().unwrap().kind(), TransportErrorKind::Timeout);
    assert_eq!(transport.sessions_created(), 2);
    assert_eq!(transport.sessions_released(), 2);
}

#[test]
fn test_send_blocking_from_synchronous_code() {
    let transport = MockTransport::new();
    transport.queue_ok("250 2.0.0 Accepted");
    let dispatcher = Dispatcher::new(transport.clone());

    let result = dispatcher.send_blocking(test_message()).unwrap();

    assert_eq!(result.response, "250 2.0.0 Accepted");
    assert_eq!(transport.transmit_calls(), 1);
}

#[test]
fn test_send_blocking_validates_first() {
    let transport = MockTransport::new();
    let dispatcher = Dispatcher::new(transport.clone());

    let err = dispatcher
        .send_blocking(test_message().transport("", 25, false))
        .unwrap_err();

    assert_eq!(err.missing_field(), Some(RequiredField::TransportHost));
    assert_eq!(transport.sessions_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_session_released_before_retry_wait() {
    let transport = MockTransport::new();
    let observed: Arc<std::sync::Mutex<Vec<(usize, usize)>>> = Arc::default();
    let recorder = observed.clone();
    let counters = transport.clone();
    transport.fail_when(move |_| {
        recorder
            .lock()
            .unwrap()
            .push((counters.sessions_created(), counters.sessions_released()));
        Some(TransportError::connection("Connection reset"))
    });
    let dispatcher = Dispatcher::new(transport.clone());
    let policy = RetryPolicy::new(3, Duration::from_secs(10));

    let task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.send_with_retry(test_message(), &policy).await }
    });

    // Midway through the first wait: one session opened, already released.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.sessions_created(), 1);
    assert_eq!(transport.sessions_released(), 1);

    assert!(task.await.unwrap().is_err());

    // Attempt k sees k sessions opened and k - 1 released.
    assert_eq!(*observed.lock().unwrap(), vec![(1, 0), (2, 1), (3, 2)]);
    transport.clear();
}
