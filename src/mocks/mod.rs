//! Mock implementations for testing.
//!
//! [`MockTransport`] records every session it hands out and every message
//! transmitted through it, and can be scripted to fail or to take time.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::TransportError;
use crate::transport::{Session, Transport};
use crate::types::{Message, MessageBuilder, TransportSettings};

type FailurePredicate = Arc<dyn Fn(&Message) -> Option<TransportError> + Send + Sync>;

#[derive(Default)]
struct MockState {
    outcomes: Mutex<VecDeque<Result<String, TransportError>>>,
    session_failures: Mutex<VecDeque<TransportError>>,
    fail_when: Mutex<Option<FailurePredicate>>,
    latency: Mutex<Option<Duration>>,
    transmitted: Mutex<Vec<Message>>,
    transmit_calls: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_released: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Mock transport for testing.
///
/// Clones share state, so a test can keep a handle while the dispatcher
/// owns another. Transmissions succeed with `250 OK` unless an outcome was
/// queued or a failure predicate matches.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply for the next transmission.
    pub fn queue_ok(&self, reply: impl Into<String>) -> &Self {
        self.state.outcomes.lock().unwrap().push_back(Ok(reply.into()));
        self
    }

    /// Queues a failure for the next transmission.
    pub fn queue_error(&self, error: TransportError) -> &Self {
        self.state.outcomes.lock().unwrap().push_back(Err(error));
        self
    }

    /// Makes the next session creation fail.
    pub fn fail_next_session(&self, error: TransportError) -> &Self {
        self.state.session_failures.lock().unwrap().push_back(error);
        self
    }

    /// Fails every transmission for which `predicate` returns an error.
    pub fn fail_when<F>(&self, predicate: F) -> &Self
    where
        F: Fn(&Message) -> Option<TransportError> + Send + Sync + 'static,
    {
        *self.state.fail_when.lock().unwrap() = Some(Arc::new(predicate));
        self
    }

    /// Fails every transmission whose subject equals `subject`.
    pub fn fail_subject(&self, subject: impl Into<String>) -> &Self {
        let subject = subject.into();
        self.fail_when(move |message| {
            (message.subject() == subject)
                .then(|| TransportError::from_smtp_reply(550, "Mailbox unavailable"))
        })
    }

    /// Fails every transmission.
    pub fn always_fail(&self) -> &Self {
        self.fail_when(|_| Some(TransportError::connection("Connection refused")))
    }

    /// Makes each transmission take `latency` (tokio time).
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.state.latency.lock().unwrap() = Some(latency);
        self
    }

    /// Number of transmit calls, successful or not.
    pub fn transmit_calls(&self) -> usize {
        self.state.transmit_calls.load(Ordering::SeqCst)
    }

    /// Messages transmitted successfully.
    pub fn transmitted(&self) -> Vec<Message> {
        self.state.transmitted.lock().unwrap().clone()
    }

    /// Number of sessions created.
    pub fn sessions_created(&self) -> usize {
        self.state.sessions_created.load(Ordering::SeqCst)
    }

    /// Number of sessions released, explicitly or by drop.
    pub fn sessions_released(&self) -> usize {
        self.state.sessions_released.load(Ordering::SeqCst)
    }

    /// Number of transmissions currently in progress.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of transmissions observed in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Clears recorded data and scripted behavior.
    pub fn clear(&self) {
        self.state.outcomes.lock().unwrap().clear();
        self.state.session_failures.lock().unwrap().clear();
        *self.state.fail_when.lock().unwrap() = None;
        *self.state.latency.lock().unwrap() = None;
        self.state.transmitted.lock().unwrap().clear();
        self.state.transmit_calls.store(0, Ordering::SeqCst);
        self.state.sessions_created.store(0, Ordering::SeqCst);
        self.state.sessions_released.store(0, Ordering::SeqCst);
        self.state.max_in_flight.store(0, Ordering::SeqCst);
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("transmit_calls", &self.transmit_calls())
            .field("sessions_created", &self.sessions_created())
            .field("sessions_released", &self.sessions_released())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_session(
        &self,
        _settings: &TransportSettings,
    ) -> Result<Box<dyn Session>, TransportError> {
        if let Some(error) = self.state.session_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        self.state.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: self.state.clone(),
            released: false,
        }))
    }
}

/// Session handed out by [`MockTransport`].
pub struct MockSession {
    state: Arc<MockState>,
    released: bool,
}

impl MockSession {
    fn mark_released(&mut self) {
        if !self.released {
            self.released = true;
            self.state.sessions_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for MockSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockSession")
            .field("released", &self.released)
            .finish()
    }
}

#[async_trait]
impl Session for MockSession {
    async fn transmit(&mut self, message: &Message) -> Result<String, TransportError> {
        if self.released {
            return Err(TransportError::connection("Session already released"));
        }

        self.state.transmit_calls.fetch_add(1, Ordering::SeqCst);
        {
            let _in_flight = InFlight::enter(&self.state);
            let latency = *self.state.latency.lock().unwrap();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
        }

        let predicate = self.state.fail_when.lock().unwrap().clone();
        if let Some(error) = predicate.and_then(|p| p(message)) {
            return Err(error);
        }

        let outcome = self
            .state
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("250 OK".to_string()));

        if outcome.is_ok() {
            self.state.transmitted.lock().unwrap().push(message.clone());
        }
        outcome
    }

    async fn release(&mut self) {
        self.mark_released();
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.mark_released();
    }
}

/// Counts a transmission as in progress until dropped, including when the
/// attempt is abandoned mid-flight.
struct InFlight<'a> {
    state: &'a MockState,
}

impl<'a> InFlight<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Creates a complete test message description.
pub fn test_message() -> MessageBuilder {
    MessageBuilder::new()
        .transport("smtp.example.com", 587, true)
        .from("sender@example.com")
        .to("recipient@example.com")
        .subject("Test Subject")
        .text_body("Test body")
}

/// Creates `count` complete messages with subjects `Message 0`, `Message 1`, ...
pub fn test_batch(count: usize) -> Vec<MessageBuilder> {
    (0..count)
        .map(|i| test_message().subject(format!("Message {}", i)))
        .collect()
}
