//! Dispatch orchestration.
//!
//! A [`Dispatcher`] validates message descriptions, transmits them through
//! its [`Transport`] with a fresh session per attempt, and fans batches out
//! to one task per message.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{DispatchConfig, RetryPolicy};
use crate::errors::{
    BatchError, BatchFailure, MailError, MailResult, TransportError, TransportErrorKind,
};
use crate::observability::{DispatchMetrics, Timer};
use crate::resilience::RetryExecutor;
use crate::transport::{transmit_once, Transport};
use crate::types::{Message, MessageBuilder, SendResult};

/// Sends messages through a transport.
pub struct Dispatcher<T: Transport + 'static> {
    /// Transport used to open sessions.
    transport: Arc<T>,
    /// Metrics collector.
    metrics: Arc<DispatchMetrics>,
    /// Bounds concurrent transmissions when set.
    limiter: Option<Arc<Semaphore>>,
    /// Policy for the `*_with_default_retry` operations.
    retry: RetryPolicy,
}

impl<T: Transport + 'static> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            metrics: self.metrics.clone(),
            limiter: self.limiter.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<T: Transport + 'static> Dispatcher<T> {
    /// Creates a dispatcher with unbounded batch concurrency.
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    /// Creates a builder for a dispatcher.
    pub fn builder(transport: T) -> DispatcherBuilder<T> {
        DispatcherBuilder::new(transport)
    }

    /// Creates a dispatcher from loaded settings.
    pub fn from_config(transport: T, config: &DispatchConfig) -> Self {
        let mut builder = Self::builder(transport).default_retry(config.retry.clone());
        if let Some(limit) = config.max_concurrency {
            builder = builder.max_concurrency(limit);
        }
        builder.build()
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Returns the policy used by the `*_with_default_retry` operations.
    pub fn default_retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Validates and transmits a message once.
    pub async fn send(&self, message: MessageBuilder) -> MailResult<SendResult> {
        self.dispatch(message, &RetryPolicy::no_retry()).await
    }

    /// Validates and transmits a message once, blocking the calling thread.
    ///
    /// Runs on a private current-thread runtime. Calling this from inside a
    /// tokio runtime fails with a transport error instead of blocking it.
    pub fn send_blocking(&self, message: MessageBuilder) -> MailResult<SendResult> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(TransportError::new(
                TransportErrorKind::Unknown,
                "send_blocking cannot run inside an async runtime; use send",
            )
            .into());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                TransportError::new(TransportErrorKind::Unknown, "Cannot start runtime")
                    .with_cause(e)
            })?;

        runtime.block_on(self.send(message))
    }

    /// Validates and transmits a message, retrying transport failures.
    pub async fn send_with_retry(
        &self,
        message: MessageBuilder,
        policy: &RetryPolicy,
    ) -> MailResult<SendResult> {
        self.dispatch(message, policy).await
    }

    /// Like [`send_with_retry`](Self::send_with_retry) with the configured policy.
    pub async fn send_with_default_retry(&self, message: MessageBuilder) -> MailResult<SendResult> {
        self.dispatch(message, &self.retry).await
    }

    /// Dispatches every message concurrently, each transmitted once.
    ///
    /// Waits for all members. Returns the results in input order, or a
    /// [`BatchError`] listing every failed member by zero-based index.
    pub async fn send_batch(&self, messages: Vec<MessageBuilder>) -> MailResult<Vec<SendResult>> {
        self.dispatch_batch(messages, RetryPolicy::no_retry()).await
    }

    /// Dispatches every message concurrently, each retrying independently.
    pub async fn send_batch_with_retry(
        &self,
        messages: Vec<MessageBuilder>,
        policy: &RetryPolicy,
    ) -> MailResult<Vec<SendResult>> {
        self.dispatch_batch(messages, policy.clone()).await
    }

    /// Like [`send_batch_with_retry`](Self::send_batch_with_retry) with the configured policy.
    pub async fn send_batch_with_default_retry(
        &self,
        messages: Vec<MessageBuilder>,
    ) -> MailResult<Vec<SendResult>> {
        self.dispatch_batch(messages, self.retry.clone()).await
    }

    async fn dispatch(&self, builder: MessageBuilder, policy: &RetryPolicy) -> MailResult<SendResult> {
        let message = match builder.validate() {
            Ok(message) => message,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Message rejected before dispatch");

                self.metrics.record_validation_failure();
                self.metrics.record_send_failure();
                return Err(e);
            }
        };

        let timer = Timer::start("dispatch");
        let executor = RetryExecutor::new(policy.clone()).with_metrics(self.metrics.clone());

        let result = executor
            .execute(|attempt| {
                let message = &message;
                async move {
                    self.attempt(message, attempt)
                        .await
                        .map(|response| (response, attempt))
                }
            })
            .await;

        match result {
            Ok((response, attempts)) => {
                self.metrics.record_send_success();
                let duration = timer.stop();

                #[cfg(feature = "tracing")]
                tracing::info!(
                    message_id = %message.message_id(),
                    recipients = message.recipient_count(),
                    attempts = attempts,
                    duration_ms = duration.as_millis() as u64,
                    "Message sent"
                );

                Ok(SendResult {
                    message_id: message.message_id().to_string(),
                    response,
                    attempts,
                    duration,
                })
            }
            Err(e) => {
                self.metrics.record_send_failure();

                #[cfg(feature = "tracing")]
                tracing::error!(
                    message_id = %message.message_id(),
                    error = %e,
                    "Message dispatch failed"
                );

                Err(e)
            }
        }
    }

    async fn attempt(&self, message: &Message, attempt: u32) -> MailResult<String> {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            message_id = %message.message_id(),
            attempt = attempt,
            server = %message.settings().address(),
            "Transmitting message"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = attempt;

        // Held for session creation and transmission only, never across a retry wait.
        let _permit = self.acquire_permit().await?;
        let result = transmit_once(self.transport.as_ref(), message).await;
        self.metrics.record_attempt(result.is_ok());
        result.map_err(MailError::from)
    }

    async fn dispatch_batch(
        &self,
        messages: Vec<MessageBuilder>,
        policy: RetryPolicy,
    ) -> MailResult<Vec<SendResult>> {
        let total = messages.len();
        self.metrics.record_batch();

        #[cfg(feature = "tracing")]
        tracing::info!(batch_size = total, "Dispatching batch");

        let handles: Vec<_> = messages
            .into_iter()
            .map(|builder| {
                let dispatcher = self.clone();
                let policy = policy.clone();
                tokio::spawn(async move { dispatcher.dispatch(builder, &policy).await })
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, joined) in join_all(handles).await.into_iter().enumerate() {
            let outcome = joined.unwrap_or_else(|join_error| {
                Err(TransportError::new(
                    TransportErrorKind::Unknown,
                    format!("Dispatch task aborted: {}", join_error),
                )
                .with_cause(join_error)
                .into())
            });

            match outcome {
                Ok(result) => results.push(result),
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(index = index, error = %error, "Batch member failed");

                    failures.push(BatchFailure { index, error });
                }
            }
        }

        if failures.is_empty() {
            Ok(results)
        } else {
            Err(BatchError::new(total, failures).into())
        }
    }

    async fn acquire_permit(&self) -> MailResult<Option<OwnedSemaphorePermit>> {
        match &self.limiter {
            Some(limiter) => limiter.clone().acquire_owned().await.map(Some).map_err(|e| {
                MailError::from(
                    TransportError::new(TransportErrorKind::Unknown, "Dispatcher limiter closed")
                        .with_cause(e),
                )
            }),
            None => Ok(None),
        }
    }
}

impl<T: Transport + 'static> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport)
            .field("limited", &self.limiter.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builder for [`Dispatcher`].
#[derive(Debug)]
pub struct DispatcherBuilder<T: Transport + 'static> {
    transport: T,
    max_concurrency: Option<usize>,
    retry: RetryPolicy,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl<T: Transport + 'static> DispatcherBuilder<T> {
    /// Creates a builder around a transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            max_concurrency: None,
            retry: RetryPolicy::default(),
            metrics: None,
        }
    }

    /// Limits how many messages transmit at once. Zero is treated as one.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Sets the policy for the `*_with_default_retry` operations.
    pub fn default_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Shares an existing metrics collector.
    pub fn metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the dispatcher.
    pub fn build(self) -> Dispatcher<T> {
        Dispatcher {
            transport: Arc::new(self.transport),
            metrics: self.metrics.unwrap_or_default(),
            limiter: self
                .max_concurrency
                .map(|limit| Arc::new(Semaphore::new(limit))),
            retry: self.retry,
        }
    }
}

impl MessageBuilder {
    /// Dispatches this message once.
    pub async fn send<T: Transport + 'static>(
        self,
        dispatcher: &Dispatcher<T>,
    ) -> MailResult<SendResult> {
        dispatcher.send(self).await
    }

    /// Dispatches this message with retry.
    pub async fn send_with_retry<T: Transport + 'static>(
        self,
        dispatcher: &Dispatcher<T>,
        policy: &RetryPolicy,
    ) -> MailResult<SendResult> {
        dispatcher.send_with_retry(self, policy).await
    }
}
