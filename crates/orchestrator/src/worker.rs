//! Reply consumer.
//!
//! Subscribes to the reply topics and reconciles every message on its own
//! task. Infrastructure failures are retried with exponential backoff so a
//! reply is only given up on after the policy is exhausted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use broker::{InboundMessage, MessageBroker, topics};
use futures_util::StreamExt;
use saga_store::SagaStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::coordinator::{Orchestrator, ReconcileOutcome};
use crate::error::{Result, SagaError};

/// Exponential backoff for retryable reconcile failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on the delay between retries
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (zero-based), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let delay_ns = self.initial_delay.as_nanos() as f64 * factor;
        if !delay_ns.is_finite() || delay_ns >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(delay_ns as u64)
        }
    }
}

/// Consumes replies and feeds them to the orchestrator.
pub struct ReplyWorker<S, B>
where
    S: SagaStore,
    B: MessageBroker,
{
    orchestrator: Arc<Orchestrator<S, B>>,
    broker: B,
    max_in_flight: usize,
    retry: RetryPolicy,
}

impl<S, B> ReplyWorker<S, B>
where
    S: SagaStore + 'static,
    B: MessageBroker + 'static,
{
    pub fn new(
        orchestrator: Arc<Orchestrator<S, B>>,
        broker: B,
        max_in_flight: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            orchestrator,
            broker,
            max_in_flight: max_in_flight.max(1),
            retry,
        }
    }

    /// Consumes replies until `shutdown` resolves or the stream ends, then
    /// waits for in-flight messages to finish.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        let mut replies = self.broker.subscribe(&topics::REPLY_TOPICS).await?;
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        tracing::info!(
            topics = ?topics::REPLY_TOPICS,
            max_in_flight = self.max_in_flight,
            "reply worker started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                message = replies.next() => {
                    let Some(message) = message else { break };
                    let Ok(permit) = permits.clone().acquire_owned().await else { break };

                    let orchestrator = self.orchestrator.clone();
                    let retry = self.retry.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let _ = process(&orchestrator, &retry, message).await;
                    });
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        tracing::info!("reply worker stopped");
        Ok(())
    }

    /// Reconciles one message, retrying retryable failures.
    pub async fn handle(&self, message: InboundMessage) -> Result<ReconcileOutcome> {
        process(&self.orchestrator, &self.retry, message).await
    }
}

async fn process<S, B>(
    orchestrator: &Orchestrator<S, B>,
    retry: &RetryPolicy,
    message: InboundMessage,
) -> Result<ReconcileOutcome>
where
    S: SagaStore + 'static,
    B: MessageBroker + 'static,
{
    let mut attempt = 0;
    loop {
        let err = match orchestrator
            .handle_message(&message.topic, &message.payload)
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };

        if err.is_retryable() && attempt < retry.max_retries {
            let delay = retry.delay_for_attempt(attempt);
            tracing::warn!(
                error = %err,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "reply failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        match &err {
            SagaError::NoRevertEvent { .. } => {
                tracing::error!(error = %err, "compensation gap, operator action required")
            }
            e if e.is_retryable() => {
                tracing::error!(error = %err, attempts = attempt + 1, "giving up on reply")
            }
            _ => tracing::warn!(error = %err, topic = %message.topic, "dropping reply"),
        }
        return Err(err);
    }
}
