//! Retry orchestration.
//!
//! [`RetryExecutor::execute`] runs one logical call end to end: circuit
//! check, rate limit wait, attempt loop with classification and backoff,
//! and dead letter capture when the retry budget runs out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::backoff::{self, RetryPolicy};
use crate::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::classify::{ErrorClass, ErrorClassifier};
use crate::clock::{Clock, SystemClock};
use crate::context::OperationContext;
use crate::dead_letter::{DeadLetterNotifier, DeadLetterService, DeadLetterStore, LogNotifier};
use crate::error::{ConfigError, ExecuteError, ServiceError};
use crate::rate_limit::RateLimiter;

/// Shared entry point protecting calls to unreliable services.
///
/// Cheap to share behind an [`Arc`]; all internal state is keyed by
/// operation key and safe for concurrent callers.
pub struct RetryExecutor<C: Clock = SystemClock> {
    classifier: ErrorClassifier,
    breakers: Arc<CircuitBreakerRegistry<C>>,
    limiter: Arc<RateLimiter<C>>,
    dead_letters: Arc<DeadLetterService<C>>,
    clock: Arc<C>,
}

impl RetryExecutor<SystemClock> {
    /// Executor over `store` with default breaker settings and the
    /// [`LogNotifier`].
    pub fn new(store: Arc<dyn DeadLetterStore>) -> Self {
        let clock = Arc::new(SystemClock);
        let breakers = Arc::new(CircuitBreakerRegistry::with_defaults());
        let dead_letters = Arc::new(DeadLetterService::new(
            store,
            Arc::new(LogNotifier),
            Arc::clone(&breakers),
        ));
        Self {
            classifier: ErrorClassifier::new(),
            breakers,
            limiter: Arc::new(RateLimiter::with_clock(Arc::clone(&clock))),
            dead_letters,
            clock,
        }
    }

    pub fn builder(store: Arc<dyn DeadLetterStore>) -> RetryExecutorBuilder<SystemClock> {
        RetryExecutorBuilder::new(store)
    }
}

impl<C: Clock> RetryExecutor<C> {
    /// Runs `operation` under the given policy, retrying transient failures.
    ///
    /// `operation` is invoked up to `policy.max_retries + 1` times. The
    /// terminal outcomes are the success value or one [`ExecuteError`];
    /// retryable failures never surface raw, they either succeed on a later
    /// attempt or end up recorded as a dead letter.
    #[instrument(skip_all, fields(operation_key = %ctx.operation_key))]
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &OperationContext,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, ExecuteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        if self.breakers.is_open(&ctx.operation_key) {
            debug!("circuit open, rejecting call without an attempt");
            return Err(ExecuteError::CircuitOpen { key: ctx.operation_key.clone() });
        }

        if let Some(quota) = &ctx.rate_limit {
            let acquire = self.limiter.acquire(&ctx.operation_key, quota);
            match &ctx.cancellation {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(ExecuteError::Cancelled),
                    _ = acquire => {}
                },
                None => acquire.await,
            }
        }

        let started = self.clock.now();
        let mut attempt: u32 = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(ExecuteError::Cancelled);
            }

            let error = match operation().await {
                Ok(value) => {
                    self.breakers.record_success(&ctx.operation_key);
                    if attempt > 0 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            self.breakers.record_failure(&ctx.operation_key);

            if self.classifier.classify(&error) == ErrorClass::Fatal {
                debug!(%error, "non-retryable failure, propagating");
                return Err(ExecuteError::Fatal { source: error });
            }

            let attempts_made = attempt + 1;
            let deadline_hit = policy
                .deadline
                .is_some_and(|d| self.clock.now().duration_since(started) >= d);
            if attempt >= policy.max_retries || deadline_hit {
                warn!(
                    attempts = attempts_made,
                    deadline_hit,
                    %error,
                    "retry budget exhausted, capturing dead letter"
                );
                return match self.dead_letters.enqueue(&error, ctx, attempts_made).await {
                    Ok(entry_id) => {
                        Err(ExecuteError::DeadLettered { entry_id, attempts: attempts_made })
                    }
                    Err(store_error) => Err(ExecuteError::DeadLetterFailed { source: store_error }),
                };
            }

            let delay = backoff::delay_for(attempt, &error, policy);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "retryable failure, backing off"
            );
            if !self.sleep_unless_cancelled(ctx, delay).await {
                return Err(ExecuteError::Cancelled);
            }
            attempt += 1;
        }
    }

    /// Breaker admin and observability surface.
    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry<C>> {
        &self.breakers
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter<C>> {
        &self.limiter
    }

    /// Dead letter review surface (list, replay, handler registration).
    pub fn dead_letters(&self) -> &Arc<DeadLetterService<C>> {
        &self.dead_letters
    }

    /// Sleeps for `delay`; returns `false` when cancellation fired first.
    async fn sleep_unless_cancelled(&self, ctx: &OperationContext, delay: Duration) -> bool {
        match &ctx.cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

impl<C: Clock> std::fmt::Debug for RetryExecutor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("breakers", &self.breakers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryExecutor`] with a custom breaker config, notifier, or
/// clock.
pub struct RetryExecutorBuilder<C: Clock = SystemClock> {
    store: Arc<dyn DeadLetterStore>,
    notifier: Arc<dyn DeadLetterNotifier>,
    breaker_config: CircuitBreakerConfig,
    clock: Arc<C>,
}

impl RetryExecutorBuilder<SystemClock> {
    pub fn new(store: Arc<dyn DeadLetterStore>) -> Self {
        Self {
            store,
            notifier: Arc::new(LogNotifier),
            breaker_config: CircuitBreakerConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl<C: Clock> RetryExecutorBuilder<C> {
    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn DeadLetterNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Swaps the time source, rebuilding the builder over the new clock type.
    pub fn clock<C2: Clock>(self, clock: Arc<C2>) -> RetryExecutorBuilder<C2> {
        RetryExecutorBuilder {
            store: self.store,
            notifier: self.notifier,
            breaker_config: self.breaker_config,
            clock,
        }
    }

    pub fn build(self) -> Result<RetryExecutor<C>, ConfigError> {
        let breakers = Arc::new(CircuitBreakerRegistry::with_clock(
            self.breaker_config,
            Arc::clone(&self.clock),
        )?);
        let dead_letters = Arc::new(DeadLetterService::new(
            self.store,
            self.notifier,
            Arc::clone(&breakers),
        ));
        Ok(RetryExecutor {
            classifier: ErrorClassifier::new(),
            breakers,
            limiter: Arc::new(RateLimiter::with_clock(Arc::clone(&self.clock))),
            dead_letters,
            clock: self.clock,
        })
    }
}
