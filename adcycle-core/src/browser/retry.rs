use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{PageError, PageResult};
use super::metrics::ActionMetrics;
use super::telemetry::{NullTelemetry, TelemetrySink, TimingRecord};
use super::timeout::ResolvedPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Open,
    Find,
    Click,
    Fill,
    ReadText,
    CurrentUrl,
    Login,
    Publish,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Open => "open",
            OperationKind::Find => "find",
            OperationKind::Click => "click",
            OperationKind::Fill => "fill",
            OperationKind::ReadText => "read_text",
            OperationKind::CurrentUrl => "current_url",
            OperationKind::Login => "login",
            OperationKind::Publish => "publish",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: u32,
}

/// Last failure of an operation together with how many attempts were made.
#[derive(Debug, Error)]
#[error("{key} failed after {attempts} attempt(s): {source}")]
pub struct RetryFailure {
    pub key: String,
    pub attempts: u32,
    #[source]
    pub source: PageError,
}

impl RetryFailure {
    pub fn new(key: impl Into<String>, attempts: u32, source: PageError) -> Self {
        Self {
            key: key.into(),
            attempts,
            source,
        }
    }

    pub fn is_captcha(&self) -> bool {
        self.source.is_captcha()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, PageError::Cancelled)
    }
}

/// Runs page operations under the policy's timeout and bounded backoff.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: Arc<ResolvedPolicy>,
    telemetry: Arc<dyn TelemetrySink>,
    metrics: Arc<Mutex<ActionMetrics>>,
    cancel: CancellationToken,
    session_id: String,
}

impl RetryExecutor {
    pub fn new(policy: Arc<ResolvedPolicy>) -> Self {
        Self {
            policy,
            telemetry: Arc::new(NullTelemetry),
            metrics: Arc::new(Mutex::new(ActionMetrics::default())),
            cancel: CancellationToken::new(),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn policy(&self) -> &ResolvedPolicy {
        &self.policy
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn metrics(&self) -> ActionMetrics {
        self.metrics
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub async fn run<F, Fut, T>(
        &self,
        key: &str,
        kind: OperationKind,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PageResult<T>>,
    {
        let total_attempts = self.policy.retry().total_attempts();
        let budget = self.policy.timeout(key);
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(RetryFailure::new(key, attempt, PageError::Cancelled));
            }
            self.update_metrics(ActionMetrics::record_attempt);
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(PageError::Cancelled),
                outcome = timeout(budget, operation(attempt)) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(PageError::Timeout {
                        key: key.to_string(),
                        timeout: budget,
                    }),
                },
            };
            self.emit(key, kind, budget, started.elapsed(), attempt, &result);

            let error = match result {
                Ok(result) => {
                    self.update_metrics(ActionMetrics::record_success);
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => error,
            };
            let timed_out = matches!(error, PageError::Timeout { .. });
            self.update_metrics(|metrics| metrics.record_failure(timed_out));
            let attempts = attempt + 1;
            if error.is_captcha() {
                self.update_metrics(ActionMetrics::record_captcha);
                warn!(key, attempts, "captcha detected, not retrying");
                return Err(RetryFailure::new(key, attempts, error));
            }
            if !error.is_retryable() {
                return Err(RetryFailure::new(key, attempts, error));
            }
            if attempts >= total_attempts {
                self.update_metrics(ActionMetrics::record_exhausted);
                warn!(key, attempts, error = %error, "operation failed, retries exhausted");
                return Err(RetryFailure::new(key, attempts, error));
            }

            let delay = self.policy.backoff(key, attempt);
            debug!(
                key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "operation failed, backing off"
            );
            self.update_metrics(ActionMetrics::record_retry);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(RetryFailure::new(key, attempts, PageError::Cancelled));
                }
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn update_metrics(&self, update: impl FnOnce(&mut ActionMetrics)) {
        if let Ok(mut guard) = self.metrics.lock() {
            update(&mut guard);
        }
    }

    fn emit<T>(
        &self,
        key: &str,
        kind: OperationKind,
        budget: Duration,
        elapsed: Duration,
        attempt: u32,
        result: &PageResult<T>,
    ) {
        let record = TimingRecord {
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            operation_key: key.to_string(),
            operation_kind: kind.as_str().to_string(),
            effective_timeout_sec: budget.as_secs_f64(),
            actual_duration_sec: elapsed.as_secs_f64(),
            attempt_index: attempt,
            success: result.is_ok(),
            category: result
                .as_ref()
                .err()
                .map(|error| error.category().as_str().to_string()),
        };
        if let Err(err) = self.telemetry.record(&record) {
            warn!(key, error = %err, "failed to record timing telemetry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::telemetry::MemoryTelemetry;
    use crate::browser::timeout::{keys, RetrySettings};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(retry: RetrySettings) -> (RetryExecutor, Arc<MemoryTelemetry>) {
        let policy = ResolvedPolicy::new("normal", 1.0, BTreeMap::new()).with_retry(retry);
        let telemetry = Arc::new(MemoryTelemetry::default());
        let executor = RetryExecutor::new(Arc::new(policy)).with_telemetry(telemetry.clone());
        (executor, telemetry)
    }

    fn retry(enabled: bool, max_attempts: u32) -> RetrySettings {
        RetrySettings {
            retry_enabled: enabled,
            max_attempts,
            backoff_factor: 2.0,
            max_backoff_factor: 4.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let (executor, telemetry) = executor(retry(true, 3));
        let calls = AtomicU32::new(0);
        let outcome = executor
            .run(keys::QUICK_DOM, OperationKind::Find, |_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(PageError::NotFound {
                            selector: "#pstad-submit".into(),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, "done");

        let records = telemetry.records();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.attempt_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(records[2].success);
        assert_eq!(records[0].category.as_deref(), Some("element_missing"));

        let metrics = executor.metrics();
        assert_eq!(metrics.attempts, 3);
        assert_eq!(metrics.retries, 2);
        assert_eq!(metrics.successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_count_as_failures() {
        let (executor, telemetry) = executor(retry(true, 1));
        let failure = executor
            .run(keys::QUICK_DOM, OperationKind::Click, |_| async {
                sleep(Duration::from_secs(60)).await;
                Ok::<_, PageError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(matches!(failure.source, PageError::Timeout { .. }));
        assert_eq!(telemetry.records().len(), 2);
        assert_eq!(executor.metrics().timeouts, 2);
    }

    #[tokio::test]
    async fn captcha_returns_immediately() {
        let (executor, _) = executor(retry(true, 5));
        let calls = AtomicU32::new(0);
        let failure = executor
            .run(keys::PAGE_LOAD, OperationKind::Open, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(PageError::Captcha {
                        url: "https://www.kleinanzeigen.de".into(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(failure.is_captcha());
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let (executor, _) = executor(retry(true, 5));
        let token = executor.cancellation_token().clone();
        let calls = AtomicU32::new(0);
        let run = executor.run(keys::PUBLISHING_RESULT, OperationKind::Publish, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(PageError::NotFound {
                    selector: "#x".into(),
                })
            }
        });
        let cancel = async {
            sleep(Duration::from_secs(1)).await;
            token.cancel();
        };
        let (result, _) = tokio::join!(run, cancel);
        let failure = result.unwrap_err();
        assert!(failure.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
