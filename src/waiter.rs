//! Asynchronous operation polling
//!
//! Mutating calls against ER, SMS and VPC usually return as soon as the
//! request is accepted. [`AsyncOperationPoller`] re-reads the resource until
//! its status reaches a target state, hits a failure state, or the timeout
//! elapses. The decision for a single status check lives in [`classify`] so
//! it can be tested without a clock.

use crate::cloud::error::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Status considered a terminal failure when a wait declares none
pub const DEFAULT_FAILURE_STATE: &str = "failed";

/// Default timeout for a wait (10 minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default interval between status checks
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Errors that end a wait
#[derive(Debug, Error)]
pub enum WaitError {
    /// The remote side reported a terminal failure state
    #[error("the resource entered failure state '{status}'")]
    FailedStatus {
        status: String,
        /// Last fetched representation, for diagnostics
        payload: Value,
    },

    /// A status outside the declared pending, target and failure sets
    #[error("unexpected state '{status}', wanted target '{}'", .targets.join(", "))]
    UnexpectedStatus { status: String, targets: Vec<String> },

    #[error(
        "timeout while waiting for state to become '{}' (last state: '{}', timeout: {:?})",
        .targets.join(", "),
        .last_status.as_deref().unwrap_or("unknown"),
        .timeout
    )]
    Timeout {
        targets: Vec<String>,
        last_status: Option<String>,
        timeout: Duration,
    },

    #[error("the wait was cancelled")]
    Cancelled,

    #[error("invalid poll configuration: {0}")]
    InvalidConfig(String),

    /// The status fetch itself failed
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Identifies one in-flight operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    /// Local identifier, used to correlate log lines of one wait
    pub operation_id: Uuid,
    pub resource_type: String,
    pub resource_id: String,
    /// Container IDs needed to address the resource (e.g. ER instance, route table)
    pub parent_ids: Vec<String>,
    /// Statuses meaning success; empty means the resource must disappear
    pub target_states: Vec<String>,
}

impl OperationHandle {
    pub fn new(resource_type: &str, resource_id: &str) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            parent_ids: Vec::new(),
            target_states: Vec::new(),
        }
    }

    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parent_ids = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_states = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this wait expects the resource to be deleted
    pub fn awaiting_deletion(&self) -> bool {
        self.target_states.is_empty()
    }

    pub fn is_target(&self, status: &str) -> bool {
        self.target_states.iter().any(|s| s == status)
    }
}

/// Timing and status sets for one wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub interval: Duration,
    pub failure_states: Vec<String>,
    /// When non-empty, any status outside pending/target/failure is an error
    pub pending_states: Vec<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            initial_delay: Duration::ZERO,
            interval: DEFAULT_INTERVAL,
            failure_states: vec![DEFAULT_FAILURE_STATE.to_string()],
            pending_states: Vec::new(),
        }
    }
}

impl PollConfig {
    pub fn new(timeout: Duration, initial_delay: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            initial_delay,
            interval,
            ..Self::default()
        }
    }

    pub fn with_failure_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure_states = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pending_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending_states = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), WaitError> {
        if self.timeout.is_zero() {
            return Err(WaitError::InvalidConfig("timeout must be greater than zero".into()));
        }
        if self.interval.is_zero() {
            return Err(WaitError::InvalidConfig("interval must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn is_failure(&self, status: &str) -> bool {
        self.failure_states.iter().any(|s| s == status)
    }

    fn is_pending(&self, status: &str) -> bool {
        self.pending_states.is_empty() || self.pending_states.iter().any(|s| s == status)
    }
}

/// One successful status fetch
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot<T> {
    pub payload: T,
    pub status: String,
}

impl<T> StatusSnapshot<T> {
    pub fn new(payload: T, status: impl Into<String>) -> Self {
        Self {
            payload,
            status: status.into(),
        }
    }
}

/// Outcome of one status check
#[derive(Debug)]
pub enum PollResult<T> {
    /// Keep polling; carries the observed status
    Pending(String),
    /// Settled; `None` when the resource is gone as expected
    Completed(Option<T>),
    Failed(WaitError),
}

/// Decide what one status fetch means for the wait
///
/// Failure states are checked before target states, so a status present in
/// both sets fails the wait.
pub fn classify<T: Into<Value>>(
    handle: &OperationHandle,
    config: &PollConfig,
    fetched: Result<StatusSnapshot<T>, ApiError>,
) -> PollResult<T> {
    let snapshot = match fetched {
        Ok(snapshot) => snapshot,
        Err(e) if e.is_not_found() && handle.awaiting_deletion() => {
            return PollResult::Completed(None);
        }
        Err(e) => return PollResult::Failed(WaitError::Api(e)),
    };

    if config.is_failure(&snapshot.status) {
        return PollResult::Failed(WaitError::FailedStatus {
            status: snapshot.status,
            payload: snapshot.payload.into(),
        });
    }
    if handle.is_target(&snapshot.status) {
        return PollResult::Completed(Some(snapshot.payload));
    }
    if !config.is_pending(&snapshot.status) {
        return PollResult::Failed(WaitError::UnexpectedStatus {
            status: snapshot.status,
            targets: handle.target_states.clone(),
        });
    }

    PollResult::Pending(snapshot.status)
}

/// Wait declaration attached to a mutating call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitRules {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default = "default_failures")]
    pub failures: Vec<String>,
    #[serde(default)]
    pub pending: Vec<String>,
    /// Written as whole seconds in resource definitions
    #[serde(default, rename = "delay_secs", with = "duration_secs")]
    pub delay: Duration,
    #[serde(default = "default_interval", rename = "interval_secs", with = "duration_secs")]
    pub interval: Duration,
}

fn default_failures() -> Vec<String> {
    vec![DEFAULT_FAILURE_STATE.to_string()]
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

impl Default for WaitRules {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            failures: default_failures(),
            pending: Vec::new(),
            delay: Duration::ZERO,
            interval: default_interval(),
        }
    }
}

impl WaitRules {
    /// Wait for one of `targets`
    pub fn until<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Wait for the resource to disappear
    pub fn until_deleted() -> Self {
        Self::default()
    }

    pub fn failures<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failures = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn pending<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn timing(mut self, delay: Duration, interval: Duration) -> Self {
        self.delay = delay;
        self.interval = interval;
        self
    }

    pub fn poll_config(&self, timeout: Duration) -> PollConfig {
        PollConfig::new(
            timeout,
            self.delay,
            self.interval,
        )
        .with_failure_states(self.failures.iter().cloned())
        .with_pending_states(self.pending.iter().cloned())
    }

    pub fn handle(&self, resource_type: &str, resource_id: &str) -> OperationHandle {
        OperationHandle::new(resource_type, resource_id).with_targets(self.targets.iter().cloned())
    }
}

/// Repeatedly checks a resource's status until the operation settles
#[derive(Debug, Clone)]
pub struct AsyncOperationPoller {
    config: PollConfig,
    cancel: Option<CancellationToken>,
}

impl AsyncOperationPoller {
    pub fn new(config: PollConfig) -> Result<Self, WaitError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
        })
    }

    /// Abort sleeps and in-flight fetches once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll `fetch` until the operation behind `handle` settles
    ///
    /// Returns the last fetched payload, or `None` when the resource was
    /// deleted as expected. The timeout is measured after the initial delay;
    /// no fetch is started once it has elapsed.
    pub async fn poll_until_settled<T, F, Fut>(
        &self,
        handle: &OperationHandle,
        mut fetch: F,
    ) -> Result<Option<T>, WaitError>
    where
        T: Into<Value>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StatusSnapshot<T>, ApiError>>,
    {
        let span = tracing::info_span!(
            "wait",
            operation = %handle.operation_id,
            resource_type = %handle.resource_type,
            id = %handle.resource_id,
        );

        async move {
            tracing::debug!(
                targets = ?handle.target_states,
                parents = ?handle.parent_ids,
                "Waiting for operation to settle"
            );

            if !self.config.initial_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancelled(self.cancel.as_ref()) => return Err(WaitError::Cancelled),
                    _ = tokio::time::sleep(self.config.initial_delay) => {}
                }
            }

            let deadline = Instant::now() + self.config.timeout;
            let mut last_status: Option<String> = None;
            let mut attempt: u32 = 0;

            loop {
                attempt += 1;
                let fetched = tokio::select! {
                    biased;
                    _ = cancelled(self.cancel.as_ref()) => return Err(WaitError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => {
                        return Err(self.timeout_error(handle, last_status));
                    }
                    fetched = fetch() => fetched,
                };

                match classify(handle, &self.config, fetched) {
                    PollResult::Completed(payload) => {
                        tracing::info!(attempt, "Operation settled");
                        return Ok(payload);
                    }
                    PollResult::Failed(e) => {
                        tracing::warn!(attempt, error = %e, "Operation failed");
                        return Err(e);
                    }
                    PollResult::Pending(status) => {
                        tracing::debug!(attempt, status = %status, "Still pending");
                        last_status = Some(status);
                    }
                }

                tokio::select! {
                    biased;
                    _ = cancelled(self.cancel.as_ref()) => return Err(WaitError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => {
                        return Err(self.timeout_error(handle, last_status));
                    }
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }
        }
        .instrument(span)
        .await
    }

    fn timeout_error(&self, handle: &OperationHandle, last_status: Option<String>) -> WaitError {
        tracing::warn!(last_status = ?last_status, "Timed out after {:?}", self.config.timeout);
        WaitError::Timeout {
            targets: handle.target_states.clone(),
            last_status,
            timeout: self.config.timeout,
        }
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}
