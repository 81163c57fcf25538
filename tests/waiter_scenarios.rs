//! Timing scenarios for the operation poller
//!
//! All tests run on a paused clock, so sleeps complete instantly while
//! `Instant` still reports the virtual time that passed.

use hwcloud_provider::cloud::error::ApiError;
use hwcloud_provider::waiter::{
    AsyncOperationPoller, OperationHandle, PollConfig, StatusSnapshot, WaitError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
enum Step {
    Status(&'static str),
    NotFound,
    ServerError,
}

/// Replays a fixed sequence of fetch results; the last step repeats
struct Script {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl Script {
    fn new(steps: &[Step]) -> Self {
        Self {
            steps: Mutex::new(steps.iter().copied().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn fetch(&self) -> Result<StatusSnapshot<&'static str>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                *steps.front().unwrap()
            }
        };

        match step {
            Step::Status(status) => Ok(StatusSnapshot::new(status, status)),
            Step::NotFound => Err(ApiError::NotFound {
                method: "GET".to_string(),
                url: "https://er.example.com/v3/p/enterprise-router/instances/er-1".to_string(),
            }),
            Step::ServerError => Err(ApiError::Status {
                method: "GET".to_string(),
                url: "https://er.example.com/v3/p/enterprise-router/instances/er-1".to_string(),
                status: 500,
                code: None,
                message: "internal error".to_string(),
            }),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn poller(timeout: u64, delay: u64, interval: u64) -> AsyncOperationPoller {
    AsyncOperationPoller::new(PollConfig::new(
        Duration::from_secs(timeout),
        Duration::from_secs(delay),
        Duration::from_secs(interval),
    ))
    .unwrap()
}

fn creating_handle() -> OperationHandle {
    OperationHandle::new("er_instance", "er-1").with_targets(["available"])
}

async fn run(
    poller: &AsyncOperationPoller,
    handle: &OperationHandle,
    script: &Script,
) -> Result<Option<&'static str>, WaitError> {
    poller
        .poll_until_settled(handle, || {
            let fetched = script.fetch();
            async move { fetched }
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_instance_becomes_available_on_third_check() {
    let script = Script::new(&[
        Step::Status("creating"),
        Step::Status("creating"),
        Step::Status("available"),
    ]);
    let start = Instant::now();

    let result = run(&poller(300, 10, 10), &creating_handle(), &script).await;

    assert_eq!(result.unwrap(), Some("available"));
    assert_eq!(script.calls(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_deletion_confirmed_by_not_found() {
    let script = Script::new(&[Step::NotFound]);
    let handle = OperationHandle::new("er_instance", "er-1");

    let result = run(&poller(300, 0, 5), &handle, &script).await;

    assert!(result.unwrap().is_none());
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_status_on_second_check() {
    let script = Script::new(&[Step::Status("creating"), Step::Status("failed")]);

    let result = run(&poller(300, 10, 10), &creating_handle(), &script).await;

    match result {
        Err(WaitError::FailedStatus { status, payload }) => {
            assert_eq!(status, "failed");
            assert_eq!(payload, serde_json::json!("failed"));
        }
        other => panic!("expected failed status, got {:?}", other),
    }
    assert_eq!(script.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_stops_fetching() {
    let script = Script::new(&[Step::Status("creating")]);
    let start = Instant::now();

    let result = run(&poller(60, 0, 10), &creating_handle(), &script).await;

    match result {
        Err(WaitError::Timeout {
            last_status,
            timeout,
            ..
        }) => {
            assert_eq!(last_status.as_deref(), Some("creating"));
            assert_eq!(timeout, Duration::from_secs(60));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    // Checks at 0s, 10s, ..., 50s; none at the 60s deadline
    assert_eq!(script.calls(), 6);
    assert_eq!(start.elapsed(), Duration::from_secs(60));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(script.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_settled_resource_is_idempotent() {
    let poller = poller(300, 0, 5);
    let handle = creating_handle();

    for _ in 0..2 {
        let script = Script::new(&[Step::Status("available")]);
        assert_eq!(run(&poller, &handle, &script).await.unwrap(), Some("available"));
        assert_eq!(script.calls(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_fetch_errors_are_not_retried() {
    let script = Script::new(&[Step::ServerError, Step::Status("available")]);

    let result = run(&poller(300, 0, 5), &creating_handle(), &script).await;

    match result {
        Err(WaitError::Api(e)) => assert_eq!(e.status_code(), Some(500)),
        other => panic!("expected API error, got {:?}", other),
    }
    assert_eq!(script.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_not_found_while_creating_is_an_error() {
    let script = Script::new(&[Step::NotFound]);

    let result = run(&poller(300, 0, 5), &creating_handle(), &script).await;

    match result {
        Err(WaitError::Api(e)) => assert!(e.is_not_found()),
        other => panic!("expected not found, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_pending_allow_list_rejects_unknown_status() {
    let script = Script::new(&[Step::Status("READY"), Step::Status("PAUSED")]);
    let poller = AsyncOperationPoller::new(
        PollConfig::new(
            Duration::from_secs(300),
            Duration::from_secs(5),
            Duration::from_secs(10),
        )
        .with_failure_states(Vec::<String>::new())
        .with_pending_states(["READY"]),
    )
    .unwrap();
    let handle = OperationHandle::new("sms_task", "t-1").with_targets(["RUNNING"]);

    let result = run(&poller, &handle, &script).await;

    assert!(matches!(
        result,
        Err(WaitError::UnexpectedStatus { ref status, .. }) if status == "PAUSED"
    ));
    assert_eq!(script.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_interval_sleep() {
    let script = Script::new(&[Step::Status("creating")]);
    let token = CancellationToken::new();
    let poller = poller(300, 0, 10).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        token.cancel();
    });

    let start = Instant::now();
    let result = run(&poller, &creating_handle(), &script).await;

    assert!(matches!(result, Err(WaitError::Cancelled)));
    assert_eq!(script.calls(), 2);
    assert_eq!(start.elapsed(), Duration::from_secs(15));
    canceller.await.unwrap();
}
