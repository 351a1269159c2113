//! Pool behaviour against real `forkpool worker` processes

use forkpool_config::PoolConfig;
use forkpool_execution::{Job, Pool, PoolEvent, PoolEvents};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(30);

fn worker_pool(size: usize, mode: &str, extra: &[&str]) -> (Pool, PoolEvents) {
    let mut args = vec!["worker", "--mode", mode, "--log-level", "warn"];
    args.extend_from_slice(extra);
    let config = PoolConfig::new(env!("CARGO_BIN_EXE_forkpool"), size)
        .with_args(args)
        .with_silent(true);
    Pool::from_config(&config).unwrap()
}

async fn next_event(events: &mut PoolEvents) -> PoolEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a pool event")
        .expect("pool event stream closed")
}

/// Skip events until one matches
async fn wait_for<F>(events: &mut PoolEvents, mut matches: F) -> PoolEvent
where
    F: FnMut(&PoolEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

async fn shutdown(pool: Pool, mut events: PoolEvents) {
    pool.release_all().await.unwrap();
    let _ = timeout(Duration::from_secs(5), async {
        while !pool.workers().await.unwrap().is_empty() {
            if events.recv().await.is_none() {
                break;
            }
        }
    })
    .await;
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_brings_up_every_worker() {
    let (pool, mut events) = worker_pool(2, "echo", &[]);

    assert_eq!(pool.start().await.unwrap(), 2);
    for _ in 0..2 {
        wait_for(&mut events, |e| matches!(e, PoolEvent::Started { .. })).await;
    }

    let status = pool.status().await.unwrap();
    assert_eq!(status.workers.created, 2);
    assert_eq!(status.workers.idle, 2);
    assert_eq!(status.workers.busy, 0);
    assert_eq!(status.workers.starting, 0);

    let workers = pool.workers().await.unwrap();
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|w| w.pid.is_some()));

    shutdown(pool, events).await;
}

#[tokio::test]
async fn test_echo_job_round_trip() {
    let (pool, mut events) = worker_pool(1, "echo", &[]);
    pool.submit(json!({"n": 7})).unwrap();
    pool.start().await.unwrap();

    let event = wait_for(&mut events, |e| matches!(e, PoolEvent::Data { .. })).await;
    assert_eq!(
        event,
        PoolEvent::Data {
            input: json!({"n": 7}),
            output: json!({"echoOf": {"n": 7}}),
        }
    );

    let status = pool.status().await.unwrap();
    assert_eq!(status.jobs.processed, 1);
    assert_eq!(status.jobs.failed, 0);
    assert!(status.is_drained());

    shutdown(pool, events).await;
}

#[tokio::test]
async fn test_failure_without_requeue_is_dropped() {
    let (pool, mut events) = worker_pool(1, "fail", &[]);
    let (tx, mut failures) = mpsc::unbounded_channel::<(JsonValue, JsonValue, bool)>();

    let job = Job::new(json!("p")).on_failure(move |_, error, input, requeue| {
        let _ = tx.send((error.clone(), input.clone(), requeue.is_spent()));
    });
    pool.submit_job(job).unwrap();
    pool.start().await.unwrap();

    let (error, input, spent) = timeout(WAIT, failures.recv()).await.unwrap().unwrap();
    assert_eq!(error, json!("Fails Processing"));
    assert_eq!(input, json!("p"));
    assert!(!spent);

    let status = pool.status().await.unwrap();
    assert_eq!(status.jobs.failed, 1);
    assert_eq!(status.jobs.processed, 0);
    assert_eq!(status.outstanding(), 0);
    // The worker survives its failure
    assert_eq!(status.workers.idle, 1);

    // A job without callbacks is reported as an event instead
    pool.submit(json!("x")).unwrap();
    let event = wait_for(&mut events, |e| matches!(e, PoolEvent::Error { .. })).await;
    assert_eq!(
        event,
        PoolEvent::Error {
            error: json!("Fails Processing"),
            input: json!("x"),
        }
    );

    shutdown(pool, events).await;
}

#[tokio::test]
async fn test_requeued_failure_succeeds_on_retry() {
    let (pool, events) = worker_pool(1, "fail-once", &[]);
    let (tx, mut outcomes) = mpsc::unbounded_channel::<JsonValue>();

    let job = Job::new(json!(42))
        .on_success(move |_, _, output| {
            let _ = tx.send(output.clone());
        })
        .on_failure(|_, _, _, mut requeue| {
            assert!(requeue.requeue());
        });
    pool.submit_job(job).unwrap();
    pool.start().await.unwrap();

    let output = timeout(WAIT, outcomes.recv()).await.unwrap().unwrap();
    assert_eq!(output, json!({"echoOf": 42}));

    let status = pool.status().await.unwrap();
    assert_eq!(status.jobs.failed, 1);
    assert_eq!(status.jobs.processed, 1);
    assert!(status.is_drained());

    shutdown(pool, events).await;
}

#[tokio::test]
async fn test_release_idle_shrinks_the_pool() {
    let (pool, mut events) = worker_pool(3, "echo", &[]);
    pool.start().await.unwrap();
    for _ in 0..3 {
        wait_for(&mut events, |e| matches!(e, PoolEvent::Started { .. })).await;
    }

    assert_eq!(pool.release_idle(Some(2)).await.unwrap(), 2);
    assert_eq!(pool.status().await.unwrap().workers.created, 1);

    for _ in 0..2 {
        let event = wait_for(&mut events, |e| matches!(e, PoolEvent::Exit { .. })).await;
        assert!(matches!(event, PoolEvent::Exit { code: Some(0), .. }));
    }

    shutdown(pool, events).await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_killed_worker_gives_its_job_back() {
    let (pool, mut events) = worker_pool(1, "slow", &["--delay-ms", "1500"]);
    pool.submit(json!("survivor")).unwrap();
    pool.start().await.unwrap();
    wait_for(&mut events, |e| matches!(e, PoolEvent::Started { .. })).await;

    let status = pool.status().await.unwrap();
    assert_eq!(status.jobs.assigned, 1);
    assert_eq!(status.workers.busy, 1);

    let pid = pool.workers().await.unwrap()[0].pid.unwrap();
    let killed = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    wait_for(&mut events, |e| matches!(e, PoolEvent::Exit { .. })).await;
    let status = pool.status().await.unwrap();
    assert_eq!(status.workers.created, 0);
    assert_eq!(status.jobs.assigned, 0);
    assert_eq!(status.jobs.pending, 1);
    assert_eq!(status.jobs.failed, 0);

    // A fresh worker picks the job up again
    assert_eq!(pool.start().await.unwrap(), 1);
    let event = wait_for(&mut events, |e| matches!(e, PoolEvent::Data { .. })).await;
    assert_eq!(
        event,
        PoolEvent::Data {
            input: json!("survivor"),
            output: json!({"echoOf": "survivor"}),
        }
    );

    shutdown(pool, events).await;
}
