//! Integration tests for the named pipe and shared-memory samples
//!
//! Tests cover:
//! - Producer to consumer transfer through a FIFO, including a late producer
//! - Consumer cancellation while the FIFO open is pending
//! - Participants alternating on the shared counter

use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use ipc_samples_core::{
    consume, produce, take_turns, CancelToken, CounterRecord, FifoPlan, IpcError, OpControl,
    Operation, SharedCounter, Turn, TurnPlan,
};

// =============================================================================
// Named Pipe
// =============================================================================

#[tokio::test]
async fn test_late_producer() {
    let temp_dir = TempDir::new().unwrap();
    let plan = FifoPlan {
        path: temp_dir.path().join("pipename"),
        count: 3,
        interval: Duration::from_millis(1),
    };

    let consumer_plan = plan.clone();
    let consumer =
        tokio::spawn(async move { consume(&consumer_plan, &OpControl::unbounded()).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let written = assert_ok!(produce(&plan, 1234, &OpControl::unbounded()).await);
    let received = assert_ok!(consumer.await.unwrap());

    assert_eq!(received, written);
    assert_eq!(
        received,
        vec![
            CounterRecord::new(1234, 0),
            CounterRecord::new(1234, 1),
            CounterRecord::new(1234, 2)
        ]
    );
    assert!(!plan.path.exists());
}

#[tokio::test]
async fn test_cancel_consumer_waiting_for_producer() {
    let temp_dir = TempDir::new().unwrap();
    let plan = FifoPlan::new(temp_dir.path().join("pipename"));

    let token = CancelToken::new();
    let control = OpControl::unbounded().with_cancel(token.clone());
    let consumer_plan = plan.clone();
    let consumer = tokio::spawn(async move { consume(&consumer_plan, &control).await });

    while !plan.path.exists() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    // Let the blocking open start waiting for a writer.
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let err = assert_err!(consumer.await.unwrap());
    assert!(matches!(
        err,
        IpcError::Cancelled {
            operation: Operation::Open
        }
    ));
    assert!(!plan.path.exists());
}

// =============================================================================
// Shared Memory
// =============================================================================

#[tokio::test]
async fn test_participants_alternate() {
    let name = format!("/ipc-samples-it-{}", std::process::id());
    let counter = SharedCounter::new(name).unwrap();
    counter.initialize(CounterRecord::UNOWNED).unwrap();

    let plan = TurnPlan {
        counter: counter.clone(),
        rounds: 6,
        interval: Duration::from_millis(2),
    };

    let (a, b) = tokio::join!(take_turns(&plan, 1), take_turns(&plan, 2));
    let (a, b) = (a.unwrap(), b.unwrap());

    let advances = a
        .iter()
        .chain(b.iter())
        .filter(|turn| matches!(turn, Turn::Advanced { .. }))
        .count();
    let last = counter.read().unwrap();
    assert_eq!(usize::try_from(last.counter).unwrap(), advances);
    assert!(last.pid == 1 || last.pid == 2);

    // Each participant's first turn advances: the counter starts unowned.
    assert!(matches!(a[0], Turn::Advanced { .. }) || matches!(b[0], Turn::Advanced { .. }));

    // Nobody advances twice in a row: `from` is never the participant itself.
    for (participant, turns) in [(1, &a), (2, &b)] {
        for turn in turns {
            if let Turn::Advanced { from, .. } = turn {
                assert_ne!(*from, participant);
            }
        }
    }

    assert!(counter.unlink().unwrap());
}
