mod common;

use cadenza::channel::Channel;
use cadenza::task;
use cadenza::time::{Elapsed, sleep, timeout};
use cadenza::unwind::Unwinding;

use std::time::{Duration, Instant};

#[cadenza::test]
async fn sleep_waits_at_least_the_duration() {
    common::init_tracing();

    let start = Instant::now();
    sleep(Duration::from_millis(20)).await;

    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[cadenza::test]
async fn sleeps_wake_in_deadline_order() {
    let ch = Channel::unbounded();

    for (label, ms) in [("slow", 30), ("fast", 5), ("medium", 15)] {
        let tx = ch.clone();
        task::spawn(async move {
            sleep(Duration::from_millis(ms)).await;
            tx.send(label).await
        });
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(ch.recv().await.unwrap());
    }

    assert_eq!(seen, ["fast", "medium", "slow"]);
}

#[cadenza::test]
async fn timeout_completes_before_deadline() {
    let handle = task::spawn(async {
        sleep(Duration::from_millis(10)).await;
        Ok::<_, Unwinding>(123)
    });

    let result = timeout(Duration::from_millis(500), handle).await;

    assert_eq!(result, Ok(Ok(123)), "timeout should return the task value");
}

#[cadenza::test]
async fn timeout_expires_and_withdraws_the_receive() {
    let ch = Channel::<u8>::new(0);

    let result = timeout(Duration::from_millis(10), ch.recv()).await;

    assert_eq!(result, Err(Elapsed));
    assert_eq!(ch.waiting_receivers(), 0, "expired receive must not stay registered");
}
