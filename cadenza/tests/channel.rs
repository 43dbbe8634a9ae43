mod common;

use cadenza::channel::{Channel, TryRecv};
use cadenza::error::{JoinError, UsageError};
use cadenza::task::{self, TaskState};
use cadenza::unwind::Unwinding;
use cadenza::{Handle, yield_now};

#[cadenza::test]
async fn capacity_one_send_parks_until_receive() -> Result<(), Unwinding> {
    common::init_tracing();

    let ch = Channel::new(1);

    // Fits in the buffer: completes without parking.
    ch.send(5).await?;
    assert_eq!(ch.len(), 1);

    let tx = ch.clone();
    let sender = task::spawn(async move { tx.send(6).await });

    yield_now().await;
    assert_eq!(ch.waiting_senders(), 1, "second send should park on a full buffer");
    assert_eq!(
        Handle::current().task_state(sender.id()),
        Some(TaskState::Suspended)
    );

    assert_eq!(ch.recv().await, Some(5));
    assert_eq!(ch.len(), 1, "the parked value moves into the buffer");
    assert_eq!(ch.waiting_senders(), 0);
    assert_eq!(
        Handle::current().task_state(sender.id()),
        Some(TaskState::Queued),
        "receiving resumes the parked sender"
    );

    assert_eq!(sender.await, Ok(()));
    assert_eq!(ch.try_recv(), TryRecv::Value(6));
    Ok(())
}

#[cadenza::test]
async fn buffered_values_are_received_in_order() -> Result<(), Unwinding> {
    let ch = Channel::new(3);
    for v in [1, 2, 3] {
        ch.send(v).await?;
    }

    assert_eq!(ch.recv().await, Some(1));
    assert_eq!(ch.len(), 2);
    assert_eq!(ch.recv().await, Some(2));
    assert_eq!(ch.recv().await, Some(3));
    assert!(ch.is_empty());
    Ok(())
}

#[cadenza::test]
async fn buffer_never_exceeds_capacity() -> Result<(), Unwinding> {
    let ch = Channel::new(2);
    let tx = ch.clone();

    let producer = task::spawn(async move {
        for v in 0..10 {
            tx.send(v).await?;
            assert!(tx.len() <= tx.capacity());
        }
        tx.close()
    });

    let mut received = Vec::new();
    while let Some(v) = ch.recv().await {
        assert!(ch.len() <= ch.capacity());
        received.push(v);
    }

    assert_eq!(received, (0..10).collect::<Vec<_>>());
    assert_eq!(producer.await, Ok(()));
    Ok(())
}

#[cadenza::test]
async fn send_to_waiting_receiver_bypasses_buffer() -> Result<(), Unwinding> {
    let ch = Channel::new(2);
    let rx = ch.clone();

    let receiver = task::spawn(async move { Ok::<_, Unwinding>(rx.recv().await) });

    yield_now().await;
    assert_eq!(ch.waiting_receivers(), 1);

    ch.send(9).await?;
    assert_eq!(ch.len(), 0, "direct hand-off leaves the buffer untouched");
    assert_eq!(ch.waiting_receivers(), 0);

    assert_eq!(receiver.await, Ok(Some(9)));
    Ok(())
}

#[cadenza::test]
async fn rendezvous_channel_pairs_senders_and_receivers() -> Result<(), Unwinding> {
    let ch = Channel::new(0);
    let tx = ch.clone();

    let sender = task::spawn(async move {
        for word in ["ping", "pong"] {
            tx.send(word).await?;
        }
        Ok::<_, Unwinding>(())
    });

    assert_eq!(ch.recv().await, Some("ping"));
    assert_eq!(ch.recv().await, Some("pong"));
    assert_eq!(sender.await, Ok(()));
    Ok(())
}

#[cadenza::test]
async fn close_resumes_every_parked_receiver() -> Result<(), Unwinding> {
    let ch = Channel::<u32>::new(0);

    let receivers: Vec<_> = (0..3)
        .map(|_| {
            let rx = ch.clone();
            task::spawn(async move { Ok::<_, Unwinding>(rx.recv().await) })
        })
        .collect();

    yield_now().await;
    assert_eq!(ch.waiting_receivers(), 3);

    ch.close()?;

    for receiver in receivers {
        assert_eq!(receiver.await, Ok(None));
    }

    // Closed and empty: returns immediately.
    assert_eq!(ch.recv().await, None);
    Ok(())
}

#[cadenza::test]
async fn close_keeps_buffered_values() -> Result<(), Unwinding> {
    let ch = Channel::new(2);
    ch.send('x').await?;
    ch.close()?;

    assert_eq!(ch.recv().await, Some('x'));
    assert_eq!(ch.recv().await, None);
    Ok(())
}

#[cadenza::test]
async fn send_on_closed_channel_fails_even_with_room() {
    let ch = Channel::new(4);
    ch.close().unwrap();

    let err = ch.send(1).await.unwrap_err();
    assert_eq!(err.usage_error(), Some(UsageError::SendOnClosed));
    assert!(ch.is_empty());
}

#[cadenza::test]
async fn close_of_closed_channel_fails() {
    let ch = Channel::<()>::new(0);
    ch.close().unwrap();

    let err = ch.close().unwrap_err();
    assert_eq!(err.usage_error(), Some(UsageError::CloseOfClosed));
    assert!(!err.is_interceptable());
}

#[cadenza::test]
async fn parked_sender_fails_when_channel_closes() {
    let ch = Channel::new(0);
    let tx = ch.clone();

    let sender = task::spawn(async move { tx.send(1).await });

    yield_now().await;
    assert_eq!(ch.waiting_senders(), 1);

    ch.close().unwrap();

    assert_eq!(
        sender.await,
        Err(JoinError::Unwound {
            message: "send on closed channel".to_owned()
        })
    );
}
