//! Example: embedding the runtime in a host event loop

use cadenza::channel::Channel;
use cadenza::{RuntimeBuilder, Turn};

fn main() -> Result<(), cadenza::Error> {
    // Tasks wait for host events between turns, so "everything parked" is
    // not a deadlock here.
    let runtime = RuntimeBuilder::new().deadlock_detection(false).build();
    let clicks = Channel::new(0);

    let rx = clicks.clone();
    runtime.spawn(async move {
        let mut count = 0;
        while let Some(button) = rx.recv().await {
            count += 1;
            println!("click #{count} on {button}");
        }
        println!("event source closed after {count} clicks");
    });

    // Let the listener reach its first receive.
    runtime.turn()?;

    for button in ["ok", "cancel", "ok"] {
        let tx = clicks.clone();
        runtime
            .handle()
            .dispatch_callback(async move { tx.send(button).await })?;

        match runtime.turn()? {
            Turn::Idle => {}
            other => println!("unexpected turn result: {other:?}"),
        }
    }

    runtime
        .handle()
        .dispatch_callback(async move { clicks.close() })?;

    assert_eq!(runtime.turn()?, Turn::Done);
    Ok(())
}
