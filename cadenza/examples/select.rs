//! Example: select between a channel, a ticker and a default case

use cadenza::channel::{Case, Channel, select};
use cadenza::task;
use cadenza::time::sleep;
use cadenza::unwind::Unwinding;

use std::time::Duration;

#[cadenza::main(seed = 1)]
async fn main() -> Result<(), Unwinding> {
    let messages = Channel::new(0);
    let ticks = Channel::new(1);

    let tx = messages.clone();
    task::spawn(async move {
        for word in ["alpha", "beta", "gamma"] {
            sleep(Duration::from_millis(30)).await;
            tx.send(word).await?;
        }
        tx.close()
    });

    let tick = ticks.clone();
    task::spawn(async move {
        for _ in 0..5 {
            sleep(Duration::from_millis(20)).await;
            tick.send(()).await?;
        }
        Ok::<_, Unwinding>(())
    });

    // Nothing is ready yet: the default case runs.
    let first = select(vec![
        Case::recv(&messages, |m| format!("message {m:?}")),
        Case::default(|| "nothing ready".to_owned()),
    ])
    .await?;
    println!("{first}");

    loop {
        let done = select(vec![
            Case::recv(&messages, |m| match m {
                Some(m) => {
                    println!("message: {m}");
                    false
                }
                None => true,
            }),
            Case::recv(&ticks, |_| {
                println!("tick");
                false
            }),
        ])
        .await?;

        if done {
            break;
        }
    }

    Ok(())
}
