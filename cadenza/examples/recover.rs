//! Example: deferred actions and recovery across suspension points

use cadenza::channel::Channel;
use cadenza::task;
use cadenza::unwind::{self, Unwinding, defer, intercept, raise};
use cadenza::yield_now;

async fn parse_all(input: Channel<&'static str>) -> Result<Vec<u32>, Unwinding> {
    let mut parsed = Vec::new();

    while let Some(text) = input.recv().await {
        let value = text
            .parse::<u32>()
            .map_err(|_| raise(format!("not a number: {text}")))?;
        parsed.push(value);
    }

    Ok(parsed)
}

#[cadenza::main]
async fn main() -> Result<(), Unwinding> {
    let input = Channel::new(1);

    let tx = input.clone();
    task::spawn(async move {
        for text in ["1", "2", "three", "4"] {
            tx.send(text).await?;
            yield_now().await;
        }
        tx.close()
    });

    let outcome = unwind::scope(async move {
        defer(|| {
            println!("cleanup runs whether or not parsing failed");
            if let Some(unwinding) = intercept() {
                println!("recovered from: {unwinding}");
            }
        });

        parse_all(input).await
    })
    .await?;

    match outcome {
        Some(values) => println!("parsed {values:?}"),
        None => println!("parsing was abandoned"),
    }

    Ok(())
}
