//! Example: a producer and two workers talking through channels

use cadenza::channel::Channel;
use cadenza::task;
use cadenza::unwind::Unwinding;

#[cadenza::main]
async fn main() -> Result<(), Unwinding> {
    let jobs = Channel::new(2);
    let results = Channel::unbounded();

    let workers: Vec<_> = (0..2)
        .map(|id| {
            let jobs = jobs.clone();
            let results = results.clone();
            task::spawn(async move {
                while let Some(n) = jobs.recv().await {
                    results.send(format!("worker {id}: {n} squared is {}", n * n)).await?;
                }
                Ok::<_, Unwinding>(())
            })
        })
        .collect();

    for n in 1..=6 {
        jobs.send(n).await?;
    }
    jobs.close()?;

    for worker in workers {
        if let Err(error) = worker.await {
            eprintln!("worker failed: {error}");
        }
    }
    results.close()?;

    while let Some(line) = results.recv().await {
        println!("{line}");
    }

    Ok(())
}
