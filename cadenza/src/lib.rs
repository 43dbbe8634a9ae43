//! # Cadenza
//!
//! **Cadenza** is a cooperative, single-threaded task runtime. Many
//! independent tasks interleave on one thread, talk through bounded
//! channels, park and resume without OS threads, and propagate structured
//! abrupt terminations ("unwinds") that deferred actions can recover from,
//! across suspension points.
//!
//! It offers:
//!
//! - A **run queue** drained on demand by the host ([`Handle::turn`]) or by
//!   the blocking drivers ([`Runtime::block_on`], [`Runtime::run`])
//! - **Channels** with rendezvous or buffered capacity and FIFO wait queues
//! - **Select** over several channel operations, with random tie-breaking
//! - **Unwinds** with deferred actions and interception ([`unwind`])
//! - **Deadlock detection** when every task is parked and no timer is armed
//! - **Timers**: sleep and timeout
//! - **Entry-point macros**: `#[cadenza::main]` and `#[cadenza::test]`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadenza::channel::Channel;
//! use cadenza::task;
//! use cadenza::unwind::Unwinding;
//!
//! #[cadenza::main]
//! async fn main() -> Result<(), Unwinding> {
//!     let ch = Channel::new(0);
//!     let tx = ch.clone();
//!
//!     task::spawn(async move {
//!         tx.send("hello").await?;
//!         tx.close()
//!     });
//!
//!     while let Some(msg) = ch.recv().await {
//!         println!("{msg}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: channels and select
//! - [`unwind`]: raise, defer, intercept, frames
//! - [`suspend`]: bare suspension points
//! - [`time`]: sleep and timeout
//! - [`task`]: spawning and joining tasks
//! - [`error`]: error types

mod runtime;

pub mod channel;
pub mod error;
pub mod suspend;
pub mod time;
pub mod unwind;

pub use channel::{Case, Channel, select};
pub use error::{Error, JoinError, UsageError};
pub use runtime::builder::{FaultPolicy, RuntimeBuilder, SEED_ENV};
pub use runtime::task;
pub use runtime::yield_now::yield_now;
pub use runtime::{Handle, Runtime, Stats, Turn};

pub use cadenza_macros::*;
