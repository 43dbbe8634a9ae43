use super::Runtime;

use std::env;

/// Environment variable overriding the select seed when none is configured.
pub const SEED_ENV: &str = "CADENZA_SEED";

/// What the runtime does when an unwind escapes a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Only the failing task terminates. The runtime fails when the task was
    /// the one a driver waits on, or the last live task.
    #[default]
    Isolate,

    /// Any uncaught unwind stops the runtime.
    Abort,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Config {
    pub(crate) seed: Option<u64>,
    pub(crate) fault_policy: FaultPolicy,
    pub(crate) deadlock_detection: bool,
}

/// Builder for configuring and creating a runtime.
///
/// # Examples
///
/// ```rust,ignore
/// let runtime = RuntimeBuilder::new()
///     .seed(42)
///     .fault_policy(FaultPolicy::Abort)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeBuilder {
    /// Seed of the generator breaking ties between ready select cases.
    seed: Option<u64>,

    fault_policy: FaultPolicy,

    deadlock_detection: bool,
}

impl RuntimeBuilder {
    /// Creates a new `RuntimeBuilder` with default configuration.
    ///
    /// The select generator is seeded from [`SEED_ENV`] when it holds an
    /// integer, and from operating system entropy otherwise.
    pub fn new() -> Self {
        let seed = env::var(SEED_ENV).ok().and_then(|raw| match raw.trim().parse() {
            Ok(seed) => Some(seed),
            Err(error) => {
                tracing::warn!(var = SEED_ENV, %raw, %error, "ignoring malformed seed");
                None
            }
        });

        Self {
            seed,
            fault_policy: FaultPolicy::default(),
            deadlock_detection: true,
        }
    }

    /// Seeds the generator used to choose among ready select cases, making
    /// the choice reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the [`FaultPolicy`]. Defaults to [`FaultPolicy::Isolate`].
    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    /// Enables or disables deadlock detection. Enabled by default.
    ///
    /// Hosts that wake tasks from outside, through
    /// [`Handle::dispatch_callback`](super::Handle::dispatch_callback), may
    /// legitimately leave every task parked between turns.
    pub fn deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    pub(crate) fn config(&self) -> Config {
        Config {
            seed: self.seed,
            fault_policy: self.fault_policy,
            deadlock_detection: self.deadlock_detection,
        }
    }

    /// Builds the runtime with the configured options.
    pub fn build(self) -> Runtime {
        tracing::debug!(config = ?self.config(), "building runtime");
        Runtime::new(self.config())
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
