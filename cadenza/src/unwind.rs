//! Structured abrupt termination with recovery points.
//!
//! An unwind is an [`Unwinding`] value travelling up the call chain as the
//! `Err` side of a `Result`, so it crosses suspension points with plain `?`.
//! Frames ([`scope`] for async bodies, [`protect`] for synchronous ones) own
//! a LIFO stack of deferred actions registered with [`defer`]. When a frame
//! exits, its actions run; an action running because of an in-flight unwind
//! may absorb it with [`intercept`].
//!
//! Per task the engine keeps:
//! - the chain of frames whose body is currently being polled,
//! - a stack of in-flight unwind values,
//! - a stack of markers telling [`intercept`] which in-flight value (if any)
//!   the running code is allowed to absorb.
//!
//! An action that fails while handling an unwind pushes its own value on top
//! of the in-flight stack. The newest value is handled first; if it is
//! intercepted the older one resumes, otherwise the newest wins and the older
//! values are dropped.
//!
//! ```rust,ignore
//! use cadenza::unwind::{defer, intercept, protect, raise};
//!
//! let out = protect(|| {
//!     defer(|| {
//!         if let Some(unwinding) = intercept() {
//!             println!("recovered: {unwinding}");
//!         }
//!     });
//!     Err::<(), _>(raise("boom"))
//! });
//! assert!(matches!(out, Ok(None)));
//! ```

use crate::error::UsageError;
use crate::runtime::context;

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// An abrupt termination travelling up the call chain.
pub struct Unwinding {
    payload: Box<dyn Any>,
    message: String,
    usage: Option<UsageError>,
}

impl Unwinding {
    /// Builds the unwind raised by a misused primitive.
    ///
    /// Usage errors are reported as soon as they are raised and can never be
    /// intercepted.
    pub(crate) fn usage(error: UsageError) -> Self {
        tracing::error!(%error, "usage error");

        Self {
            payload: Box::new(error),
            message: error.to_string(),
            usage: Some(error),
        }
    }

    /// The raised value.
    pub fn payload(&self) -> &dyn Any {
        self.payload.as_ref()
    }

    /// Returns the raised value if it has type `V`.
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.payload.downcast_ref()
    }

    /// Takes the raised value out if it has type `V`.
    pub fn downcast<V: Any>(self) -> Result<V, Self> {
        match self.payload.downcast::<V>() {
            Ok(value) => Ok(*value),
            Err(payload) => Err(Self { payload, ..self }),
        }
    }

    /// Rendered form of the raised value, captured when it was raised.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The usage error behind this unwind, if it was raised by the runtime.
    pub fn usage_error(&self) -> Option<UsageError> {
        self.usage
    }

    /// Whether a deferred action may absorb this unwind.
    pub fn is_interceptable(&self) -> bool {
        self.usage.is_none()
    }
}

impl fmt::Debug for Unwinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unwinding")
            .field("value", &self.message)
            .field("usage", &self.usage)
            .finish()
    }
}

impl fmt::Display for Unwinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Unwinding {}

/// Starts an unwind carrying `value`.
///
/// The returned value is meant to be propagated as an error:
///
/// ```rust,ignore
/// return Err(raise("index out of range"));
/// ```
pub fn raise<V>(value: V) -> Unwinding
where
    V: Any + fmt::Debug,
{
    let any: &dyn Any = &value;
    let message = if let Some(text) = any.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = any.downcast_ref::<String>() {
        text.clone()
    } else {
        format!("{value:?}")
    };

    tracing::trace!(value = %message, "raise");

    Unwinding {
        payload: Box::new(value),
        message,
        usage: None,
    }
}

/// Result of a deferred action.
///
/// Implemented for `()` and for `Result<(), Unwinding>`, so actions can
/// either be plain cleanups or fail with a nested unwind.
pub trait DeferOutcome {
    fn into_outcome(self) -> Result<(), Unwinding>;
}

impl DeferOutcome for () {
    fn into_outcome(self) -> Result<(), Unwinding> {
        Ok(())
    }
}

impl DeferOutcome for Result<(), Unwinding> {
    fn into_outcome(self) -> Result<(), Unwinding> {
        self
    }
}

type Deferred = Box<dyn FnOnce() -> Result<(), Unwinding>>;

/// One frame: the deferred actions registered while its body ran.
#[derive(Default)]
pub(crate) struct Frame {
    deferred: RefCell<Vec<Deferred>>,
}

/// What the code currently running is allowed to intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    /// Ordinary code: a frame body, or an action run on a normal exit.
    Plain,

    /// A deferred action running because of the in-flight unwind at this
    /// index of the pending stack.
    Handler(usize),
}

/// Per-task unwind bookkeeping.
#[derive(Default)]
pub(crate) struct UnwindState {
    frames: Vec<Rc<Frame>>,
    pending: Vec<Unwinding>,
    markers: Vec<Marker>,
}

thread_local! {
    /// State used by frames entered outside of any task.
    static HOST_STATE: Rc<RefCell<UnwindState>> = Rc::new(RefCell::new(UnwindState::default()));
}

fn current_state() -> Rc<RefCell<UnwindState>> {
    context::unwind_state().unwrap_or_else(|| HOST_STATE.with(Rc::clone))
}

/// Pops the frame and marker pushed for a body, even if the body panics.
struct FrameGuard<'a>(&'a RefCell<UnwindState>);

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.borrow_mut();
        state.frames.pop();
        state.markers.pop();
    }
}

/// Truncates the in-flight stack back to the frame's base, even if a
/// deferred action panics.
struct PendingGuard<'a> {
    state: &'a RefCell<UnwindState>,
    base: usize,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.state.borrow_mut().pending.truncate(self.base);
    }
}

fn enter_frame<R>(
    state: &RefCell<UnwindState>,
    frame: &Rc<Frame>,
    marker: Marker,
    body: impl FnOnce() -> R,
) -> R {
    {
        let mut state = state.borrow_mut();
        state.frames.push(frame.clone());
        state.markers.push(marker);
    }

    let _guard = FrameGuard(state);
    body()
}

/// Runs the deferred actions of `frame` and settles the frame's result.
///
/// Each action runs as a frame of its own, so actions it defers are settled
/// before the next action of `frame` is taken.
fn exit_frame<T>(
    state: &RefCell<UnwindState>,
    frame: &Frame,
    result: Result<T, Unwinding>,
) -> Result<Option<T>, Unwinding> {
    let base = state.borrow().pending.len();
    let guard = PendingGuard { state, base };

    let value = match result {
        Ok(value) => Some(value),
        Err(unwinding) => {
            state.borrow_mut().pending.push(unwinding);
            None
        }
    };

    loop {
        let Some(action) = frame.deferred.borrow_mut().pop() else {
            break;
        };

        let marker = {
            let state = state.borrow();
            if state.pending.len() > base {
                Marker::Handler(state.pending.len() - 1)
            } else {
                Marker::Plain
            }
        };

        let action_frame = Rc::new(Frame::default());
        let outcome = enter_frame(state, &action_frame, marker, action);

        if let Err(nested) = exit_frame(state, &action_frame, outcome) {
            tracing::trace!(value = %nested, "unwind raised by a deferred action");
            state.borrow_mut().pending.push(nested);
        }
    }

    let mut left: Vec<Unwinding> = state.borrow_mut().pending.drain(base..).collect();
    drop(guard);

    match (left.pop(), value) {
        (Some(newest), _) => {
            for lost in left {
                tracing::debug!(lost = %lost, newest = %newest, "unwind superseded");
            }
            Err(newest)
        }
        (None, Some(value)) => Ok(Some(value)),
        (None, None) => Ok(None),
    }
}

/// Registers `action` to run when the innermost active frame exits.
///
/// Actions run in reverse registration order, whether the frame returns
/// normally or unwinds. Every task body is itself a frame.
///
/// # Panics
///
/// Panics if no frame is active on the current task or thread.
pub fn defer<F, R>(action: F)
where
    F: FnOnce() -> R + 'static,
    R: DeferOutcome,
{
    let state = current_state();
    let frame = state
        .borrow()
        .frames
        .last()
        .cloned()
        .expect("defer must be called inside an unwind frame");

    frame
        .deferred
        .borrow_mut()
        .push(Box::new(move || action().into_outcome()));
}

/// Absorbs the unwind the calling deferred action is running for.
///
/// Returns `None`, and leaves every in-flight unwind untouched, unless the
/// caller is a deferred action invoked because of the unwind currently on top
/// of the in-flight stack. Usage errors are never absorbed.
pub fn intercept() -> Option<Unwinding> {
    let state = current_state();
    let mut state = state.borrow_mut();

    let Some(&Marker::Handler(index)) = state.markers.last() else {
        return None;
    };

    if index + 1 != state.pending.len() || !state.pending[index].is_interceptable() {
        return None;
    }

    let unwinding = state.pending.pop();
    if let Some(unwinding) = &unwinding {
        tracing::trace!(value = %unwinding, "unwind intercepted");
    }
    unwinding
}

/// Runs a synchronous body as a frame.
///
/// Returns `Ok(Some(value))` when the body returned normally, `Ok(None)` when
/// a deferred action intercepted the unwind, and `Err` when an unwind is
/// still in flight after every action ran.
pub fn protect<T>(body: impl FnOnce() -> Result<T, Unwinding>) -> Result<Option<T>, Unwinding> {
    let state = current_state();
    let frame = Rc::new(Frame::default());

    let result = enter_frame(&state, &frame, Marker::Plain, body);
    exit_frame(&state, &frame, result)
}

/// Runs an asynchronous body as a frame.
///
/// The frame stays attached to the body across suspensions: actions deferred
/// after the body resumes still belong to it. See [`protect`] for the output.
pub fn scope<F, T>(body: F) -> Scope<F>
where
    F: Future<Output = Result<T, Unwinding>>,
{
    Scope {
        body: Box::pin(body),
        frame: Rc::new(Frame::default()),
    }
}

/// Future returned by [`scope`].
pub struct Scope<F> {
    body: Pin<Box<F>>,
    frame: Rc<Frame>,
}

impl<F, T> Future for Scope<F>
where
    F: Future<Output = Result<T, Unwinding>>,
{
    type Output = Result<Option<T>, Unwinding>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let state = current_state();
        let frame = this.frame.clone();

        match enter_frame(&state, &frame, Marker::Plain, || this.body.as_mut().poll(cx)) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => Poll::Ready(exit_frame(&state, &frame, result)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    fn log() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn deferred_actions_run_lifo_on_normal_exit() {
        let trace = log();

        let out = protect(|| {
            for name in ["first", "second", "third"] {
                let trace = trace.clone();
                defer(move || trace.borrow_mut().push(name.to_owned()));
            }
            Ok(7)
        });

        assert_eq!(out.unwrap(), Some(7));
        assert_eq!(*trace.borrow(), ["third", "second", "first"]);
    }

    #[test]
    fn unwind_runs_actions_and_propagates() {
        let trace = log();

        let t = trace.clone();
        let out: Result<Option<()>, _> = protect(move || {
            defer(move || t.borrow_mut().push("cleanup".to_owned()));
            Err(raise("boom"))
        });

        let unwinding = out.unwrap_err();
        assert_eq!(unwinding.message(), "boom");
        assert_eq!(unwinding.downcast_ref::<&str>(), Some(&"boom"));
        assert_eq!(*trace.borrow(), ["cleanup"]);
    }

    #[test]
    fn intercept_in_deferred_action_recovers() {
        let seen = Rc::new(RefCell::new(None));

        let s = seen.clone();
        let out: Result<Option<i32>, _> = protect(move || {
            defer(move || {
                *s.borrow_mut() = intercept().and_then(|u| u.downcast::<i32>().ok());
            });
            Err(raise(42))
        });

        assert!(matches!(out, Ok(None)));
        assert_eq!(*seen.borrow(), Some(42));
    }

    #[test]
    fn intercept_outside_unwind_is_noop() {
        assert!(intercept().is_none());

        let out = protect(|| {
            defer(|| assert!(intercept().is_none()));
            assert!(intercept().is_none());
            Ok(())
        });
        assert!(matches!(out, Ok(Some(()))));

        // A later unwind is unaffected by the earlier no-op calls.
        let out: Result<Option<()>, _> = protect(|| Err(raise("later")));
        assert_eq!(out.unwrap_err().message(), "later");
    }

    #[test]
    fn nested_unwind_intercepted_resumes_original() {
        let out: Result<Option<()>, _> = protect(|| {
            defer(|| {
                let nested = intercept().expect("nested unwind in flight");
                assert_eq!(nested.message(), "second");
            });
            defer(|| -> Result<(), Unwinding> { Err(raise("second")) });
            Err(raise("first"))
        });

        assert_eq!(out.unwrap_err().message(), "first");
    }

    #[test]
    fn nested_unwind_not_intercepted_wins() {
        let out: Result<Option<()>, _> = protect(|| {
            defer(|| -> Result<(), Unwinding> { Err(raise("second")) });
            Err(raise("first"))
        });

        assert_eq!(out.unwrap_err().message(), "second");
    }

    #[test]
    fn both_unwinds_intercepted_recovers_frame() {
        let out: Result<Option<()>, _> = protect(|| {
            defer(|| assert_eq!(intercept().unwrap().message(), "first"));
            defer(|| assert_eq!(intercept().unwrap().message(), "second"));
            defer(|| -> Result<(), Unwinding> { Err(raise("second")) });
            Err(raise("first"))
        });

        assert!(matches!(out, Ok(None)));
    }

    #[test]
    fn second_intercept_in_same_action_returns_none() {
        let out: Result<Option<()>, _> = protect(|| {
            defer(|| {
                assert!(intercept().is_some());
                assert!(intercept().is_none());
            });
            Err(raise("once"))
        });

        assert!(matches!(out, Ok(None)));
    }

    #[test]
    fn intercept_inside_nested_frame_body_does_not_absorb() {
        let out: Result<Option<()>, _> = protect(|| {
            defer(|| {
                let inner = protect(|| Ok(intercept().is_none()));
                assert!(matches!(inner, Ok(Some(true))));
                assert!(intercept().is_some());
            });
            Err(raise("outer"))
        });

        assert!(matches!(out, Ok(None)));
    }

    #[test]
    fn usage_errors_cannot_be_intercepted() {
        let out: Result<Option<()>, _> = protect(|| {
            defer(|| assert!(intercept().is_none()));
            Err(Unwinding::usage(UsageError::SendOnClosed))
        });

        let unwinding = out.unwrap_err();
        assert_eq!(unwinding.usage_error(), Some(UsageError::SendOnClosed));
        assert!(!unwinding.is_interceptable());
    }

    #[test]
    fn value_kept_when_deferred_unwind_is_intercepted() {
        let out = protect(|| {
            defer(|| assert!(intercept().is_some()));
            defer(|| -> Result<(), Unwinding> { Err(raise("late")) });
            Ok("value")
        });

        assert_eq!(out.unwrap(), Some("value"));
    }

    #[test]
    fn action_can_defer_at_outermost_frame() {
        let trace = log();

        let t = trace.clone();
        let out = protect(move || {
            defer(move || {
                t.borrow_mut().push("action".to_owned());
                let t = t.clone();
                defer(move || t.borrow_mut().push("nested".to_owned()));
            });
            Ok(())
        });

        assert!(matches!(out, Ok(Some(()))));
        assert_eq!(*trace.borrow(), ["action", "nested"]);
    }

    #[test]
    fn actions_deferred_by_actions_settle_depth_first() {
        let trace = log();

        let t = trace.clone();
        let out = protect(move || {
            let last = t.clone();
            defer(move || last.borrow_mut().push("outer-last".to_owned()));

            let inner = t.clone();
            protect(move || {
                defer(move || {
                    inner.borrow_mut().push("inner-action".to_owned());
                    let nested = inner.clone();
                    defer(move || nested.borrow_mut().push("nested-in-action".to_owned()));
                });
                Ok(())
            })?;

            t.borrow_mut().push("after-inner-frame".to_owned());
            Ok(())
        });

        assert!(matches!(out, Ok(Some(()))));
        assert_eq!(
            *trace.borrow(),
            ["inner-action", "nested-in-action", "after-inner-frame", "outer-last"]
        );
    }

    #[test]
    fn action_defers_its_own_recovery() {
        let out: Result<Option<()>, _> = protect(|| {
            defer(|| -> Result<(), Unwinding> {
                defer(|| assert_eq!(intercept().unwrap().message(), "from action"));
                Err(raise("from action"))
            });
            Err(raise("body"))
        });

        assert_eq!(out.unwrap_err().message(), "body");
    }

    #[test]
    fn action_deferred_during_handling_cannot_absorb_outer_unwind() {
        let out: Result<Option<()>, _> = protect(|| {
            defer(|| defer(|| assert!(intercept().is_none())));
            Err(raise("outer"))
        });

        assert_eq!(out.unwrap_err().message(), "outer");
    }

    #[test]
    fn panicking_action_leaves_no_unwind_in_flight() {
        let result = std::panic::catch_unwind(|| {
            let _ = protect(|| -> Result<(), Unwinding> {
                defer(|| -> Result<(), Unwinding> { panic!("cleanup failed") });
                Err(raise("pending"))
            });
        });

        assert!(result.is_err());

        let state = current_state();
        let state = state.borrow();
        assert!(state.pending.is_empty());
        assert!(state.frames.is_empty());
        assert!(state.markers.is_empty());
    }

    #[test]
    fn in_flight_stack_is_empty_after_frames_settle() {
        let _ = protect(|| -> Result<(), Unwinding> {
            defer(|| -> Result<(), Unwinding> { Err(raise("b")) });
            Err(raise("a"))
        });

        assert!(current_state().borrow().pending.is_empty());
    }
}
