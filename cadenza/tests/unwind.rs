mod common;

use cadenza::channel::Channel;
use cadenza::error::{Error, JoinError};
use cadenza::unwind::{self, Unwinding, defer, intercept, raise};
use cadenza::{FaultPolicy, RuntimeBuilder, task, yield_now};

use std::cell::RefCell;
use std::rc::Rc;

#[cadenza::test]
async fn deferred_action_survives_suspension() -> Result<(), Unwinding> {
    common::init_tracing();

    let ch = Channel::new(0);
    let tx = ch.clone();
    task::spawn(async move {
        yield_now().await;
        tx.send(1).await
    });

    let log = Rc::new(RefCell::new(Vec::new()));

    let body_log = log.clone();
    let out = unwind::scope(async move {
        let action_log = body_log.clone();
        defer(move || {
            let recovered = intercept().map(|u| u.to_string()).unwrap_or_default();
            action_log.borrow_mut().push(format!("recovered {recovered}"));
        });

        let value = ch.recv().await;
        body_log.borrow_mut().push(format!("got {value:?}"));

        Err::<(), _>(raise("after resume"))
    })
    .await?;

    assert_eq!(out, None);
    assert_eq!(*log.borrow(), ["got Some(1)", "recovered after resume"]);
    Ok(())
}

#[cadenza::test]
async fn actions_registered_after_resume_join_their_own_frame() -> Result<(), Unwinding> {
    let order = Rc::new(RefCell::new(Vec::new()));

    let outer = order.clone();
    let out = unwind::scope(async move {
        let o = outer.clone();
        defer(move || o.borrow_mut().push("outer"));

        let inner = outer.clone();
        let nested = unwind::scope(async move {
            yield_now().await;
            let i = inner.clone();
            defer(move || i.borrow_mut().push("inner"));
            Ok::<_, Unwinding>(1)
        })
        .await?;

        outer.borrow_mut().push("between");
        Ok::<_, Unwinding>(nested)
    })
    .await?;

    assert_eq!(out, Some(Some(1)));
    assert_eq!(*order.borrow(), ["inner", "between", "outer"]);
    Ok(())
}

#[cadenza::test]
async fn task_root_frame_can_recover() {
    let handle = task::spawn(async {
        defer(|| {
            intercept();
        });
        yield_now().await;
        Err::<u8, _>(raise("lost"))
    });

    assert_eq!(handle.await, Err(JoinError::Recovered));
}

#[cadenza::test]
async fn uncaught_unwind_terminates_only_its_task() {
    let failing = task::spawn(async { Err::<(), _>(raise("boom")) });
    let healthy = task::spawn(async { Ok::<_, Unwinding>("fine") });

    assert_eq!(
        failing.await,
        Err(JoinError::Unwound {
            message: "boom".to_owned()
        })
    );
    assert_eq!(healthy.await, Ok("fine"));
}

#[test]
fn unwind_escaping_main_task_surfaces_its_value() {
    let runtime = RuntimeBuilder::new().build();

    let err = runtime
        .block_on(async { Err::<(), _>(raise(42_i32)) })
        .unwrap_err();

    let Error::Unwound { unwinding, .. } = err else {
        panic!("expected an uncaught unwind");
    };
    assert_eq!(unwinding.downcast_ref::<i32>(), Some(&42));
}

#[test]
fn abort_policy_stops_runtime_on_any_uncaught_unwind() {
    let runtime = RuntimeBuilder::new()
        .fault_policy(FaultPolicy::Abort)
        .build();

    let err = runtime
        .block_on(async {
            task::spawn(async { Err::<(), _>(raise("background")) });
            yield_now().await;
            yield_now().await;
        })
        .unwrap_err();

    assert!(
        matches!(&err, Error::Unwound { unwinding, .. } if unwinding.message() == "background"),
        "unexpected error: {err:?}"
    );
}

#[test]
fn last_task_unwinding_fails_run() {
    let runtime = RuntimeBuilder::new().build();

    runtime.spawn(async { Ok::<_, Unwinding>(()) });
    runtime.spawn(async {
        yield_now().await;
        Err::<(), _>(raise("last one"))
    });

    let err = runtime.run().unwrap_err();
    assert!(matches!(err, Error::Unwound { .. }), "unexpected error: {err:?}");
}

#[cadenza::test]
async fn nested_unwind_replaces_original_when_not_intercepted() {
    let out = unwind::scope(async {
        defer(|| -> Result<(), Unwinding> { Err(raise("second")) });
        yield_now().await;
        Err::<(), _>(raise("first"))
    })
    .await;

    assert_eq!(out.unwrap_err().message(), "second");
}

#[cadenza::test]
async fn root_action_may_defer_further_cleanup() {
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    let handle = task::spawn(async move {
        let action = o.clone();
        defer(move || {
            action.borrow_mut().push("action");
            let nested = action.clone();
            defer(move || nested.borrow_mut().push("nested"));
        });

        yield_now().await;
        o.borrow_mut().push("body");
        Ok::<_, Unwinding>(5)
    });

    assert_eq!(handle.await, Ok(5));
    assert_eq!(*order.borrow(), ["body", "action", "nested"]);
}

#[cadenza::test]
async fn cleanup_deferred_inside_protected_action_runs_before_frame_returns() -> Result<(), Unwinding> {
    let order = Rc::new(RefCell::new(Vec::new()));

    yield_now().await;

    let o = order.clone();
    let out = unwind::protect(move || {
        let action = o.clone();
        defer(move || {
            let recovered = intercept().map(|u| u.to_string()).unwrap_or_default();
            action.borrow_mut().push(format!("recovered {recovered}"));
            let nested = action.clone();
            defer(move || nested.borrow_mut().push("nested".to_owned()));
        });
        Err::<(), _>(raise("boom"))
    })?;
    order.borrow_mut().push("after".to_owned());

    assert_eq!(out, None);
    assert_eq!(*order.borrow(), ["recovered boom", "nested", "after"]);
    Ok(())
}
