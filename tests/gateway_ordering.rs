//! Cross-thread invocation against a live session.

mod common;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;
use std::time::Duration;

use apploop_harness::prelude::*;
use common::{session_config, start_routinebox};

#[test]
fn sequential_writes_apply_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = start_routinebox(session_config(dir.path()), "0").unwrap();
    let handle = session.handle().unwrap();

    for i in 0..5 {
        handle.write(move |app| app.log.push(i)).unwrap();
    }
    assert_eq!(handle.read(|app| app.log.clone()).unwrap(), vec![0, 1, 2, 3, 4]);

    session.teardown().unwrap();
}

#[test]
fn concurrent_drivers_keep_their_own_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = start_routinebox(session_config(dir.path()), "0").unwrap();
    let handle = session.handle().unwrap();

    let workers: Vec<_> = (0..4u32)
        .map(|t| {
            let handle = handle.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    handle.write(move |app| app.log.push(t * 100 + i)).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let log = handle.read(|app| app.log.clone()).unwrap();
    assert_eq!(log.len(), 100);
    for t in 0..4u32 {
        let mine: Vec<u32> = log.iter().copied().filter(|v| v / 100 == t).collect();
        let expected: Vec<u32> = (0..25).map(|i| t * 100 + i).collect();
        assert_eq!(mine, expected, "driver {t} reordered");
    }

    session.teardown().unwrap();
}

#[test]
fn invocation_from_the_loop_thread_runs_inline() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = start_routinebox(session_config(dir.path()), "0").unwrap();
    let handle = session.handle().unwrap();

    let inner = handle.gateway().clone();
    let (on_loop, nested) = handle
        .run_on_app_thread(move |_| {
            let on_loop = inner.is_app_thread();
            let nested = inner.write(|app| {
                app.log.push(7);
                app.log.len()
            });
            (on_loop, nested)
        })
        .unwrap();
    assert!(on_loop);
    assert_eq!(nested.unwrap(), 1);
    assert!(!handle.gateway().is_app_thread());

    session.teardown().unwrap();
}

#[test]
fn panicking_callable_surfaces_as_error_and_loop_survives() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = start_routinebox(session_config(dir.path()), "0").unwrap();
    let handle = session.handle().unwrap();

    let err = handle
        .write(|app| {
            app.log.push(1);
            panic!("routine table corrupted");
        })
        .unwrap_err();
    assert_eq!(err.code(), "ALH-2101");
    assert_eq!(err.origin(), FailureOrigin::Application);
    assert!(err.to_string().contains("routine table corrupted"), "{err}");
    assert!(err.to_string().contains("alh-app"), "{err}");

    // The loop keeps serving after a failed invocation.
    assert_eq!(handle.read(|app| app.log.clone()).unwrap(), vec![1]);

    let payload = catch_unwind(AssertUnwindSafe(|| {
        handle.call(|_| -> u32 { panic!("assertion on loop thread") })
    }))
    .unwrap_err();
    assert_eq!(
        payload.downcast_ref::<&str>().copied(),
        Some("assertion on loop thread")
    );

    session.teardown().unwrap();
}

#[test]
fn poller_observes_state_changed_later_by_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = session_config(dir.path());
    config.poll.timeout_ms = 300;
    let mut session = start_routinebox(config, "0").unwrap();
    let handle = session.handle().unwrap();

    handle
        .run_on_app_thread(|cx| {
            cx.single_shot(Duration::from_millis(60), |cx| {
                let _ = cx.with_app_mut(|app| app.log.push(99));
            });
        })
        .unwrap();
    assert!(!handle.read(|app| app.log.contains(&99)).unwrap());

    let outcome = session
        .wait_until_app("late log entry", |app| app.log.contains(&99))
        .unwrap();
    assert!(outcome.elapsed >= Duration::from_millis(40), "{outcome:?}");
    assert!(outcome.polls > 1);

    let err = session
        .wait_until_app("entry that never appears", |app| app.log.contains(&1000))
        .map(|_| ())
        .unwrap_err();
    assert!(err.is_timeout());

    session.teardown().unwrap();
}
