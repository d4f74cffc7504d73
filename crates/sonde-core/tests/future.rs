//! Tests for one-shot promises and futures

use std::cell::RefCell;
use std::rc::Rc;

use sonde_core::error::SondeError;
use sonde_core::future::{Future, Promise};

#[test]
fn test_continuations_run_in_order_on_set()
{
    let promise = Promise::new();
    let future = promise.future();
    let log = Rc::new(RefCell::new(Vec::new()));

    for tag in ["first", "second"] {
        let log = log.clone();
        future.then(move |result: &Result<u32, SondeError>| {
            log.borrow_mut().push(format!("{tag}:{}", result.as_ref().copied().unwrap_or(0)));
        });
    }
    assert!(log.borrow().is_empty());
    assert!(!future.is_ready());

    promise.set_value(7).unwrap();
    assert_eq!(*log.borrow(), vec!["first:7", "second:7"]);
    assert!(future.is_ready());
    assert_eq!(future.get().unwrap(), 7);
}

#[test]
fn test_late_continuation_runs_immediately()
{
    let future = Future::ready("done");
    let seen = Rc::new(RefCell::new(None));
    let sink = seen.clone();
    future.then(move |result| *sink.borrow_mut() = result.as_ref().ok().copied());
    assert_eq!(*seen.borrow(), Some("done"));
}

#[test]
fn test_continuation_may_chain_another()
{
    let promise = Promise::new();
    let future = promise.future();
    let downstream = Promise::new();
    let relay = downstream.future();

    future.then(move |result: &Result<u32, SondeError>| {
        let value = *result.as_ref().unwrap_or(&0);
        downstream.set_value(value * 2).unwrap();
    });
    promise.set_value(21).unwrap();

    assert_eq!(relay.get().unwrap(), 42);
}

#[test]
fn test_errors_propagate()
{
    let promise: Promise<u32> = Promise::new();
    let future = promise.future();
    promise.set_error(SondeError::NotFound("value".into())).unwrap();
    assert!(matches!(future.get(), Err(SondeError::NotFound(_))));
}

#[test]
fn test_get_on_unset_future_is_a_deadlock()
{
    let promise: Promise<u32> = Promise::new();
    let error = promise.future().get().unwrap_err();
    assert!(matches!(error, SondeError::Deadlock(_)), "{error}");
    assert!(!promise.is_set());
}

#[test]
fn test_promise_sets_once_and_result_is_taken_once()
{
    let promise = Promise::new();
    let first = promise.future();
    let second = promise.future();

    promise.set_value(String::from("x")).unwrap();
    assert!(matches!(promise.set_value(String::from("y")), Err(SondeError::InvalidArgument(_))));

    assert_eq!(first.get().unwrap(), "x");
    assert!(matches!(second.get(), Err(SondeError::InvalidArgument(_))));
    assert!(promise.is_set());
    assert!(matches!(promise.set_error(SondeError::NotStopped), Err(SondeError::InvalidArgument(_))));
}
