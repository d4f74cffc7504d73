//! # One-shot Futures
//!
//! Single-threaded result slots for code that cannot block, such as the
//! cooperative scheduler of a simulated program.
//!
//! - Setting a result runs every queued continuation synchronously, in the
//!   order they were attached, on the setter's stack.
//! - A continuation attached after the result is set runs immediately.
//! - [`Future::get`] on an unset future fails with [`SondeError::Deadlock`]:
//!   in a single-threaded loop nothing could ever set it while the caller waits.
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use sonde_core::future::Promise;
//!
//! let promise = Promise::new();
//! let future = promise.future();
//! let seen = Rc::new(Cell::new(0));
//! let sink = seen.clone();
//! future.then(move |result| sink.set(*result.as_ref().unwrap_or(&0)));
//!
//! promise.set_value(42)?;
//! assert_eq!(seen.get(), 42);
//! assert_eq!(future.get()?, 42);
//! # Ok::<(), sonde_core::error::SondeError>(())
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{SondeError, SondeResult};

type Continuation<T> = Box<dyn FnOnce(&SondeResult<T>)>;

struct Slot<T>
{
    result: Option<Rc<SondeResult<T>>>,
    /// Set once `get` moved the result out
    taken: bool,
    continuations: Vec<Continuation<T>>,
}

/// Write end of a one-shot result.
pub struct Promise<T>
{
    slot: Rc<RefCell<Slot<T>>>,
}

/// Read end of a one-shot result.
pub struct Future<T>
{
    slot: Rc<RefCell<Slot<T>>>,
}

impl<T> Default for Promise<T>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<T> Promise<T>
{
    pub fn new() -> Self
    {
        Self {
            slot: Rc::new(RefCell::new(Slot {
                result: None,
                taken: false,
                continuations: Vec::new(),
            })),
        }
    }

    /// A future observing this promise. Every future shares the same result.
    pub fn future(&self) -> Future<T>
    {
        Future { slot: self.slot.clone() }
    }

    pub fn is_set(&self) -> bool
    {
        let slot = self.slot.borrow();
        slot.result.is_some() || slot.taken
    }

    pub fn set_value(&self, value: T) -> SondeResult<()>
    {
        self.complete(Ok(value))
    }

    pub fn set_error(&self, error: SondeError) -> SondeResult<()>
    {
        self.complete(Err(error))
    }

    fn complete(&self, result: SondeResult<T>) -> SondeResult<()>
    {
        if self.is_set() {
            return Err(SondeError::InvalidArgument("promise already has a result".to_string()));
        }
        let result = Rc::new(result);
        let continuations = {
            let mut slot = self.slot.borrow_mut();
            slot.result = Some(result.clone());
            std::mem::take(&mut slot.continuations)
        };
        // No borrow is held here: continuations may attach more continuations.
        for continuation in continuations {
            continuation(&result);
        }
        Ok(())
    }
}

impl<T> Future<T>
{
    /// A future that already holds `value`.
    pub fn ready(value: T) -> Self
    {
        let promise = Promise::new();
        let future = promise.future();
        // A fresh promise cannot already be set.
        let _ = promise.set_value(value);
        future
    }

    pub fn is_ready(&self) -> bool
    {
        self.slot.borrow().result.is_some()
    }

    /// Run `continuation` with the result, now if it is already set.
    pub fn then(&self, continuation: impl FnOnce(&SondeResult<T>) + 'static)
    {
        let result = self.slot.borrow().result.clone();
        match result {
            Some(result) => continuation(&result),
            None => self.slot.borrow_mut().continuations.push(Box::new(continuation)),
        }
    }

    /// Take the result.
    ///
    /// Fails with `Deadlock` if no result is set yet, and with
    /// `InvalidArgument` if another future already took it.
    pub fn get(self) -> SondeResult<T>
    {
        let mut slot = self.slot.borrow_mut();
        if slot.taken {
            return Err(SondeError::InvalidArgument("future result already taken".to_string()));
        }
        let Some(result) = slot.result.take() else {
            return Err(SondeError::Deadlock(
                "waiting on an unset future would block the only thread that can set it".to_string(),
            ));
        };
        match Rc::try_unwrap(result) {
            Ok(result) => {
                slot.taken = true;
                result
            }
            Err(shared) => {
                slot.result = Some(shared);
                Err(SondeError::InvalidArgument("future result is still borrowed by a continuation".to_string()))
            }
        }
    }
}

impl<T> fmt::Debug for Promise<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Promise").field("set", &self.is_set()).finish()
    }
}

impl<T> fmt::Debug for Future<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Future").field("ready", &self.is_ready()).finish()
    }
}
