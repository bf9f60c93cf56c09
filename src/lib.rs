// Copyright 2024 coopstm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This library implements
//! [software transactional memory](https://en.wikipedia.org/wiki/Software_transactional_memory),
//! often abbreviated with STM, on top of a cooperative task scheduler.
//!
//! It is designed closely to haskells STM library. Read Simon Marlow's
//! *Parallel and Concurrent Programming in Haskell* for more info.
//!
//! With locks the sequential composition of two
//! threadsafe actions is no longer threadsafe because
//! other tasks may interfere in between of these actions.
//! Applying a third lock to protect both may lead to common sources of errors
//! like deadlocks or race conditions.
//!
//! Unlike locks, software transactional memory is composable.
//! It is typically implemented by writing all read and write
//! operations in a log. When the action has finished and
//! all the used `TVar`s are consistent, the writes are committed as
//! a single atomic operation.
//! Otherwise the computation repeats. This may lead to starvation,
//! but avoids common sources of bugs.
//!
//! Tasks run under the [`scheduler`] module's cooperative scheduler: they
//! interleave only at explicit suspension points ([`scheduler::yield_now`]
//! and the wait after [`retry`]), so a given program always produces the
//! same interleaving. That determinism is what makes transactional
//! interactions between tasks testable. The engine itself only depends on
//! the existence of a cooperative yield; run under plain OS threads instead
//! and everything still works, with `retry` degrading to a spin-wait.
//!
//! Panicking within STM does not poison the `TVar`s. STM ensures consistency
//! by never committing on panic.
//!
//! # Usage
//!
//! You should only use the functions that are transaction-safe.
//! Transaction-safe functions don't have side effects, except those provided
//! by `TVar`. Mutexes and other blocking mechanisms are especially dangerous,
//! because they can interfere with the scheduling of tasks and therefore
//! cause deadlocks.
//!
//! You can run the top-level atomic operation by calling `atomically`.
//!
//! ```
//! # use coopstm::*;
//! atomically(|_| {
//!     // some action
//!     // return value as `StmResult`, for example
//!     Ok(42)
//! });
//! ```
//!
//! Nested calls to `atomically` are not allowed. A run-time check prevents
//! this. Instead of using `atomically` internally, add a `&mut Transaction`
//! parameter and return `StmResult`.
//!
//! Use `?` on `StmResult`, to propagate a transaction error through the
//! system. Do not handle the error yourself.
//!
//! ```
//! # use coopstm::*;
//! let var = TVar::new(0);
//!
//! let x = atomically(|tx| {
//!     var.write(tx, 42)?; // Pass failure to parent.
//!     var.read(tx) // Return the value saved in var.
//! });
//!
//! println!("var = {}", x);
//! // var = 42
//! ```
//!
//! Tasks communicate through `TVar`s: a task that finds a needed condition
//! false calls [`retry`], which suspends it until one of the variables it
//! touched has changed.
//!
//! ```
//! # use coopstm::*;
//! use coopstm::scheduler;
//!
//! let flag = TVar::new(0);
//! let flag2 = flag.clone();
//! let result = TVar::new(0);
//! let result2 = result.clone();
//!
//! scheduler::run(move || {
//!     let flag3 = flag2.clone();
//!     let result3 = result2.clone();
//!     scheduler::fork(move || {
//!         // Runs first and blocks until the flag is set.
//!         let x = atomically(|tx| {
//!             let v = flag3.read(tx)?;
//!             if v == 0 {
//!                 retry()
//!             } else {
//!                 Ok(v)
//!             }
//!         });
//!         atomically(|tx| result3.write(tx, x));
//!     });
//!     atomically(|tx| flag2.write(tx, 42));
//! });
//!
//! assert_eq!(result.read_atomic(), 42);
//! ```
//!
//! # Transaction safety
//!
//! Software transactional memory is completely safe in the rust sense, so
//! undefined behavior will never occur.
//! Still there are multiple rules that
//! you should obey when dealing with software transactional memory.
//!
//! * Don't run code with side effects, especially no IO-code.
//!   Transactions repeat in failure cases. Using IO would repeat this
//!   IO-code. Return a closure if you have to.
//! * Don't handle `StmResult` yourself.
//!   Use `Transaction::or` to combine alternative paths and `optionally` to
//!   check if an inner function has retried. Always use `?` and
//!   never ignore a `StmResult`.
//! * Don't run `atomically` inside of another. `atomically` is designed to
//!   have side effects and will therefore break transaction safety.
//!   Nested calls are detected at runtime and handled with panicking.
//!   When you use STM in the inner of a function, then
//!   express it in the public interface, by taking `&mut Transaction` as
//!   parameter and returning `StmResult<T>`. Callers can safely compose it
//!   into larger blocks.
//! * Don't mix locks and transactions. Your code will easily deadlock or
//!   slow down unpredictably.
//! * Don't use inner mutability to change the content of a `TVar`.
//!
//! Panicking in a transaction is transaction-safe. The transaction aborts
//! and all changes are discarded. No poisoning or half written transactions
//! happen.
//!
//! # Speed
//!
//! Generally keep your atomic blocks as small as possible, because
//! the more time you spend, the more likely it is, to collide with
//! other tasks. For STM, reading `TVar`s is quite slow, because it
//! needs to look them up in the log every time.
//! Every used `TVar` increases the chance of collisions. Therefore you
//! should keep the amount of accessed variables as low as needed.

pub mod queues;
pub mod scheduler;

mod result;
mod transaction;
mod tvar;


pub use result::{StmError, StmResult};
pub use transaction::{atomically, atomically_with_control, Transaction, TransactionControl};
pub use tvar::{TVar, VarId};

/// Call `retry` to abort an operation and run the whole transaction again.
///
/// Semantically `retry` allows spin-lock-like behavior, but the library
/// suspends the task until one of the used `TVar`s has changed, to keep
/// CPU-usage low.
///
/// `Transaction::or` allows to define alternatives. If the first function
/// wants to retry, then the second one has a chance to run.
///
/// # Examples
///
/// ```no_run
/// # use coopstm::*;
/// let infinite_retry: i32 = atomically(|_| retry());
/// ```
#[inline]
pub fn retry<T>() -> StmResult<T> {
    Err(StmError::Retry)
}

/// Retry until `cond` is true.
///
/// # Example
///
/// ```
/// # use coopstm::*;
/// let var = TVar::new(42);
///
/// let x = atomically(|tx| {
///     let v = var.read(tx)?;
///     guard(v == 42)?;
///     // v is now always 42.
///     Ok(v)
/// });
/// assert_eq!(x, 42);
/// ```
#[inline]
pub fn guard(cond: bool) -> StmResult<()> {
    if cond {
        Ok(())
    } else {
        retry()
    }
}

/// Unwrap `Option` or call retry if it is `None`.
///
/// `optionally` is the inverse of `unwrap_or_retry`.
///
/// # Example
///
/// ```
/// # use coopstm::*;
/// let x = TVar::new(Some(42));
///
/// atomically(|tx| {
///     let inner = unwrap_or_retry(x.read(tx)?)?;
///     assert_eq!(inner, 42); // inner is always 42.
///     Ok(inner)
/// });
/// ```
#[inline]
pub fn unwrap_or_retry<T>(option: Option<T>) -> StmResult<T> {
    match option {
        Some(x) => Ok(x),
        None => retry(),
    }
}

/// Optionally run a transaction `f`. If `f` fails with a `retry()`, it does
/// not cancel the whole transaction, but returns `None`.
///
/// Note that `optionally` does not always recover the function, if
/// inconsistencies were found.
///
/// `unwrap_or_retry` is the inverse of `optionally`.
///
/// # Example
///
/// ```
/// # use coopstm::*;
/// let x: Option<i32> = atomically(|tx|
///     optionally(tx, |_| retry()));
/// assert_eq!(x, None);
/// ```
#[inline]
pub fn optionally<T, F>(tx: &mut Transaction, f: F) -> StmResult<Option<T>>
where
    F: Fn(&mut Transaction) -> StmResult<T>,
{
    tx.or(|tx| f(tx).map(Some), |_| Ok(None))
}
