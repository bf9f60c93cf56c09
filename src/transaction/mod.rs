// Copyright 2024 coopstm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

pub mod log_var;

use std::any::Any;
use std::cell::Cell;
use std::collections::btree_map::Entry::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, trace};

use self::log_var::LogVar;
use super::result::StmError::*;
use super::result::*;
use super::scheduler;
use super::tvar::{TVar, VarControlBlock};

thread_local!(static TRANSACTION_RUNNING: Cell<bool> = Cell::new(false));

/// `TransactionGuard` checks against nested STM calls.
///
/// Use guard, so that it correctly marks the Transaction as finished.
struct TransactionGuard;

impl TransactionGuard {
    pub fn new() -> TransactionGuard {
        TRANSACTION_RUNNING.with(|t| {
            assert!(!t.get(), "STM: Nested Transaction");
            t.set(true);
        });
        TransactionGuard
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        TRANSACTION_RUNNING.with(|t| {
            t.set(false);
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionControl {
    Retry,
    Abort,
}

/// Run a function atomically by using Software Transactional Memory.
///
/// It calls to `Transaction::with` internally, but is more explicit.
pub fn atomically<T, F>(f: F) -> T
where
    F: Fn(&mut Transaction) -> StmResult<T>,
{
    Transaction::with(f)
}

/// Run a function atomically, with a control function steering failure
/// handling.
///
/// See `Transaction::with_control` for details.
pub fn atomically_with_control<T, F, C>(control: C, f: F) -> Option<T>
where
    F: Fn(&mut Transaction) -> StmResult<T>,
    C: FnMut(StmError) -> TransactionControl,
{
    Transaction::with_control(control, f)
}

/// Transaction tracks all the read and written variables.
///
/// It is used for checking vars, to ensure atomicity.
pub struct Transaction {
    /// Map of all vars that map the `VarControlBlock` of a var to a `LogVar`.
    ///
    /// The map is keyed by variable identity, so a variable can never carry
    /// two entries, and iteration locks variables in id order, which prevents
    /// deadlocks on locking.
    vars: BTreeMap<Arc<VarControlBlock>, LogVar>,
}

impl Transaction {
    /// Create a new log.
    ///
    /// Normally you don't need to call this directly.
    /// Use `atomically` instead.
    fn new() -> Transaction {
        Transaction {
            vars: BTreeMap::new(),
        }
    }

    /// Run a function with a transaction.
    ///
    /// It is equivalent to `atomically`.
    pub fn with<T, F>(f: F) -> T
    where
        F: Fn(&mut Transaction) -> StmResult<T>,
    {
        match Transaction::with_control(|_| TransactionControl::Retry, f) {
            Some(t) => t,
            None => unreachable!(),
        }
    }

    /// Run a function with a transaction.
    ///
    /// `with_control` takes another control function, that
    /// can steer the control flow and possibly terminate early.
    ///
    /// `control` can react to counters, timeouts or external inputs.
    ///
    /// It allows the user to fall back to another strategy, like a global lock
    /// in the case of too much contention.
    ///
    /// Please note, that the transaction may still wait for changes
    /// indefinitely when `retry` is called and `control` does not abort.
    /// If you need a timeout, another task should signal this through a `TVar`.
    pub fn with_control<T, F, C>(mut control: C, f: F) -> Option<T>
    where
        F: Fn(&mut Transaction) -> StmResult<T>,
        C: FnMut(StmError) -> TransactionControl,
    {
        let _guard = TransactionGuard::new();

        // create a log guard for initializing and cleaning up
        // the log
        let mut transaction = Transaction::new();

        // loop until success
        loop {
            // run the computation
            match f(&mut transaction) {
                // on success exit loop
                Ok(t) => {
                    if transaction.commit() {
                        trace!("transaction committed");
                        return Some(t);
                    }
                    debug!("conflict on commit, restarting transaction");
                }

                Err(e) => {
                    // Check if the user wants to abort the transaction.
                    if let TransactionControl::Abort = control(e) {
                        return None;
                    }

                    // on retry wait for changes
                    if let Retry = e {
                        transaction.wait_for_change();
                    }
                }
            }

            // clear log before retrying computation
            transaction.clear();
        }
    }

    /// Perform a downcast on a var.
    fn downcast<T: Any + Clone>(var: Arc<dyn Any>) -> T {
        match var.downcast_ref::<T>() {
            Some(s) => s.clone(),
            None => unreachable!("TVar has wrong type"),
        }
    }

    /// Read a variable and return the value.
    ///
    /// The returned value is not always consistent with the current value of
    /// the var, but may be an outdated or not yet committed value.
    ///
    /// The used code should be capable of handling inconsistent states
    /// without running into infinite loops.
    /// Just the commit of wrong values is prevented by STM.
    pub fn read<T: Send + Sync + Any + Clone>(&mut self, var: &TVar<T>) -> StmResult<T> {
        let ctrl = var.control_block().clone();
        // Check if the same var was touched before.
        let value = match self.vars.entry(ctrl) {
            // If the variable has been accessed before, then load that value.
            Occupied(mut entry) => entry.get_mut().read_pending(),

            // Else load the variable statically.
            Vacant(entry) => {
                // Read the value from the var.
                let value = var.read_ref_atomic();

                // Store it in an entry.
                entry.insert(LogVar::read(value.clone()));
                value
            }
        };

        // For now always succeeds, but that may change later.
        Ok(Transaction::downcast(value))
    }

    /// Write a variable.
    ///
    /// The write is not immediately visible to other tasks,
    /// but atomically committed at the end of the computation.
    ///
    /// A write to a variable that was not touched before still snapshots the
    /// cell first, so that blind writes are validated on commit as well.
    pub fn write<T: Any + Send + Sync + Clone>(&mut self, var: &TVar<T>, value: T) -> StmResult<()> {
        // box the value
        let boxed = Arc::new(value);

        let ctrl = var.control_block().clone();
        // update or create new entry
        match self.vars.entry(ctrl) {
            Occupied(mut entry) => entry.get_mut().write_pending(boxed),
            Vacant(entry) => {
                let original = var.read_ref_atomic();
                entry.insert(LogVar::write(original, boxed));
            }
        }

        // For now always succeeds, but that may change later.
        Ok(())
    }

    /// Allocate a new `TVar` from inside a transaction.
    ///
    /// The variable gets a fresh identity and is registered in the log, so
    /// reads and writes in the same attempt behave like on any other var.
    /// Nobody else can observe it before the transaction commits; when the
    /// attempt is discarded, the variable is discarded with it.
    pub fn new_tvar<T: Any + Send + Sync + Clone>(&mut self, init: T) -> StmResult<TVar<T>> {
        let var = TVar::new(init);
        let snapshot = var.read_ref_atomic();

        // A freshly allocated id can not collide with an existing entry.
        let old = self
            .vars
            .insert(var.control_block().clone(), LogVar::fresh(snapshot));
        debug_assert!(old.is_none(), "STM: duplicate log entry for fresh var");

        Ok(var)
    }

    /// Combine two calculations. When the first blocks with `retry`,
    /// run the second one, but don't commit the changes in the first.
    ///
    /// The second alternative starts from the log as it was before the first
    /// one ran: writes of a retrying alternative stay invisible to the
    /// survivor and to the enclosing transaction, while everything written
    /// before `or` is visible to both.
    ///
    /// Use `Transaction::or` instead of handling `StmResult` directly with
    /// `Result::or`. The latter does not handle the log correctly.
    pub fn or<T, F1, F2>(&mut self, first: F1, second: F2) -> StmResult<T>
    where
        F1: Fn(&mut Transaction) -> StmResult<T>,
        F2: Fn(&mut Transaction) -> StmResult<T>,
    {
        // Snapshot of the log before either alternative runs.
        let parent = Transaction {
            vars: self.vars.clone(),
        };

        // Run the first computation.
        match first(self) {
            // Run the second alternative on a manual retry call.
            //
            // Everything the first one logged is dropped; validation of the
            // surviving log is the enclosing atomic's business, not ours.
            Err(Retry) => {
                *self = parent;
                second(self)
            }

            // Return success and failure directly.
            x => x,
        }
    }

    /// Clear the log's data.
    ///
    /// This should be used before redoing a computation, but
    /// nowhere else.
    fn clear(&mut self) {
        self.vars.clear();
    }

    /// Wait until any of the observed variables has changed, because the
    /// change may lead to a new calculation result.
    ///
    /// The wait repeatedly hands control to the other tasks and re-checks the
    /// log. Fresh variables can not change under us and are ignored; a log
    /// with nothing but fresh entries (or nothing at all) yields forever,
    /// which is the documented contract for a transaction that can never
    /// observe progress.
    fn wait_for_change(&mut self) {
        trace!("retry: waiting for {} vars to change", self.vars.len());
        loop {
            let changed = self.vars.iter().any(|(var, lv)| {
                if lv.fresh {
                    return false;
                }
                let guard = var.value.read();
                !Arc::ptr_eq(&lv.original, &guard)
            });
            if changed {
                return;
            }
            scheduler::yield_now();
        }
    }

    /// Write the log back to the variables.
    ///
    /// Return true for success and false, if a touched var has changed.
    ///
    /// Neither validation nor the write-back hands control to another task,
    /// so a half-applied commit is never observable. Under plain OS threads
    /// the same guarantee comes from two phase locking in id order.
    fn commit(&mut self) -> bool {
        // First phase: acquire locks in id order and check that every
        // snapshot is still current. Perform an early return if something
        // is not consistent.

        // vector of read locks.
        let mut read_vec = Vec::with_capacity(self.vars.len());

        // vector of tuple (value, lock)
        let mut write_vec = Vec::with_capacity(self.vars.len());

        for (var, lv) in &self.vars {
            if lv.is_written() {
                // take write lock
                let lock = var.value.write();

                // A fresh var has no observers, nothing to validate.
                if !lv.fresh && !Arc::ptr_eq(&lock, &lv.original) {
                    return false;
                }
                write_vec.push((&lv.pending, lock));
            } else if !lv.fresh {
                // Take a read lock and check for consistency.
                let lock = var.value.read();

                if !Arc::ptr_eq(&lock, &lv.original) {
                    return false;
                }
                read_vec.push(lock);
            }
            // A fresh var that was never written already holds its value.
        }

        // Second phase: write back and release.

        // Release the reads first.
        // This allows other tasks to continue quickly.
        drop(read_vec);

        for (value, mut lock) in write_vec {
            // Commit value.
            *lock = value.clone();
        }

        // Commit succeeded.
        true
    }
}
