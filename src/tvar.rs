// Copyright 2024 coopstm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::any::Any;
use std::cmp;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::result::StmResult;
use super::transaction::Transaction;

/// Identity of a transactional variable.
///
/// Ids are handed out by a process-wide monotone counter and never reused
/// within a run. Besides naming a variable, the id order doubles as the
/// locking order during commit.
pub type VarId = u64;

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(0);

fn fresh_var_id() -> VarId {
    NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed)
}

/// `VarControlBlock` contains all the useful data for a `TVar` while being the
/// same type for all of them.
///
/// The control block is what transactions log and lock, whereas `TVar` is just
/// a typesafe wrapper around it.
pub struct VarControlBlock {
    /// Unique identity of the variable.
    id: VarId,

    /// The current value of the variable.
    ///
    /// It is shared through an `Arc` without copying it too often.
    ///
    /// A commit stores a brand new `Arc`, so a snapshot taken earlier compares
    /// unequal with `Arc::ptr_eq` exactly when another transaction has
    /// committed to this cell in the meantime. Transactions use that both for
    /// validation and for detecting a wakeup condition after `retry`.
    pub value: RwLock<Arc<dyn Any + Send + Sync>>,
}

impl VarControlBlock {
    /// Create a new `VarControlBlock` holding `val`, with a freshly
    /// allocated identity.
    pub fn new<T>(val: T) -> Arc<VarControlBlock>
    where
        T: Any + Send + Sync,
    {
        let ctrl = VarControlBlock {
            id: fresh_var_id(),
            value: RwLock::new(Arc::new(val)),
        };
        Arc::new(ctrl)
    }

    pub fn id(&self) -> VarId {
        self.id
    }
}

// Control blocks sort by identity, which gives commits a stable locking
// order across all transactions.

impl PartialEq for VarControlBlock {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VarControlBlock {}

impl Ord for VarControlBlock {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for VarControlBlock {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A variable that can be used in a STM-Block
#[derive(Clone)]
pub struct TVar<T> {
    /// The control block is the inner of the variable.
    ///
    /// The rest of `TVar` is just the typesafe interface.
    control_block: Arc<VarControlBlock>,

    /// This marker is needed so that the variable can be used in a typesafe
    /// manner.
    _marker: PhantomData<T>,
}

impl<T> TVar<T>
where
    T: Any + Sync + Send + Clone,
{
    /// Create a new `TVar`.
    ///
    /// When called inside of a running transaction, prefer
    /// `Transaction::new_tvar`, which additionally registers the variable in
    /// the transaction's log.
    pub fn new(val: T) -> TVar<T> {
        TVar {
            control_block: VarControlBlock::new(val),
            _marker: PhantomData,
        }
    }

    /// `read_atomic` reads a value atomically, without starting a transaction.
    ///
    /// It is semantically equivalent to wrapping a single `read` in
    /// `atomically`, but more efficient.
    ///
    /// `read_atomic` returns a clone of the value.
    pub fn read_atomic(&self) -> T {
        let val = self.read_ref_atomic();

        (&*val as &dyn Any)
            .downcast_ref::<T>()
            .expect("wrong type in TVar<T>")
            .clone()
    }

    /// Read a value atomically but return a reference.
    ///
    /// This is mostly used internally, but can be useful in
    /// some cases, because `read_atomic` clones the
    /// inner value, which may be expensive.
    pub fn read_ref_atomic(&self) -> Arc<dyn Any + Send + Sync> {
        self.control_block.value.read().clone()
    }

    /// The normal way to access a var.
    ///
    /// It is equivalent to `transaction.read(&var)`, but more
    /// convenient.
    pub fn read(&self, transaction: &mut Transaction) -> StmResult<T> {
        transaction.read(self)
    }

    /// The normal way to write a var.
    ///
    /// It is equivalent to `transaction.write(&var, value)`, but more
    /// convenient.
    pub fn write(&self, transaction: &mut Transaction, value: T) -> StmResult<()> {
        transaction.write(self, value)
    }

    /// Modify the content of a `TVar` with the function f.
    ///
    /// ```
    /// # use coopstm::*;
    /// let var = TVar::new(21);
    /// atomically(|trans|
    ///     var.modify(trans, |x| x * 2)
    /// );
    ///
    /// assert_eq!(var.read_atomic(), 42);
    /// ```
    pub fn modify<F>(&self, transaction: &mut Transaction, f: F) -> StmResult<()>
    where
        F: FnOnce(T) -> T,
    {
        let old = self.read(transaction)?;
        self.write(transaction, f(old))
    }

    /// Replaces the value of a `TVar` with a new one, returning
    /// the old one.
    ///
    /// ```
    /// # use coopstm::*;
    /// let var = TVar::new(0);
    /// let x = atomically(|trans|
    ///     var.replace(trans, 42)
    /// );
    ///
    /// assert_eq!(x, 0);
    /// assert_eq!(var.read_atomic(), 42);
    /// ```
    pub fn replace(&self, transaction: &mut Transaction, value: T) -> StmResult<T> {
        let old = self.read(transaction)?;
        self.write(transaction, value)?;
        Ok(old)
    }

    /// Check if two `TVar`s refer to the same variable.
    ///
    /// Two vars are the same iff their identities are the same.
    pub fn ref_eq(this: &TVar<T>, other: &TVar<T>) -> bool {
        this.control_block.id == other.control_block.id
    }

    /// Access the control block of the var.
    ///
    /// Internal use only!
    pub fn control_block(&self) -> &Arc<VarControlBlock> {
        &self.control_block
    }
}

/// Debug output a struct.
///
/// Note that this function does not print the state atomically.
/// If another task modifies the datastructure at the same time, it may print
/// an inconsistent state. If you need an accurate view that reflects current
/// transaction-local state, you can implement it easily yourself with
/// `atomically`.
impl<T> Debug for TVar<T>
where
    T: Any + Sync + Send + Clone,
    T: Debug,
{
    #[inline(never)]
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let x = self.read_atomic();
        f.debug_struct("TVar").field("value", &x).finish()
    }
}


// More tests are in lib.rs and transaction/mod.rs.
