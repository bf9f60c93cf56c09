use std::any::Any;
use std::mem;

use parking_lot::{Condvar, Mutex};

/// Where a task currently stands in the baton handoff.
pub enum Phase {
    /// Suspended; waiting for the scheduler to hand over the baton.
    Parked,

    /// Executing on its own thread. The scheduler is blocked meanwhile, so
    /// at most one task runs at any instant.
    Running,

    /// The body returned or the task called `exit`; the thread is about
    /// to terminate.
    Done,

    /// The body panicked. The payload is rethrown on the scheduler thread.
    Panicked(Box<dyn Any + Send>),
}

/// How one `resume` ended, as observed by the scheduler.
pub enum Suspension {
    /// The task parked again. It has already re-enqueued itself.
    Yielded,

    /// The task terminated and its thread can be joined.
    Finished,

    /// The task panicked; the payload must be propagated.
    Panicked(Box<dyn Any + Send>),
}

/// A binary baton between the scheduler thread and one task thread.
///
/// Exactly one of the two sides is unblocked at any time: `resume` blocks the
/// scheduler until the task parks, finishes or panics, and `park` blocks the
/// task until the scheduler resumes it. All waits re-check their condition
/// under the mutex, so a handoff can never be lost.
pub struct TaskControlBlock {
    phase: Mutex<Phase>,

    /// Condition variable that is used for pausing and
    /// waking either side.
    cvar: Condvar,
}

impl TaskControlBlock {
    pub fn new() -> TaskControlBlock {
        TaskControlBlock {
            phase: Mutex::new(Phase::Parked),
            cvar: Condvar::new(),
        }
    }

    /// Hand the baton to the task and block until it comes back.
    ///
    /// Must be called from the scheduler thread, and only while the task
    /// is parked.
    pub fn resume(&self) -> Suspension {
        let mut phase = self.phase.lock();
        *phase = Phase::Running;
        self.cvar.notify_all();

        while matches!(*phase, Phase::Running) {
            self.cvar.wait(&mut phase);
        }

        match mem::replace(&mut *phase, Phase::Parked) {
            Phase::Parked => Suspension::Yielded,
            Phase::Done => Suspension::Finished,
            Phase::Panicked(payload) => Suspension::Panicked(payload),
            Phase::Running => unreachable!("task still running after handoff"),
        }
    }

    /// Give the baton back to the scheduler and block until resumed.
    ///
    /// Must be called from the task's own thread. The caller has to make the
    /// task reachable again (enqueue it) *before* parking; the scheduler is
    /// blocked in `resume` until the phase changes, so the early enqueue
    /// cannot lead to a premature wakeup.
    pub fn park(&self) {
        let mut phase = self.phase.lock();
        *phase = Phase::Parked;
        self.cvar.notify_all();

        while matches!(*phase, Phase::Parked) {
            self.cvar.wait(&mut phase);
        }
    }

    /// Block until the scheduler's first `resume`.
    ///
    /// Called by a freshly spawned task thread before running its body.
    pub fn wait_for_baton(&self) {
        let mut phase = self.phase.lock();
        while matches!(*phase, Phase::Parked) {
            self.cvar.wait(&mut phase);
        }
    }

    /// Final handoff: the task is done and will not run again.
    pub fn finish(&self) {
        let mut phase = self.phase.lock();
        *phase = Phase::Done;
        self.cvar.notify_all();
    }

    /// Final handoff of a panicking task.
    pub fn abort(&self, payload: Box<dyn Any + Send>) {
        let mut phase = self.phase.lock();
        *phase = Phase::Panicked(payload);
        self.cvar.notify_all();
    }
}
