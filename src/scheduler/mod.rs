// Copyright 2024 coopstm Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A cooperative, deterministic task scheduler.
//!
//! Tasks are ordinary OS threads, but a baton handoff ensures that at most
//! one of them executes at any instant: the scheduler resumes one task and
//! blocks until that task suspends, finishes or panics. Given a program, the
//! interleaving of tasks is therefore a pure function of the queue
//! discipline below, which makes transactional interleavings reproducible
//! in tests.
//!
//! All STM suspension points go through this module: an explicit
//! [`yield_now`] inside an atomic block and the wait loop after `retry` both
//! hand control to the next ready task.
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use coopstm::scheduler;
//!
//! let order = Arc::new(Mutex::new(Vec::new()));
//! let order2 = order.clone();
//!
//! scheduler::run(move || {
//!     let order3 = order2.clone();
//!     scheduler::fork(move || {
//!         order3.lock().push("child");
//!     });
//!     // The child ran before the parent was resumed.
//!     order2.lock().push("parent");
//! });
//!
//! assert_eq!(*order.lock(), ["child", "parent"]);
//! ```

pub mod control_block;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use log::trace;
use parking_lot::Mutex;

use self::control_block::{Suspension, TaskControlBlock};

/// The ready queue holds every task that can be handed the baton.
///
/// Plain FIFO: tasks are popped at the front; a yielding task re-enqueues
/// itself at the back, a forked child (and its parent, right behind it) at
/// the front.
type ReadyQueue = Arc<Mutex<VecDeque<Arc<Task>>>>;

/// One scheduled task: the baton plus the join handle of its thread.
struct Task {
    control: TaskControlBlock,

    /// Taken and joined by the scheduler once the task reports `Finished`.
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Thread-local handle of the task the current thread is running.
///
/// Free functions like [`yield_now`] and [`fork`] route through it, so user
/// code does not have to pass a scheduler handle around.
#[derive(Clone)]
struct TaskContext {
    task: Arc<Task>,
    ready: ReadyQueue,
}

thread_local!(static CURRENT_TASK: RefCell<Option<TaskContext>> = RefCell::new(None));

fn current() -> Option<TaskContext> {
    CURRENT_TASK.with(|c| c.borrow().clone())
}

/// Private unwind payload of [`exit`]. Recognised by the task wrapper and
/// treated as a normal termination.
struct ExitTask;

impl Task {
    /// Spawn the backing thread for a task.
    ///
    /// The thread parks immediately and runs `body` only once the scheduler
    /// hands it the baton for the first time.
    fn spawn<F>(body: F, ready: ReadyQueue) -> Arc<Task>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Arc::new(Task {
            control: TaskControlBlock::new(),
            thread: Mutex::new(None),
        });

        let task2 = task.clone();
        let handle = thread::spawn(move || {
            task2.control.wait_for_baton();

            CURRENT_TASK.with(|c| {
                *c.borrow_mut() = Some(TaskContext {
                    task: task2.clone(),
                    ready,
                });
            });

            let result = panic::catch_unwind(AssertUnwindSafe(body));

            CURRENT_TASK.with(|c| {
                *c.borrow_mut() = None;
            });

            match result {
                Ok(()) => task2.control.finish(),
                Err(payload) if payload.is::<ExitTask>() => task2.control.finish(),
                Err(payload) => task2.control.abort(payload),
            }
        });

        *task.thread.lock() = Some(handle);
        task
    }

    fn join(&self) {
        if let Some(handle) = self.thread.lock().take() {
            // The thread has already reported Done or Panicked, so this
            // returns promptly. Its panic, if any, was captured by the
            // wrapper and is propagated by the run loop instead.
            let _ = handle.join();
        }
    }
}

/// Run `main` and every task it forks to completion.
///
/// The call returns when the ready queue is empty, i.e. when all tasks have
/// terminated. A task that waits for a variable nobody ever writes keeps
/// yielding and `run` never returns; bounding such waits is the caller's
/// business (see `atomically_with_control`).
///
/// A panic inside any task is re-raised here on the calling thread, so test
/// assertions inside tasks fail the test as expected. Tasks still parked at
/// that point are abandoned along with their threads.
pub fn run<F>(main: F)
where
    F: FnOnce() + Send + 'static,
{
    let ready: ReadyQueue = Arc::new(Mutex::new(VecDeque::new()));

    let first = Task::spawn(main, ready.clone());
    ready.lock().push_back(first);

    loop {
        let next = ready.lock().pop_front();
        let task = match next {
            Some(task) => task,
            None => break,
        };

        match task.control.resume() {
            // The task re-enqueued itself before parking.
            Suspension::Yielded => {}

            Suspension::Finished => {
                trace!("task finished");
                task.join();
            }

            Suspension::Panicked(payload) => {
                task.join();
                panic::resume_unwind(payload);
            }
        }
    }
}

/// Suspend the current task and let the other ready tasks run.
///
/// The task re-enqueues itself at the back of the ready queue, so every
/// other ready task gets the baton once before control comes back
/// (round-robin).
///
/// When the calling thread is not a scheduler task, this degrades to
/// [`std::thread::yield_now`]. The STM engine only depends on some form of
/// cooperative yield, so transactions keep working under plain OS threading,
/// with `retry` becoming a spin-wait.
pub fn yield_now() {
    match current() {
        Some(ctx) => {
            ctx.ready.lock().push_back(ctx.task.clone());
            ctx.task.control.park();
        }
        None => thread::yield_now(),
    }
}

/// Start `child` as a new task and suspend the current one behind it.
///
/// The child gets the baton next; the parent resumes right after the child
/// suspends or finishes its first slice. Both are ordinary tasks from then
/// on. Panics when called from outside a [`run`] invocation.
pub fn fork<F>(child: F)
where
    F: FnOnce() + Send + 'static,
{
    let ctx = match current() {
        Some(ctx) => ctx,
        None => panic!("scheduler: fork outside of a running scheduler"),
    };

    trace!("forking child task");
    let child_task = Task::spawn(child, ctx.ready.clone());
    {
        let mut queue = ctx.ready.lock();
        queue.push_front(ctx.task.clone());
        queue.push_front(child_task);
    }
    ctx.task.control.park();
}

/// Terminate the current task immediately.
///
/// The task's stack unwinds, destructors run, and no continuation is
/// re-enqueued. Panics when called from outside a [`run`] invocation.
pub fn exit() -> ! {
    if current().is_none() {
        panic!("scheduler: exit outside of a running scheduler");
    }
    // resume_unwind skips the panic hook, so a voluntary exit stays silent.
    panic::resume_unwind(Box::new(ExitTask));
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    fn trace_log() -> Trace {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn run_single_task() {
        let log = trace_log();
        let log2 = log.clone();

        run(move || {
            log2.lock().push("main");
        });

        assert_eq!(*log.lock(), ["main"]);
    }

    /// The forked child runs before the parent is resumed.
    #[test]
    fn fork_child_runs_first() {
        let log = trace_log();
        let log2 = log.clone();

        run(move || {
            let log3 = log2.clone();
            fork(move || {
                log3.lock().push("child");
            });
            log2.lock().push("parent");
        });

        assert_eq!(*log.lock(), ["child", "parent"]);
    }

    /// Yielding alternates between two tasks round-robin.
    #[test]
    fn yield_round_robin() {
        let log = trace_log();
        let log2 = log.clone();

        run(move || {
            let log3 = log2.clone();
            fork(move || {
                log3.lock().push("a1");
                yield_now();
                log3.lock().push("a2");
            });
            log2.lock().push("m1");
            yield_now();
            log2.lock().push("m2");
        });

        assert_eq!(*log.lock(), ["a1", "m1", "a2", "m2"]);
    }

    /// `exit` stops a task without running the rest of its body.
    #[test]
    fn exit_drops_continuation() {
        let log = trace_log();
        let log2 = log.clone();

        run(move || {
            let log3 = log2.clone();
            fork(move || {
                log3.lock().push("before");
                exit();
                #[allow(unreachable_code)]
                log3.lock().push("after");
            });
            log2.lock().push("main");
        });

        assert_eq!(*log.lock(), ["before", "main"]);
    }

    /// A panic inside a task propagates out of `run`.
    #[test]
    #[should_panic(expected = "boom")]
    fn panic_propagates() {
        run(|| {
            panic!("boom");
        });
    }

    /// Nested forks keep the child-first ordering on every level.
    #[test]
    fn nested_fork_order() {
        let log = trace_log();
        let log2 = log.clone();

        run(move || {
            let log3 = log2.clone();
            fork(move || {
                let log4 = log3.clone();
                fork(move || {
                    log4.lock().push("grandchild");
                });
                log3.lock().push("child");
            });
            log2.lock().push("parent");
        });

        assert_eq!(*log.lock(), ["grandchild", "child", "parent"]);
    }

    #[test]
    fn yield_outside_scheduler_is_noop() {
        // Degrades to thread::yield_now and must not panic.
        yield_now();
    }
}
