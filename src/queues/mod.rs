mod tqueue;

pub use tqueue::TQueue;

use crate::{StmResult, Transaction};

/// Transactional queue-like structure.
///
/// A reader that finds the queue empty retries, which under the cooperative
/// scheduler suspends the task until a writer commits an element.
pub trait TQueueLike<T>: Clone + Send {
    /// Pop the head of the queue, or retry until there is an element if it's
    /// empty.
    fn read(&self, transaction: &mut Transaction) -> StmResult<T>;
    /// Push to the end of the queue.
    fn write(&self, transaction: &mut Transaction, value: T) -> StmResult<()>;
    /// Check if the queue is empty.
    fn is_empty(&self, transaction: &mut Transaction) -> StmResult<bool>;
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::TQueueLike;
    use crate::test;
    use crate::{atomically, scheduler};

    pub fn test_write_and_read_back<Q: 'static + TQueueLike<i32>>(mq: fn() -> Q) {
        let queue = mq();
        let (x, y) = atomically(|tx| {
            queue.write(tx, 42)?;
            queue.write(tx, 31)?;
            let x = queue.read(tx)?;
            let y = queue.read(tx)?;
            Ok((x, y))
        });

        assert_eq!(42, x);
        assert_eq!(31, y);
    }

    /// Run a consumer and a producer task under the scheduler.
    ///
    /// The consumer starts first and blocks on the empty queue; the producer
    /// then commits a value, which wakes the consumer up.
    pub fn test_scheduled<Q: 'static + TQueueLike<i32>>(mq: fn() -> Q) {
        let queue1 = mq();
        let queue2 = queue1.clone();

        let received = Arc::new(Mutex::new(None));
        let received2 = received.clone();

        scheduler::run(move || {
            let received3 = received2.clone();
            scheduler::fork(move || {
                let x = atomically(|tx| queue2.read(tx));
                *received3.lock() = Some(x);
            });

            atomically(|tx| queue1.write(tx, 42));
        });

        assert_eq!(*received.lock(), Some(42));
    }

    /// Same shape on plain OS threads: the reader spins on retry instead of
    /// being scheduled, but must still see the value.
    pub fn test_threaded<Q: 'static + TQueueLike<i32>>(mq: fn() -> Q) {
        use std::thread;
        use std::time::Duration;

        let queue1 = mq();
        // Clone for the other thread.
        let queue2 = queue1.clone();

        let x = test::run_async(
            500,
            move || atomically(|tx| queue2.read(tx)),
            || {
                thread::sleep(Duration::from_millis(100));
                atomically(|tx| queue1.write(tx, 42));
            },
        )
        .unwrap();

        assert_eq!(42, x);
    }

    pub fn test_is_empty<Q: 'static + TQueueLike<i32>>(mq: fn() -> Q) {
        let queue = mq();
        let is_empty = atomically(|tx| queue.is_empty(tx));

        assert!(is_empty);
    }

    pub fn test_non_empty<Q: 'static + TQueueLike<i32>>(mq: fn() -> Q) {
        let queue = mq();
        atomically(|tx| queue.write(tx, 42));
        let is_empty = atomically(|tx| queue.is_empty(tx));
        assert!(!is_empty);
    }
}

/// Reuse the same test definitions for each implementation of the
/// `TQueueLike` trait by calling this macro with a function to create a new
/// instance of the queue.
///
/// For example:
/// ```text
/// test_queue_mod!(|| { crate::queues::tqueue::TQueue::<i32>::new() });
/// ```
#[macro_export]
macro_rules! test_queue_mod {
    ($make:expr) => {
    };
}
