#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum StmError {
    /// The attempt failed, because a variable, the computation
    /// depends on, has changed.
    Failure,

    /// `retry` was called.
    ///
    /// The transaction re-runs once at least one of the variables it
    /// touched has changed.
    Retry,
}

/// `StmResult` is the result of a single step of a STM calculation.
///
/// It informs of success or the type of failure. Normally you should not use
/// it directly. Especially recovering from an error, e.g. by using `ok().or(..)`,
/// can break the semantics of STM and cause missed wakeups.
/// Use `Transaction::or` to combine alternatives instead.
pub type StmResult<T> = Result<T, StmError>;
