use std::any::Any;
use std::sync::Arc;

pub type ArcAny = Arc<dyn Any + Send + Sync>;

/// `LogVar` is the per-variable record of one transaction attempt.
///
/// `original` is the cell snapshot taken at the *first* touch of the variable
/// in this attempt and never updated afterwards. `pending` is the value the
/// attempt wants to commit; later writes replace it.
#[derive(Clone)]
pub struct LogVar {
    /// Snapshot of the cell at the first touch.
    pub original: ArcAny,

    /// The value to commit, or the snapshot itself if the variable was
    /// only read.
    pub pending: ArcAny,

    /// True iff the variable was allocated by this attempt.
    ///
    /// No other transaction can have observed a fresh variable's cell, so it
    /// neither needs validation nor can it wake a waiting transaction.
    pub fresh: bool,
}

impl LogVar {
    /// Record a plain read of a cell snapshot.
    pub fn read(snapshot: ArcAny) -> LogVar {
        LogVar {
            original: snapshot.clone(),
            pending: snapshot,
            fresh: false,
        }
    }

    /// Record a write to a variable whose cell held `original` at the time.
    pub fn write(original: ArcAny, pending: ArcAny) -> LogVar {
        LogVar {
            original,
            pending,
            fresh: false,
        }
    }

    /// Record a variable allocated by this attempt, with the cell snapshot
    /// holding its initial value.
    pub fn fresh(init: ArcAny) -> LogVar {
        LogVar {
            original: init.clone(),
            pending: init,
            fresh: true,
        }
    }

    /// The value a subsequent read inside the same attempt observes.
    pub fn read_pending(&self) -> ArcAny {
        self.pending.clone()
    }

    /// Register a later write.
    pub fn write_pending(&mut self, value: ArcAny) {
        self.pending = value;
    }

    /// True iff the attempt wrote the variable, i.e. committing has to
    /// store the pending value. Every write boxes a new `Arc`, so pointer
    /// identity with the snapshot detects untouched entries.
    pub fn is_written(&self) -> bool {
        !Arc::ptr_eq(&self.original, &self.pending)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_is_not_written() {
        let var = LogVar::read(Arc::new(42));
        assert!(!var.is_written());
    }

    #[test]
    fn write_is_written() {
        let mut var = LogVar::read(Arc::new(42));
        var.write_pending(Arc::new(43));
        assert!(var.is_written());
    }

    /// The snapshot survives any number of writes.
    #[test]
    fn original_is_stable() {
        let snapshot: ArcAny = Arc::new(42);
        let mut var = LogVar::read(snapshot.clone());

        var.write_pending(Arc::new(1));
        var.write_pending(Arc::new(2));

        assert!(Arc::ptr_eq(&var.original, &snapshot));
    }

    #[test]
    fn fresh_unwritten() {
        let var = LogVar::fresh(Arc::new(0));
        assert!(var.fresh);
        assert!(!var.is_written());
    }
}
