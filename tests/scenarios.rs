//! End-to-end scenarios driving the STM engine through the cooperative
//! scheduler: alternative composition with `or`, blocking with `retry`, and
//! conflict resolution between interleaved tasks.

use coopstm::{atomically, retry, scheduler, StmResult, TVar, Transaction};

type Account = TVar<i64>;

/// Take `amount` from the account, or retry until the balance suffices.
fn withdraw(tx: &mut Transaction, account: &Account, amount: i64) -> StmResult<()> {
    let balance = account.read(tx)?;
    if balance < amount {
        retry()
    } else {
        account.write(tx, balance - amount)
    }
}

/// Add `amount` to the account.
fn deposit(tx: &mut Transaction, account: &Account, amount: i64) -> StmResult<()> {
    let balance = account.read(tx)?;
    account.write(tx, balance + amount)
}

/// The first alternative blocks, so the second one runs and commits.
#[test]
fn or_second_alternative_wins() {
    let r1 = TVar::new(8);
    let r2 = TVar::new(13);

    let (a, b) = (r1.clone(), r2.clone());
    scheduler::run(move || {
        atomically(|tx| tx.or(|tx| withdraw(tx, &a, 10), |tx| withdraw(tx, &b, 10)));
    });

    assert_eq!(r1.read_atomic(), 8);
    assert_eq!(r2.read_atomic(), 3);
}

/// A write performed before `or` is visible to the surviving alternative.
#[test]
fn or_preceding_write_visible() {
    let r1 = TVar::new(8);
    let r2 = TVar::new(8);

    let (a, b) = (r1.clone(), r2.clone());
    scheduler::run(move || {
        atomically(|tx| {
            deposit(tx, &b, 5)?;
            tx.or(|tx| withdraw(tx, &a, 10), |tx| withdraw(tx, &b, 10))
        });
    });

    assert_eq!(r1.read_atomic(), 8);
    assert_eq!(r2.read_atomic(), 3);
}

/// Doubly nested `or`: both inner alternatives block, so the outer second
/// one wins, and none of the inner branch's writes survive.
#[test]
fn or_nested_outer_second_wins() {
    let r1 = TVar::new(8);
    let r2 = TVar::new(13);

    let a = r1.clone();
    scheduler::run(move || {
        atomically(|tx| {
            let v = a.read(tx)?;
            tx.or(
                |tx| {
                    a.write(tx, v + 5)?;
                    tx.or(|tx| withdraw(tx, &a, 20), |tx| withdraw(tx, &a, 15))
                },
                |tx| withdraw(tx, &a, 4),
            )
        });
    });

    assert_eq!(r1.read_atomic(), 4);
    assert_eq!(r2.read_atomic(), 13);
}

/// Doubly nested `or`: the inner second alternative succeeds and keeps the
/// write performed earlier on the same branch.
#[test]
fn or_nested_inner_second_wins() {
    let r1 = TVar::new(8);
    let r2 = TVar::new(13);

    let (a, b) = (r1.clone(), r2.clone());
    scheduler::run(move || {
        atomically(|tx| {
            let v = a.read(tx)?;
            tx.or(
                |tx| {
                    a.write(tx, v + 5)?;
                    tx.or(|tx| withdraw(tx, &a, 20), |tx| withdraw(tx, &a, 10))
                },
                |tx| withdraw(tx, &b, 4),
            )
        });
    });

    assert_eq!(r1.read_atomic(), 3);
    assert_eq!(r2.read_atomic(), 13);
}

/// A blocked withdrawer re-runs whenever one of its variables changes and
/// completes exactly once, as soon as the balance is sufficient.
#[test]
fn retry_woken_by_deposits() {
    let r1 = TVar::new(10);
    let r2 = TVar::new(10);

    let (a, b) = (r1.clone(), r2.clone());
    scheduler::run(move || {
        let (a2, b2) = (a.clone(), b.clone());
        scheduler::fork(move || {
            atomically(|tx| {
                a2.read(tx)?;
                scheduler::yield_now();
                withdraw(tx, &b2, 3)?;
                withdraw(tx, &a2, 13)
            });
        });

        for i in 0..4 {
            atomically(|tx| deposit(tx, &a, 1));
            if i < 3 {
                scheduler::yield_now();
            }
        }
    });

    assert_eq!(r1.read_atomic(), 1);
    assert_eq!(r2.read_atomic(), 7);
}

/// Two tasks increment the same counter with a yield between read and
/// write. The later commit fails validation and re-runs, so both updates
/// survive.
#[test]
fn conflicting_increments_are_serialized() {
    let counter = TVar::new(0);

    let c = counter.clone();
    scheduler::run(move || {
        let c2 = c.clone();
        scheduler::fork(move || {
            atomically(|tx| {
                let x = c2.read(tx)?;
                scheduler::yield_now();
                c2.write(tx, x + 1)
            });
        });

        atomically(|tx| {
            let x = c.read(tx)?;
            scheduler::yield_now();
            c.write(tx, x + 1)
        });
    });

    assert_eq!(counter.read_atomic(), 2);
}

/// A variable allocated inside an attempt that retries is gone; the next
/// attempt allocates a new identity. Observable from the outside: the
/// committed handle works and holds the last written value.
#[test]
fn fresh_var_isolation() {
    let trigger = TVar::new(0);

    let t = trigger.clone();
    let handle = std::sync::Arc::new(parking_lot::Mutex::new(None));
    let handle2 = handle.clone();

    scheduler::run(move || {
        let t2 = t.clone();
        let handle3 = handle2.clone();
        scheduler::fork(move || {
            let var = atomically(|tx| {
                let fresh = tx.new_tvar(100)?;
                let seen = t2.read(tx)?;
                fresh.write(tx, seen + 100)?;
                if t2.read(tx)? == 0 {
                    retry()
                } else {
                    Ok(fresh)
                }
            });
            *handle3.lock() = Some(var);
        });

        atomically(|tx| t.write(tx, 7));
    });

    let var = handle.lock().take().expect("transaction committed");
    assert_eq!(var.read_atomic(), 107);
}
