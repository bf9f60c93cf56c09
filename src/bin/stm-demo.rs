//! Demo harness for the STM engine.
//!
//! Runs two suites of bank-account scenarios, one exercising `or` and one
//! exercising `retry` under the cooperative scheduler, and exits with
//! status 0 iff both succeed.

use std::process;

use log::{error, info};

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

/// Compare the final balances against the expectation and log the outcome.
fn expect(name: &str, accounts: &[(&Account, i64)]) -> bool {
    let passed = accounts
        .iter()
        .all(|(account, want)| account.read_atomic() == *want);
    if passed {
        info!("{}: ok", name);
    } else {
        let got: Vec<i64> = accounts.iter().map(|(a, _)| a.read_atomic()).collect();
        let want: Vec<i64> = accounts.iter().map(|(_, w)| *w).collect();
        error!("{}: expected {:?}, got {:?}", name, want, got);
    }
    passed
}

fn or_else_suite() -> bool {
    let mut ok = true;

    // First alternative blocked, second one succeeds.
    {
        let r1 = TVar::new(8);
        let r2 = TVar::new(13);
        let (a, b) = (r1.clone(), r2.clone());
        scheduler::run(move || {
            atomically(|tx| tx.or(|tx| withdraw(tx, &a, 10), |tx| withdraw(tx, &b, 10)));
        });
        ok &= expect("or: second alternative wins", &[(&r1, 8), (&r2, 3)]);
    }

    // A write before `or` is visible to the surviving alternative.
    {
        let r1 = TVar::new(8);
        let r2 = TVar::new(8);
        let (a, b) = (r1.clone(), r2.clone());
        scheduler::run(move || {
            atomically(|tx| {
                deposit(tx, &b, 5)?;
                tx.or(|tx| withdraw(tx, &a, 10), |tx| withdraw(tx, &b, 10))
            });
        });
        ok &= expect("or: preceding write visible", &[(&r1, 8), (&r2, 3)]);
    }

    // Doubly nested `or`: both inner alternatives block, the outer second
    // one wins and sees none of the inner writes.
    {
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
        ok &= expect("or: nested, outer second wins", &[(&r1, 4), (&r2, 13)]);
    }

    // Doubly nested `or`: the inner second alternative succeeds and keeps
    // the write performed on its branch.
    {
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
        ok &= expect("or: nested, inner second wins", &[(&r1, 3), (&r2, 13)]);
    }

    ok
}

fn retry_suite() -> bool {
    let mut ok = true;

    // A withdrawer blocks until enough incremental deposits have been
    // committed, then takes its amounts exactly once.
    {
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
        ok &= expect("retry: woken by deposits", &[(&r1, 1), (&r2, 7)]);
    }

    // Two tasks increment the same counter with a yield between read and
    // write; the later commit fails validation and re-runs, so no update
    // is lost.
    {
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
        ok &= expect("retry: conflicting increments", &[(&counter, 2)]);
    }

    ok
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let or_else = or_else_suite();
    let retries = retry_suite();

    info!(
        "orElse suite: {} / retry suite: {}",
        if or_else { "ok" } else { "FAILED" },
        if retries { "ok" } else { "FAILED" },
    );

    process::exit(if or_else && retries { 0 } else { 1 });
}
