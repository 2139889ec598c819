use chrono::{TimeZone, Utc};
use credit_union_ledger::{
    AccountId, AccountLedger, Currency, InMemoryStore, LedgerConfig, LedgerError, LoanEngine,
    LoanId, LoanType, Money, SafeTimeProvider, TimeSource,
};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn gmd(major: i64) -> Money {
    Money::from_major(major, Currency::Gmd).unwrap()
}

fn ledger() -> Arc<AccountLedger> {
    let time = Arc::new(SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )));
    Arc::new(AccountLedger::new(LedgerConfig::default(), Arc::new(InMemoryStore::new()), time).unwrap())
}

#[test]
fn concurrent_withdrawals_never_overdraw() {
    let ledger = ledger();
    let account = ledger.open_account("member-1", Currency::Gmd).unwrap().id;
    ledger.deposit(account, gmd(100)).unwrap();

    let threads = 8;
    let start = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                ledger.withdraw(account, gmd(60))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::InsufficientFunds { .. })));
    assert_eq!(ledger.get_balance(account).unwrap(), gmd(40));
}

#[test]
fn opposite_transfers_do_not_deadlock() {
    let ledger = ledger();
    let a = ledger.open_account("member-1", Currency::Gmd).unwrap().id;
    let b = ledger.open_account("member-2", Currency::Gmd).unwrap().id;
    ledger.deposit(a, gmd(1_000)).unwrap();
    ledger.deposit(b, gmd(1_000)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
            thread::spawn(move || {
                for _ in 0..100 {
                    ledger.transfer(from, to, gmd(1)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = ledger
        .get_balance(a)
        .unwrap()
        .checked_add(ledger.get_balance(b).unwrap())
        .unwrap();
    assert_eq!(total, gmd(2_000));
    assert_eq!(ledger.get_balance(a).unwrap(), gmd(1_000));
    assert_eq!(ledger.transactions(a).unwrap().len(), 801);
}

#[test]
fn concurrent_deposits_get_distinct_sequences() {
    let ledger = ledger();
    let account = ledger.open_account("member-1", Currency::Gmd).unwrap().id;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for _ in 0..50 {
                    ledger.deposit(account, gmd(1)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let statement = ledger.transactions(account).unwrap();
    let sequences: HashSet<u64> = statement.iter().map(|tx| tx.sequence).collect();
    assert_eq!(sequences.len(), 500);
    assert_eq!(sequences.iter().max(), Some(&500));
    assert_eq!(ledger.get_balance(account).unwrap(), gmd(500));
}

#[test]
fn balance_reads_see_whole_transfers() {
    let ledger = ledger();
    let a = ledger.open_account("member-1", Currency::Gmd).unwrap().id;
    let b = ledger.open_account("member-2", Currency::Gmd).unwrap().id;
    ledger.deposit(a, gmd(500)).unwrap();

    let writer = {
        let ledger = Arc::clone(&ledger);
        thread::spawn(move || {
            for _ in 0..200 {
                ledger.transfer(a, b, gmd(1)).unwrap();
                ledger.transfer(b, a, gmd(1)).unwrap();
            }
        })
    };

    for _ in 0..200 {
        let balance = ledger.get_balance(a).unwrap();
        assert!(balance == gmd(500) || balance == gmd(499));
    }
    writer.join().unwrap();
    assert_eq!(ledger.get_balance(a).unwrap(), gmd(500));
}

fn minor(amount: i64) -> Money {
    Money::from_minor(amount, Currency::Gmd)
}

/// borrower holding a freshly disbursed GMD 1,000 loan
fn disbursed_loan(ledger: &Arc<AccountLedger>) -> (Arc<LoanEngine>, AccountId, LoanId) {
    let engine = Arc::new(LoanEngine::new(Arc::clone(ledger)));
    let account = ledger.open_account("borrower", Currency::Gmd).unwrap().id;
    let loan = engine.apply(account, LoanType::Personal, gmd(1_000), 12, "roof").unwrap();
    engine.approve(loan.id).unwrap();
    engine.disburse(loan.id).unwrap();
    (engine, account, loan.id)
}

#[test]
fn loan_payment_and_withdrawal_never_jointly_overdraw() {
    for _ in 0..25 {
        let ledger = ledger();
        let (engine, account, loan_id) = disbursed_loan(&ledger);
        let start = Arc::new(Barrier::new(2));

        let payer = {
            let engine = Arc::clone(&engine);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                engine.apply_payment(loan_id, minor(8_379))
            })
        };
        let withdrawer = {
            let ledger = Arc::clone(&ledger);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                ledger.withdraw(account, gmd(995))
            })
        };
        let payment = payer.join().unwrap();
        let withdrawal = withdrawer.join().unwrap();

        assert_ne!(payment.is_ok(), withdrawal.is_ok());
        let loan = engine.get_loan(loan_id).unwrap();
        match payment {
            Ok(_) => {
                assert!(matches!(withdrawal, Err(LedgerError::InsufficientFunds { .. })));
                assert_eq!(ledger.get_balance(account).unwrap(), minor(100_000 - 8_379));
                assert_eq!(loan.installments_paid, 1);
            }
            Err(err) => {
                assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
                assert_eq!(ledger.get_balance(account).unwrap(), minor(500));
                assert_eq!(loan.installments_paid, 0);
                assert_eq!(loan.outstanding_principal, gmd(1_000));
            }
        }
    }
}

#[test]
fn disbursement_and_transfer_on_the_borrower_both_land() {
    for _ in 0..25 {
        let ledger = ledger();
        let engine = Arc::new(LoanEngine::new(Arc::clone(&ledger)));
        let borrower = ledger.open_account("borrower", Currency::Gmd).unwrap().id;
        let saver = ledger.open_account("saver", Currency::Gmd).unwrap().id;
        ledger.deposit(borrower, gmd(100)).unwrap();
        let loan = engine.apply(borrower, LoanType::Business, gmd(1_000), 6, "stock").unwrap();
        engine.approve(loan.id).unwrap();

        let start = Arc::new(Barrier::new(2));
        let disburser = {
            let engine = Arc::clone(&engine);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                engine.disburse(loan.id)
            })
        };
        let sender = {
            let ledger = Arc::clone(&ledger);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                ledger.transfer(borrower, saver, gmd(100))
            })
        };
        disburser.join().unwrap().unwrap();
        sender.join().unwrap().unwrap();

        assert_eq!(ledger.get_balance(borrower).unwrap(), gmd(1_000));
        assert_eq!(ledger.get_balance(saver).unwrap(), gmd(100));
        assert_eq!(ledger.transactions(borrower).unwrap().len(), 3);
    }
}
