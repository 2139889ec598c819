//! member portal - savings, a transfer and a micro-loan from application to payoff
use chrono::{Duration, TimeZone, Utc};
use credit_union_ledger::{
    AccountLedger, AccountView, Currency, InMemoryStore, LedgerConfig, LoanEngine, LoanType,
    LoanView, Money, SafeTimeProvider, TimeSource,
};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== member portal ===\n");

    let time = Arc::new(SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    )));
    let controller = time.test_control().unwrap();

    let config = LedgerConfig::default();
    println!("configuration:\n{}\n", config.to_json_pretty()?);

    let ledger = Arc::new(AccountLedger::new(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::clone(&time),
    )?);
    let engine = LoanEngine::new(Arc::clone(&ledger));

    // 1. savings
    println!("1. savings");
    println!("----------");
    let awa = ledger.open_account("member-awa", Currency::Gmd)?;
    let lamin = ledger.open_default_account("member-lamin")?;
    ledger.deposit(awa.id, Money::from_major(2_500, Currency::Gmd)?)?;
    ledger.transfer(awa.id, lamin.id, Money::from_major(400, Currency::Gmd)?)?;
    println!("  awa:   {}", ledger.get_balance(awa.id)?);
    println!("  lamin: {}", ledger.get_balance(lamin.id)?);

    // 2. loan origination
    println!("\n2. loan origination");
    println!("-------------------");
    let loan = engine.apply(
        awa.id,
        LoanType::Business,
        Money::from_major(1_000, Currency::Gmd)?,
        6,
        "market stall stock",
    )?;
    let loan = engine.approve(loan.id)?;
    if let Some(payment) = loan.monthly_payment {
        println!("  monthly payment: {payment}");
    }
    if let Some(schedule) = &loan.schedule {
        for row in &schedule.installments {
            println!(
                "    #{:<2} {}  pay {}  interest {}  left {}",
                row.index,
                row.due_date.format("%Y-%m-%d"),
                row.payment,
                row.interest_portion,
                row.ending_balance
            );
        }
    }
    engine.disburse(loan.id)?;
    println!("  ✓ disbursed, balance now {}", ledger.get_balance(awa.id)?);

    // 3. servicing
    println!("\n3. servicing");
    println!("------------");
    for _ in 0..2 {
        controller.advance(Duration::days(31));
        if let Some(due) = engine.next_installment(loan.id)? {
            let paid = engine.apply_payment(loan.id, due.payment)?;
            println!(
                "  {}: paid installment {} ({} interest), outstanding {}",
                time.now().format("%Y-%m-%d"),
                due.index,
                paid.application.to_interest,
                paid.outstanding_principal
            );
        }
    }

    // 4. early payoff
    println!("\n4. early payoff");
    println!("---------------");
    let quote = engine.payoff_quote(loan.id)?;
    println!("  quote: {} ({} interest)", quote.total, quote.interest);
    let paid = engine.apply_payment(loan.id, quote.total)?;
    println!("  status: {}", paid.status);

    println!("\n{}", AccountView::from_ledger(&ledger, awa.id)?.to_json_pretty()?);
    println!("{}", LoanView::from_loan(&engine.get_loan(loan.id)?)?.to_json_pretty()?);

    Ok(())
}
