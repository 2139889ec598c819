use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::PaymentApplication;

/// what a loan currently owes, in the order a payment settles it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountsDue {
    /// unpaid interest of the current installment period
    pub interest: Money,
    pub principal: Money,
}

impl AmountsDue {
    pub fn total(&self) -> Result<Money> {
        self.interest.checked_add(self.principal)
    }
}

#[derive(Debug, Clone, Copy)]
enum Component {
    Interest,
    Principal,
}

/// interest first, then principal; whatever is left is excess
const ORDER: [Component; 2] = [Component::Interest, Component::Principal];

/// split `amount` across `due`, reducing `due` by what was applied
pub fn allocate(amount: Money, due: &mut AmountsDue) -> Result<PaymentApplication> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount {
            message: format!("payment must be positive, got {amount}"),
        });
    }
    due.total()?.checked_add(amount)?;

    let zero = Money::zero(amount.currency());
    let mut application = PaymentApplication {
        to_interest: zero,
        to_principal: zero,
        excess: zero,
    };

    let mut remaining = amount;
    for component in ORDER {
        let (balance, applied) = match component {
            Component::Interest => (&mut due.interest, &mut application.to_interest),
            Component::Principal => (&mut due.principal, &mut application.to_principal),
        };
        let portion = remaining.min(*balance).max(zero);
        *balance -= portion;
        *applied = portion;
        remaining -= portion;
    }
    application.excess = remaining;

    Ok(application)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Currency;

    fn gmd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::Gmd)
    }

    #[test]
    fn test_interest_is_paid_first() {
        let mut due = AmountsDue {
            interest: gmd(83),
            principal: gmd(100_000),
        };
        let application = allocate(gmd(50), &mut due).unwrap();
        assert_eq!(application.to_interest, gmd(50));
        assert_eq!(application.to_principal, gmd(0));
        assert_eq!(due.interest, gmd(33));

        let application = allocate(gmd(8_379), &mut due).unwrap();
        assert_eq!(application.to_interest, gmd(33));
        assert_eq!(application.to_principal, gmd(8_346));
        assert_eq!(due.principal, gmd(91_654));
    }

    #[test]
    fn test_overpayment_reports_excess() {
        let mut due = AmountsDue {
            interest: gmd(42),
            principal: gmd(50_000),
        };
        let application = allocate(gmd(60_000), &mut due).unwrap();
        assert_eq!(application.total_applied(), gmd(50_042));
        assert_eq!(application.excess, gmd(9_958));
        assert_eq!(due.total().unwrap(), gmd(0));
    }

    #[test]
    fn test_rejects_bad_amounts() {
        let mut due = AmountsDue {
            interest: gmd(1),
            principal: gmd(1),
        };
        assert!(allocate(gmd(0), &mut due).is_err());
        assert!(matches!(
            allocate(Money::from_minor(5, Currency::Usd), &mut due),
            Err(LedgerError::CurrencyMismatch { .. })
        ));
        assert_eq!(due.total().unwrap(), gmd(2));
    }
}
