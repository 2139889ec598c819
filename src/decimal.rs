use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::errors::{LedgerError, Result};

/// currencies the credit union books in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// gambian dalasi, minor unit butut
    #[default]
    Gmd,
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    /// iso 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Gmd => "GMD",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    /// number of decimal places of the minor unit
    pub fn exponent(&self) -> u32 {
        2
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GMD" => Ok(Currency::Gmd),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            _ => Err(LedgerError::InvalidConfiguration {
                message: format!("unknown currency: {s}"),
            }),
        }
    }
}

/// rounding applied whenever a computation leaves a fraction of a minor unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RoundingRule {
    /// half a minor unit rounds away from zero
    #[default]
    HalfUp,
    /// banker's rounding
    HalfEven,
    /// toward zero
    Down,
    /// away from zero
    Up,
}

impl RoundingRule {
    fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingRule::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingRule::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingRule::Down => RoundingStrategy::ToZero,
            RoundingRule::Up => RoundingStrategy::AwayFromZero,
        }
    }

    /// round a fractional minor-unit amount to a whole minor unit
    pub fn apply(self, minor: Decimal) -> Result<i64> {
        minor
            .round_dp_with_strategy(0, self.strategy())
            .to_i64()
            .ok_or(LedgerError::ArithmeticOverflow)
    }
}

/// money held as an integer count of minor units (butut, cents) in one currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    minor: i64,
    currency: Currency,
}

impl Money {
    pub const fn from_minor(minor: i64, currency: Currency) -> Self {
        Money { minor, currency }
    }

    pub const fn zero(currency: Currency) -> Self {
        Money { minor: 0, currency }
    }

    /// create from a whole amount of the major unit (dalasi, dollars)
    pub fn from_major(major: i64, currency: Currency) -> Result<Self> {
        let minor = major
            .checked_mul(10_i64.pow(currency.exponent()))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(Money { minor, currency })
    }

    /// parse a decimal major-unit string such as "12.34"; more precision than
    /// the minor unit is rejected rather than rounded
    pub fn parse(s: &str, currency: Currency) -> Result<Self> {
        let d = Decimal::from_str(s.trim()).map_err(|_| LedgerError::InvalidAmount {
            message: format!("not a decimal amount: {s}"),
        })?;
        let scaled = d * Decimal::from(10_i64.pow(currency.exponent()));
        if scaled.fract() != Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                message: format!("{s} is finer than one minor unit of {currency}"),
            });
        }
        let minor = scaled.to_i64().ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(Money { minor, currency })
    }

    pub fn minor(&self) -> i64 {
        self.minor
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// value in major units as an exact decimal
    pub fn as_decimal(&self) -> Decimal {
        Decimal::new(self.minor, self.currency.exponent())
    }

    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    pub fn is_negative(&self) -> bool {
        self.minor < 0
    }

    pub fn abs(&self) -> Self {
        Money {
            minor: self.minor.abs(),
            currency: self.currency,
        }
    }

    pub fn min(self, other: Self) -> Self {
        if self.minor <= other.minor { self } else { other }
    }

    pub fn max(self, other: Self) -> Self {
        if self.minor >= other.minor { self } else { other }
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<()> {
        if self.currency != other.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }

    pub fn checked_add(self, other: Money) -> Result<Money> {
        self.ensure_same_currency(&other)?;
        let minor = self
            .minor
            .checked_add(other.minor)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(Money::from_minor(minor, self.currency))
    }

    pub fn checked_sub(self, other: Money) -> Result<Money> {
        self.ensure_same_currency(&other)?;
        let minor = self
            .minor
            .checked_sub(other.minor)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(Money::from_minor(minor, self.currency))
    }

    /// subtract where the caller's contract forbids a negative result
    pub fn subtract_non_negative(self, other: Money) -> Result<Money> {
        let result = self.checked_sub(other)?;
        if result.is_negative() {
            return Err(LedgerError::InsufficientFunds {
                available: self,
                requested: other,
            });
        }
        Ok(result)
    }

    /// multiply by a rate (0.01 == 1%) and round to the minor unit
    pub fn multiply_by_rate(&self, rate: Decimal, rule: RoundingRule) -> Result<Money> {
        let product = Decimal::from(self.minor)
            .checked_mul(rate)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(Money::from_minor(rule.apply(product)?, self.currency))
    }

    /// multiply by `numerator / denominator` and round once at the end, so
    /// e.g. a monthly share of an annual rate is not truncated before use
    pub fn multiply_by_ratio(
        &self,
        numerator: Decimal,
        denominator: Decimal,
        rule: RoundingRule,
    ) -> Result<Money> {
        if denominator.is_zero() {
            return Err(LedgerError::InvalidAmount {
                message: "ratio with zero denominator".to_string(),
            });
        }
        let product = Decimal::from(self.minor)
            .checked_mul(numerator)
            .and_then(|p| p.checked_div(denominator))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(Money::from_minor(rule.apply(product)?, self.currency))
    }

    /// percentage of this amount, e.g. `percentage_of(dec!(5))` is 5%
    pub fn percentage_of(&self, percent: Decimal, rule: RoundingRule) -> Result<Money> {
        self.multiply_by_rate(percent / Decimal::ONE_HUNDRED, rule)
    }

    /// split into `parts` amounts of equal size after rounding; the last part
    /// takes whatever remainder makes the parts sum back to `self` exactly
    pub fn split_evenly(&self, parts: u32, rule: RoundingRule) -> Result<Vec<Money>> {
        if parts == 0 {
            return Err(LedgerError::InvalidAmount {
                message: "cannot split into zero parts".to_string(),
            });
        }

        let share = Decimal::from(self.minor) / Decimal::from(parts);
        let mut base = rule.apply(share)?;
        let head = i64::from(parts - 1);

        // rounding up must never push the final part past zero
        if (base * head).abs() > self.minor.abs() {
            base = RoundingRule::Down.apply(share)?;
        }

        let last = self.minor - base * head;
        let mut out = vec![Money::from_minor(base, self.currency); parts as usize - 1];
        out.push(Money::from_minor(last, self.currency));
        Ok(out)
    }

    /// sum a sequence of amounts of one currency
    pub fn sum<'a, I>(currency: Currency, amounts: I) -> Result<Money>
    where
        I: IntoIterator<Item = &'a Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.checked_add(*m))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.as_decimal())
    }
}

impl PartialOrd for Money {
    /// amounts of different currencies are unordered
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        Some(self.minor.cmp(&other.minor))
    }
}

// operator forms are for arithmetic inside one currency, where the operands
// were already validated; they panic on a currency mismatch or overflow.

impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        assert_eq!(self.currency, other.currency, "currency mismatch in Money addition");
        Money::from_minor(self.minor + other.minor, self.currency)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        *self = *self + other;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        assert_eq!(self.currency, other.currency, "currency mismatch in Money subtraction");
        Money::from_minor(self.minor - other.minor, self.currency)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        *self = *self - other;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money::from_minor(-self.minor, self.currency)
    }
}

/// rate type for interest rates, percentages, and ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(Decimal::ZERO);

    /// create from decimal (e.g., 0.05 for 5%)
    pub fn from_decimal(d: Decimal) -> Self {
        Rate(d)
    }

    /// create from percentage (e.g., 5 for 5%)
    pub fn from_percentage(p: u32) -> Self {
        Rate(Decimal::from(p) / Decimal::ONE_HUNDRED)
    }

    /// create from basis points (e.g., 500 for 5%)
    pub fn from_bps(bps: u32) -> Self {
        Rate(Decimal::from(bps) / Decimal::from(10_000))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_percentage(&self) -> Decimal {
        self.0 * Decimal::ONE_HUNDRED
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// monthly rate from annual rate
    pub fn monthly_rate(&self) -> Rate {
        Rate(self.0 / Decimal::from(12))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage().normalize())
    }
}

impl From<Decimal> for Rate {
    fn from(d: Decimal) -> Self {
        Rate::from_decimal(d)
    }
}
