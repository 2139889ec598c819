pub mod amortization;
pub mod waterfall;

pub use amortization::{
    compute_schedule, due_date, monthly_interest, AmortizationCalculator, AmortizationSchedule,
    Installment,
};
pub use waterfall::{allocate, AmountsDue};
