//! Rules that need no database: pay arithmetic and status workflows.

pub mod deductions;
pub mod delivery;
pub mod hours;
pub mod money;
pub mod payslip;
pub mod sale;
