//! Database workflows shared by several handlers.

pub mod audit;
pub mod employees;
pub mod inventory;
pub mod notify;
pub mod payroll;
pub mod payslip;
pub mod tracking;

use std::str::FromStr;

use crate::error::AppError;

/// Parses a status or type column written by this service.
pub fn parse_stored<T: FromStr>(raw: &str, what: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| AppError::Internal(format!("unexpected {} {:?} in database", what, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payslip::{PayrollRunStatus, PayslipStatus};

    #[test]
    fn parse_stored_reports_unknown_values() {
        assert_eq!(
            parse_stored::<PayslipStatus>("final", "payslip status").unwrap(),
            PayslipStatus::Final
        );
        assert!(matches!(
            parse_stored::<PayslipStatus>("paid", "payslip status"),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn payroll_run_status_round_trips_through_its_column() {
        assert_eq!(PayrollRunStatus::Finalized.as_ref(), "finalized");
        assert_eq!(
            parse_stored::<PayrollRunStatus>("draft", "payroll run status").unwrap(),
            PayrollRunStatus::Draft
        );
        assert!(parse_stored::<PayrollRunStatus>("final", "payroll run status").is_err());
    }
}
