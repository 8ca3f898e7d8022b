//! Payslip line derivation and total reconciliation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::deductions::{self, PeriodType};
use super::money::{round2, to_fixed};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayslipStatus {
    Draft,
    Final,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayrollRunStatus {
    Draft,
    Finalized,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EarningType {
    Regular,
    Overtime,
    Bonus,
    Allowance,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeductionType {
    Tax,
    Sss,
    Philhealth,
    Pagibig,
    Loan,
    Other,
}

/// One earning or deduction line ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line<K> {
    pub kind: K,
    pub amount: Decimal,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedLines {
    pub total_hours: Decimal,
    pub earning: Line<EarningType>,
    pub deductions: Vec<Line<DeductionType>>,
}

/// Gross pay for the hours worked. Non-positive hours or rate pay nothing.
pub fn gross_pay(total_hours: Decimal, rate: Decimal) -> Decimal {
    if total_hours <= Decimal::ZERO || rate <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round2(total_hours * rate)
}

/// Builds the regular earning and the non-zero statutory deductions for a
/// payslip from attendance hours.
pub fn derive_lines(total_hours: Decimal, rate: Decimal, period: PeriodType) -> DerivedLines {
    let gross = gross_pay(total_hours, rate);
    let statutory = deductions::compute(gross, period);

    let earning = Line {
        kind: EarningType::Regular,
        amount: gross,
        description: format!(
            "{} hours × ₱{}/hour",
            to_fixed(total_hours),
            to_fixed(rate.max(Decimal::ZERO))
        ),
    };

    let candidates = [
        (DeductionType::Sss, statutory.sss, "SSS contribution"),
        (DeductionType::Philhealth, statutory.philhealth, "PhilHealth contribution"),
        (DeductionType::Pagibig, statutory.pagibig, "Pag-IBIG contribution"),
        (DeductionType::Tax, statutory.income_tax, "Withholding tax"),
    ];

    let deductions = candidates
        .into_iter()
        .filter(|(_, amount, _)| !amount.is_zero())
        .map(|(kind, amount, description)| Line {
            kind,
            amount,
            description: description.to_string(),
        })
        .collect();

    DerivedLines {
        total_hours,
        earning,
        deductions,
    }
}

const TOTALS_TOLERANCE: Decimal = dec!(0.01);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayslipTotals {
    pub gross_pay: Decimal,
    pub total_deductions: Decimal,
    pub net_pay: Decimal,
}

impl PayslipTotals {
    pub fn from_lines<E, D>(earnings: E, deductions: D) -> Self
    where
        E: IntoIterator<Item = Decimal>,
        D: IntoIterator<Item = Decimal>,
    {
        let gross_pay = round2(earnings.into_iter().sum());
        let total_deductions = round2(deductions.into_iter().sum());
        PayslipTotals {
            gross_pay,
            total_deductions,
            net_pay: gross_pay - total_deductions,
        }
    }

    /// True when any stored figure is more than a cent away from the recomputed one.
    pub fn differs_from(&self, stored: &PayslipTotals) -> bool {
        let off = |a: Decimal, b: Decimal| (a - b).abs() > TOTALS_TOLERANCE;
        off(self.gross_pay, stored.gross_pay)
            || off(self.total_deductions, stored.total_deductions)
            || off(self.net_pay, stored.net_pay)
    }
}

/// Whether stored totals follow the lines exactly or only once they drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Lines were just written or the run is being finalized.
    Force,
    /// Plain read; a drift of a cent is left alone.
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalsCheck {
    /// The stored row must be overwritten with the recomputed totals.
    pub persist: bool,
    /// Stored figures are not exactly the recomputed ones.
    pub mismatch: bool,
}

/// Decides what to do with a payslip's stored totals. Final payslips are never
/// written.
pub fn check_totals(
    status: PayslipStatus,
    mode: ReconcileMode,
    fresh: &PayslipTotals,
    stored: &PayslipTotals,
) -> TotalsCheck {
    let mismatch = fresh != stored;
    let persist = match (status, mode) {
        (PayslipStatus::Final, _) => false,
        (PayslipStatus::Draft, ReconcileMode::Force) => mismatch,
        (PayslipStatus::Draft, ReconcileMode::Lazy) => fresh.differs_from(stored),
    };
    TotalsCheck { persist, mismatch }
}

/// A draft payslip with no earnings yet gets its lines derived from attendance.
pub fn needs_derivation(status: PayslipStatus, earning_count: usize) -> bool {
    status == PayslipStatus::Draft && earning_count == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn forty_hours_at_one_fifty() {
        let lines = derive_lines(dec!(40.00), dec!(150.00), PeriodType::Monthly);

        assert_eq!(lines.earning.kind, EarningType::Regular);
        assert_eq!(to_fixed(lines.earning.amount), "6000.00");
        assert_eq!(lines.earning.description, "40.00 hours × ₱150.00/hour");

        let kinds: Vec<_> = lines.deductions.iter().map(|d| d.kind).collect();
        // tax is zero at this income and is omitted
        assert_eq!(
            kinds,
            vec![DeductionType::Sss, DeductionType::Philhealth, DeductionType::Pagibig]
        );

        let totals = PayslipTotals::from_lines(
            [lines.earning.amount],
            lines.deductions.iter().map(|d| d.amount),
        );
        assert_eq!(to_fixed(totals.gross_pay), "6000.00");
        assert_eq!(totals.net_pay, dec!(6000.00) - dec!(630.00));
    }

    #[test]
    fn zero_rate_derives_no_deductions() {
        let lines = derive_lines(dec!(16), Decimal::ZERO, PeriodType::Weekly);
        assert!(lines.earning.amount.is_zero());
        assert!(lines.deductions.is_empty());
    }

    #[test]
    fn negative_rate_is_clamped() {
        assert_eq!(gross_pay(dec!(8), dec!(-10)), Decimal::ZERO);
        assert_eq!(gross_pay(dec!(-8), dec!(10)), Decimal::ZERO);
    }

    #[test]
    fn totals_fold_current_lines() {
        let totals = PayslipTotals::from_lines(
            [dec!(6000.00), dec!(500.00)],
            [dec!(270.00), dec!(240.00), dec!(1000.00)],
        );
        assert_eq!(totals.gross_pay, dec!(6500.00));
        assert_eq!(totals.total_deductions, dec!(1510.00));
        assert_eq!(totals.net_pay, totals.gross_pay - totals.total_deductions);
    }

    #[test]
    fn stale_totals_are_detected() {
        let fresh = PayslipTotals::from_lines([dec!(100)], [dec!(10)]);
        let stored = PayslipTotals {
            gross_pay: dec!(100.00),
            total_deductions: dec!(10.00),
            net_pay: dec!(90.00),
        };
        assert!(!fresh.differs_from(&stored));

        let within_a_cent = PayslipTotals {
            net_pay: dec!(90.01),
            ..stored
        };
        assert!(!fresh.differs_from(&within_a_cent));

        let stale = PayslipTotals {
            net_pay: dec!(90.02),
            ..stored
        };
        assert!(fresh.differs_from(&stale));
    }

    fn stored(gross: Decimal, deductions: Decimal) -> PayslipTotals {
        PayslipTotals {
            gross_pay: gross,
            total_deductions: deductions,
            net_pay: gross - deductions,
        }
    }

    #[test]
    fn one_cent_edit_is_persisted() {
        let before = stored(dec!(6000.00), dec!(630.00));
        let after = PayslipTotals::from_lines([dec!(6000.01)], [dec!(630.00)]);

        let check = check_totals(PayslipStatus::Draft, ReconcileMode::Force, &after, &before);
        assert!(check.persist);
        assert!(check.mismatch);
        assert_eq!(after.net_pay, dec!(5370.01));

        let lazy = check_totals(PayslipStatus::Draft, ReconcileMode::Lazy, &after, &before);
        assert!(!lazy.persist);
    }

    #[test]
    fn matching_totals_are_left_alone() {
        let totals = stored(dec!(6000.00), dec!(630.00));
        let check = check_totals(PayslipStatus::Draft, ReconcileMode::Force, &totals, &totals);
        assert_eq!(check, TotalsCheck { persist: false, mismatch: false });
    }

    #[test]
    fn final_payslips_flag_any_drift_but_never_persist() {
        let before = stored(dec!(6000.00), dec!(630.00));
        let after = PayslipTotals::from_lines([dec!(6000.01)], [dec!(630.00)]);

        for mode in [ReconcileMode::Force, ReconcileMode::Lazy] {
            let check = check_totals(PayslipStatus::Final, mode, &after, &before);
            assert!(!check.persist);
            assert!(check.mismatch);
        }
    }

    #[test]
    fn derivation_only_for_empty_drafts() {
        assert!(needs_derivation(PayslipStatus::Draft, 0));
        assert!(!needs_derivation(PayslipStatus::Draft, 1));
        assert!(!needs_derivation(PayslipStatus::Final, 0));
    }
}
