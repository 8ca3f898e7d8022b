//! Statutory deductions withheld from a payslip.
//!
//! Contribution rates are flat percentages of gross pay. Income tax uses the
//! annual progressive brackets: gross pay net of contributions is annualised
//! with the pay frequency, taxed, then divided back into one period.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::money::round2;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PeriodType {
    Weekly,
    BiWeekly,
    Monthly,
}

impl PeriodType {
    pub fn periods_per_year(self) -> Decimal {
        match self {
            PeriodType::Weekly => dec!(52),
            PeriodType::BiWeekly => dec!(26),
            PeriodType::Monthly => dec!(12),
        }
    }
}

pub const SSS_RATE: Decimal = dec!(0.045);
pub const PHILHEALTH_RATE: Decimal = dec!(0.04);

const PAGIBIG_LOW_RATE: Decimal = dec!(0.01);
const PAGIBIG_RATE: Decimal = dec!(0.02);
/// Monthly compensation at or below this uses the low Pag-IBIG rate.
const PAGIBIG_LOW_CEILING: Decimal = dec!(1500);
const PAGIBIG_MONTHLY_CAP: Decimal = dec!(200);

/// (lower bound, tax at lower bound, marginal rate over lower bound)
const ANNUAL_BRACKETS: [(Decimal, Decimal, Decimal); 6] = [
    (dec!(0), dec!(0), dec!(0)),
    (dec!(250000), dec!(0), dec!(0.15)),
    (dec!(400000), dec!(22500), dec!(0.20)),
    (dec!(800000), dec!(102500), dec!(0.25)),
    (dec!(2000000), dec!(402500), dec!(0.30)),
    (dec!(8000000), dec!(2202500), dec!(0.35)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatutoryDeductions {
    pub sss: Decimal,
    pub philhealth: Decimal,
    pub pagibig: Decimal,
    pub income_tax: Decimal,
    pub total: Decimal,
}

impl StatutoryDeductions {
    pub const ZERO: StatutoryDeductions = StatutoryDeductions {
        sss: Decimal::ZERO,
        philhealth: Decimal::ZERO,
        pagibig: Decimal::ZERO,
        income_tax: Decimal::ZERO,
        total: Decimal::ZERO,
    };
}

/// Computes the four statutory deductions for one pay period.
///
/// Negative gross pay is treated as zero.
pub fn compute(gross_pay: Decimal, period: PeriodType) -> StatutoryDeductions {
    if gross_pay <= Decimal::ZERO {
        return StatutoryDeductions::ZERO;
    }

    let sss = round2(gross_pay * SSS_RATE);
    let philhealth = round2(gross_pay * PHILHEALTH_RATE);
    let pagibig = round2(pagibig_contribution(gross_pay, period));

    let taxable = (gross_pay - sss - philhealth - pagibig).max(Decimal::ZERO);
    let income_tax = round2(period_income_tax(taxable, period));

    StatutoryDeductions {
        sss,
        philhealth,
        pagibig,
        income_tax,
        total: sss + philhealth + pagibig + income_tax,
    }
}

fn pagibig_contribution(gross_pay: Decimal, period: PeriodType) -> Decimal {
    let per_year = period.periods_per_year();
    let monthly_equivalent = gross_pay * per_year / dec!(12);

    let rate = if monthly_equivalent <= PAGIBIG_LOW_CEILING {
        PAGIBIG_LOW_RATE
    } else {
        PAGIBIG_RATE
    };
    let cap = PAGIBIG_MONTHLY_CAP * dec!(12) / per_year;

    (gross_pay * rate).min(cap)
}

fn period_income_tax(taxable: Decimal, period: PeriodType) -> Decimal {
    let per_year = period.periods_per_year();
    annual_income_tax(taxable * per_year) / per_year
}

pub fn annual_income_tax(annual_taxable: Decimal) -> Decimal {
    ANNUAL_BRACKETS
        .iter()
        .rev()
        .find(|(lower, _, _)| annual_taxable > *lower)
        .map(|(lower, base, rate)| *base + (annual_taxable - *lower) * *rate)
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_six_thousand_matches_reference_figures() {
        let d = compute(dec!(6000.00), PeriodType::Monthly);
        assert_eq!(d.sss, dec!(270.00));
        assert_eq!(d.philhealth, dec!(240.00));
        assert_eq!(d.pagibig, dec!(120.00));
        // 5,370 a month annualises to 64,440, under the zero bracket
        assert_eq!(d.income_tax, Decimal::ZERO);
        assert_eq!(d.total, dec!(630.00));
    }

    #[test]
    fn pagibig_is_capped_per_period() {
        let monthly = compute(dec!(50000), PeriodType::Monthly);
        assert_eq!(monthly.pagibig, dec!(200.00));

        let weekly = compute(dec!(20000), PeriodType::Weekly);
        // 200 * 12 / 52
        assert_eq!(weekly.pagibig, dec!(46.15));
    }

    #[test]
    fn pagibig_low_rate_below_ceiling() {
        let d = compute(dec!(1000), PeriodType::Monthly);
        assert_eq!(d.pagibig, dec!(10.00));
    }

    #[test]
    fn income_tax_uses_progressive_brackets() {
        let d = compute(dec!(50000), PeriodType::Monthly);
        // taxable 45,550 -> annual 546,600 -> 22,500 + 20% of 146,600 = 51,820
        assert_eq!(d.income_tax, dec!(4318.33));
        assert_eq!(d.total, dec!(2250.00) + dec!(2000.00) + dec!(200.00) + dec!(4318.33));
    }

    #[test]
    fn annual_bracket_edges() {
        assert_eq!(annual_income_tax(dec!(250000)), Decimal::ZERO);
        assert_eq!(annual_income_tax(dec!(400000)), dec!(22500));
        assert_eq!(annual_income_tax(dec!(800000)), dec!(102500));
        assert_eq!(annual_income_tax(dec!(2000000)), dec!(402500));
        assert_eq!(annual_income_tax(dec!(8000000)), dec!(2202500));
        assert_eq!(annual_income_tax(dec!(8000100)), dec!(2202535));
    }

    #[test]
    fn non_positive_gross_yields_no_deductions() {
        for period in [PeriodType::Weekly, PeriodType::BiWeekly, PeriodType::Monthly] {
            assert_eq!(compute(Decimal::ZERO, period), StatutoryDeductions::ZERO);
            assert_eq!(compute(dec!(-500), period), StatutoryDeductions::ZERO);
        }
    }

    #[test]
    fn components_sum_to_total_and_stay_non_negative() {
        let grosses = [
            dec!(0.01),
            dec!(375.50),
            dec!(1500),
            dec!(1500.01),
            dec!(9615.38),
            dec!(20833.33),
            dec!(33333.34),
            dec!(166666.67),
            dec!(700000),
        ];
        for period in [PeriodType::Weekly, PeriodType::BiWeekly, PeriodType::Monthly] {
            for gross in grosses {
                let d = compute(gross, period);
                assert_eq!(d.sss + d.philhealth + d.pagibig + d.income_tax, d.total);
                for part in [d.sss, d.philhealth, d.pagibig, d.income_tax] {
                    assert!(part >= Decimal::ZERO, "{} {:?}", gross, period);
                    assert!(part.scale() <= 2);
                }
            }
        }
    }

    #[test]
    fn period_type_parses_snake_case() {
        assert_eq!("bi_weekly".parse::<PeriodType>().unwrap(), PeriodType::BiWeekly);
        assert_eq!(PeriodType::Monthly.as_ref(), "monthly");
        assert!("fortnightly".parse::<PeriodType>().is_err());
    }
}
