use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::money::round2;
use crate::error::AppError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SaleStatus {
    Draft,
    Held,
    Completed,
    Voided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SaleAction {
    EditItems,
    Hold,
    Resume,
    Complete,
    Void,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Gcash,
}

/// Status a sale moves to when `action` is applied, or why it can't.
pub fn apply_action(current: SaleStatus, action: SaleAction) -> Result<SaleStatus, AppError> {
    use SaleAction::*;
    use SaleStatus::*;

    let next = match (current, action) {
        (Draft, EditItems) => Some(Draft),
        (Draft, Hold) => Some(Held),
        (Held, Resume) => Some(Draft),
        (Draft | Held, Complete) => Some(Completed),
        (Draft | Held, Void) => Some(Voided),
        _ => None,
    };

    next.ok_or_else(|| AppError::Conflict(format!("Cannot {} a {} sale", action, current)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePricing {
    pub quantity: i32,
    pub unit_price: Decimal,
    pub discount: Decimal,
}

impl LinePricing {
    pub fn gross(&self) -> Decimal {
        round2(Decimal::from(self.quantity) * self.unit_price)
    }

    pub fn line_total(&self) -> Decimal {
        (self.gross() - self.discount).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaleTotals {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
}

pub fn sale_totals<'a, I>(lines: I) -> SaleTotals
where
    I: IntoIterator<Item = &'a LinePricing>,
{
    lines.into_iter().fold(SaleTotals::default(), |acc, line| SaleTotals {
        subtotal: acc.subtotal + line.gross(),
        discount_total: acc.discount_total + line.discount,
        total: acc.total + line.line_total(),
    })
}

/// Change due when the tendered amounts cover the total.
pub fn settle(total: Decimal, payments: &[Decimal]) -> Result<Decimal, AppError> {
    let paid: Decimal = payments.iter().copied().sum();
    if paid < total {
        return Err(AppError::BadRequest("Insufficient payment.".to_string()));
    }
    Ok(paid - total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(quantity: i32, unit_price: Decimal, discount: Decimal) -> LinePricing {
        LinePricing {
            quantity,
            unit_price,
            discount,
        }
    }

    #[test]
    fn two_items_paid_in_full() {
        let lines = [line(2, dec!(100), dec!(0)), line(1, dec!(50), dec!(0))];
        let totals = sale_totals(&lines);
        assert_eq!(totals.total, dec!(250));

        assert_eq!(settle(totals.total, &[dec!(250)]).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn short_payment_is_rejected() {
        let lines = [line(2, dec!(100), dec!(0)), line(1, dec!(50), dec!(0))];
        let totals = sale_totals(&lines);
        match settle(totals.total, &[dec!(200)]) {
            Err(AppError::BadRequest(msg)) => assert_eq!(msg, "Insufficient payment."),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn split_payment_returns_change() {
        assert_eq!(settle(dec!(250), &[dec!(100), dec!(200)]).unwrap(), dec!(50));
    }

    #[test]
    fn discounts_reduce_total_but_not_below_zero() {
        let lines = [line(1, dec!(100), dec!(15.50)), line(1, dec!(10), dec!(25))];
        let totals = sale_totals(&lines);
        assert_eq!(totals.subtotal, dec!(110));
        assert_eq!(totals.discount_total, dec!(40.50));
        assert_eq!(totals.total, dec!(84.50));
    }

    #[test]
    fn lifecycle_transitions() {
        assert_eq!(apply_action(SaleStatus::Draft, SaleAction::Hold).unwrap(), SaleStatus::Held);
        assert_eq!(apply_action(SaleStatus::Held, SaleAction::Resume).unwrap(), SaleStatus::Draft);
        assert_eq!(
            apply_action(SaleStatus::Held, SaleAction::Complete).unwrap(),
            SaleStatus::Completed
        );
        assert!(apply_action(SaleStatus::Held, SaleAction::EditItems).is_err());
        assert!(apply_action(SaleStatus::Completed, SaleAction::Void).is_err());
        assert!(apply_action(SaleStatus::Voided, SaleAction::Resume).is_err());
    }

    #[test]
    fn rejected_action_names_the_state() {
        let err = apply_action(SaleStatus::Completed, SaleAction::Hold).unwrap_err();
        assert_eq!(err.to_string(), "Cannot hold a completed sale");
    }
}
