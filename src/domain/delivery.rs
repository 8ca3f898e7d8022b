use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, EnumIter, AsRefStr,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryStatus {
    Created,
    Picked,
    InTransit,
    OutForDelivery,
    Delivered,
    Failed,
    Returned,
}

/// The only accepted forward step for each non-terminal status.
const NEXT_STATUS: [(DeliveryStatus, DeliveryStatus); 4] = [
    (DeliveryStatus::Created, DeliveryStatus::Picked),
    (DeliveryStatus::Picked, DeliveryStatus::InTransit),
    (DeliveryStatus::InTransit, DeliveryStatus::OutForDelivery),
    (DeliveryStatus::OutForDelivery, DeliveryStatus::Delivered),
];

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Returned
        )
    }

    pub fn next(self) -> Option<DeliveryStatus> {
        NEXT_STATUS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, to)| *to)
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Delivery is already {0}; no further updates are allowed")]
    Terminal(DeliveryStatus),
    #[error("Invalid status transition from {current} to {requested}; expected {expected}")]
    OutOfOrder {
        current: DeliveryStatus,
        requested: DeliveryStatus,
        expected: DeliveryStatus,
    },
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Terminal(_) => AppError::Conflict(e.to_string()),
            TransitionError::OutOfOrder { .. } => AppError::BadRequest(e.to_string()),
        }
    }
}

pub fn check_transition(
    current: DeliveryStatus,
    requested: DeliveryStatus,
) -> Result<DeliveryStatus, TransitionError> {
    if current.is_terminal() {
        return Err(TransitionError::Terminal(current));
    }
    match current.next() {
        Some(expected) if expected == requested => Ok(requested),
        Some(expected) => Err(TransitionError::OutOfOrder {
            current,
            requested,
            expected,
        }),
        None => Err(TransitionError::Terminal(current)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DeliveryStatus; 7] = [
        DeliveryStatus::Created,
        DeliveryStatus::Picked,
        DeliveryStatus::InTransit,
        DeliveryStatus::OutForDelivery,
        DeliveryStatus::Delivered,
        DeliveryStatus::Failed,
        DeliveryStatus::Returned,
    ];

    #[test]
    fn created_only_accepts_picked() {
        for requested in ALL {
            let result = check_transition(DeliveryStatus::Created, requested);
            if requested == DeliveryStatus::Picked {
                assert_eq!(result, Ok(DeliveryStatus::Picked));
            } else {
                assert!(matches!(result, Err(TransitionError::OutOfOrder { .. })));
            }
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        for current in [
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
            DeliveryStatus::Returned,
        ] {
            for requested in ALL {
                assert_eq!(
                    check_transition(current, requested),
                    Err(TransitionError::Terminal(current))
                );
            }
        }
    }

    #[test]
    fn full_forward_walk() {
        let mut status = DeliveryStatus::Created;
        while let Some(next) = status.next() {
            status = check_transition(status, next).unwrap();
        }
        assert_eq!(status, DeliveryStatus::Delivered);
    }

    #[test]
    fn skipping_and_reversing_are_rejected() {
        assert!(check_transition(DeliveryStatus::Picked, DeliveryStatus::OutForDelivery).is_err());
        assert!(check_transition(DeliveryStatus::InTransit, DeliveryStatus::Picked).is_err());
        assert!(check_transition(DeliveryStatus::Picked, DeliveryStatus::Picked).is_err());
    }

    #[test]
    fn error_kinds_map_to_status_codes() {
        use actix_web::ResponseError;
        use actix_web::http::StatusCode;

        let terminal: AppError = TransitionError::Terminal(DeliveryStatus::Delivered).into();
        assert_eq!(terminal.status_code(), StatusCode::CONFLICT);

        let skipped: AppError = check_transition(DeliveryStatus::Created, DeliveryStatus::Delivered)
            .unwrap_err()
            .into();
        assert_eq!(skipped.status_code(), StatusCode::BAD_REQUEST);
    }
}
