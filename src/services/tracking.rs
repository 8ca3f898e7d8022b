use rand::Rng;
use rand::distributions::Alphanumeric;
use sqlx::MySqlConnection;
use tracing::warn;

use crate::error::AppError;

const PREFIX: &str = "DLV-";
const CODE_LEN: usize = 8;
const MAX_ATTEMPTS: usize = 5;

pub fn random_tracking_number<R: Rng>(rng: &mut R) -> String {
    let code: String = rng
        .sample_iter(&Alphanumeric)
        .take(CODE_LEN)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("{}{}", PREFIX, code)
}

/// Generates a tracking number not yet present in `deliveries`, trying at
/// most five codes.
pub async fn allocate_tracking_number(conn: &mut MySqlConnection) -> Result<String, AppError> {
    for attempt in 1..=MAX_ATTEMPTS {
        let candidate = random_tracking_number(&mut rand::thread_rng());
        let taken = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM deliveries WHERE tracking_number = ?",
        )
        .bind(&candidate)
        .fetch_one(&mut *conn)
        .await?;

        if taken == 0 {
            return Ok(candidate);
        }
        warn!(attempt, tracking_number = %candidate, "Tracking number collision");
    }

    Err(AppError::Internal(
        "could not allocate a unique tracking number".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn tracking_number_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let number = random_tracking_number(&mut rng);
        assert!(number.starts_with("DLV-"));
        assert_eq!(number.len(), 12);
        assert!(number[4..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn seeded_codes_differ() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_ne!(random_tracking_number(&mut rng), random_tracking_number(&mut rng));
    }
}
