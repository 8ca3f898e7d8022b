use crate::models::{Claims, TokenType};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

/// Identity carried into a token.
pub struct TokenSubject<'a> {
    pub user_id: u64,
    pub username: &'a str,
    pub roles: &'a [String],
    pub employee_id: Option<u64>,
}

fn issue(
    subject: &TokenSubject<'_>,
    token_type: TokenType,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    let claims = Claims {
        user_id: subject.user_id,
        sub: subject.username.to_string(),
        roles: subject.roles.to_vec(),
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
        employee_id: subject.employee_id,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn generate_access_token(
    subject: &TokenSubject<'_>,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    issue(subject, TokenType::Access, secret, ttl).map(|(token, _)| token)
}

pub fn generate_refresh_token(
    subject: &TokenSubject<'_>,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    issue(subject, TokenType::Refresh, secret, ttl)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(roles: &[String]) -> TokenSubject<'_> {
        TokenSubject {
            user_id: 7,
            username: "rhea",
            roles,
            employee_id: Some(3),
        }
    }

    #[test]
    fn access_token_round_trip() {
        let roles = vec!["cashier".to_string()];
        let token = generate_access_token(&subject(&roles), "secret", 60).unwrap();
        let claims = verify_token(&token, "secret").unwrap();

        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.sub, "rhea");
        assert_eq!(claims.roles, roles);
        assert_eq!(claims.employee_id, Some(3));
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn refresh_tokens_get_unique_jti() {
        let roles: Vec<String> = vec![];
        let (_, a) = generate_refresh_token(&subject(&roles), "secret", 60).unwrap();
        let (_, b) = generate_refresh_token(&subject(&roles), "secret", 60).unwrap();
        assert_eq!(a.token_type, TokenType::Refresh);
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let roles: Vec<String> = vec![];
        let token = generate_access_token(&subject(&roles), "secret", 60).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }
}
