use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::Res;

/// Claims carried by dashboard tokens. `user_id` is the identity
/// provider's subject and owns every key created with the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: usize,
}

/// Extracts claims object from JWT token.
/// Requires JWT secret.
pub fn validate_jwt(token: &str, secret: &str) -> Res<JwtClaims> {
    let token_data = jsonwebtoken::decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header};

    fn issue(secret: &str, email: Option<&str>) -> String {
        let claims = JwtClaims {
            user_id: "user-1".to_string(),
            email: email.map(str::to_string),
            exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn issued_token_validates() {
        let token = issue("test-secret", Some("dev@example.com"));

        let claims = validate_jwt(&token, "test-secret").unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.email.as_deref(), Some("dev@example.com"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue("test-secret", None);

        assert!(matches!(
            validate_jwt(&token, "other-secret"),
            Err(AppError::JWT(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = JwtClaims {
            user_id: "user-1".to_string(),
            email: None,
            exp: (Utc::now() - Duration::hours(1)).timestamp() as usize,
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(validate_jwt(&token, "test-secret").is_err());
    }
}
