use actix_web::{dev::ServiceRequest, http::header};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, Res};

/// Literal prefix every issued API key starts with.
pub const KEY_PREFIX: &str = "grok_";

/// Number of leading token characters kept in clear for display.
pub const DISPLAY_PREFIX_LEN: usize = 12;

/// Freshly minted token. `token` is shown to the owner once and never stored.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub hash: String,
    pub prefix: String,
}

impl IssuedToken {
    pub fn generate() -> Self {
        // two v4 UUIDs give 64 hex chars of randomness
        let token = format!(
            "{}{}{}",
            KEY_PREFIX,
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        Self::from_token(token)
    }

    pub fn from_token(token: String) -> Self {
        IssuedToken {
            hash: hash_token(&token),
            prefix: display_prefix(&token),
            token,
        }
    }
}

/// SHA-256 hex digest used as the lookup key in the credential store.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn display_prefix(token: &str) -> String {
    token.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// Reads the token from `Authorization: Bearer <token>`.
/// Returns `None` for a missing header, a non-Bearer scheme or an empty token.
pub fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

/// Rejects tokens that cannot have been issued by this service.
pub fn check_format(token: &str) -> Res<()> {
    if token.starts_with(KEY_PREFIX) {
        Ok(())
    } else {
        Err(AppError::InvalidApiKey("Invalid API key format".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn generated_token_has_prefix_and_length() {
        let issued = IssuedToken::generate();
        assert!(issued.token.starts_with(KEY_PREFIX));
        assert_eq!(issued.token.len(), KEY_PREFIX.len() + 64);
        assert!(issued.token[KEY_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
        assert_eq!(issued.prefix.len(), DISPLAY_PREFIX_LEN);
        assert_eq!(issued.hash, hash_token(&issued.token));
    }

    #[test]
    fn generated_tokens_differ() {
        assert_ne!(IssuedToken::generate().token, IssuedToken::generate().token);
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_token("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn bearer_token_extraction() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer grok_abc"))
            .to_srv_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("grok_abc"));

        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic grok_abc"))
            .to_srv_request();
        assert_eq!(bearer_token(&req), None);

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer "))
            .to_srv_request();
        assert_eq!(bearer_token(&req), None);

        let req = TestRequest::default().to_srv_request();
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn format_check_requires_prefix() {
        assert!(check_format("grok_123").is_ok());
        assert!(matches!(
            check_format("sk-123"),
            Err(AppError::InvalidApiKey(_))
        ));
    }
}
