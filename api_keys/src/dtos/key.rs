use db::models::key::{ApiKey, KeyLimits};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateKeyRequest {
    pub name: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub limits: Option<KeyLimits>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleKeyRequest {
    pub is_active: bool,
}

/// The only response that ever carries the plaintext token.
#[derive(Debug, Serialize)]
pub struct CreateKeyResponse {
    #[serde(flatten)]
    pub key: ApiKey,
    pub token: String,
}
