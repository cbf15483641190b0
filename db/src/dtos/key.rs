use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::key::{ApiKey, KeyLimits, KeyUsage};

pub struct KeyCreateRequest {
    pub user_id: String,
    pub name: String,
    pub token_hash: String,
    pub token_prefix: String,
    pub permissions: Vec<String>,
    pub limits: KeyLimits,
}

impl KeyCreateRequest {
    /// Builds the record as it is first persisted: active, usage zeroed.
    pub fn into_key(self, id: Uuid, now: DateTime<Utc>) -> ApiKey {
        ApiKey {
            id,
            user_id: self.user_id,
            name: self.name,
            token_hash: self.token_hash,
            token_prefix: self.token_prefix,
            is_active: true,
            permissions: self.permissions,
            limits: self.limits,
            usage: KeyUsage::default(),
            created_at: now,
            updated_at: now,
            last_used_at: None,
        }
    }
}

#[derive(Default)]
pub struct KeyUpdateRequest {
    pub name: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub limits: Option<KeyLimits>,
}

impl KeyUpdateRequest {
    pub fn apply(self, key: &mut ApiKey, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            key.name = name;
        }
        if let Some(permissions) = self.permissions {
            key.permissions = permissions;
        }
        if let Some(limits) = self.limits {
            key.limits = limits;
        }
        key.updated_at = now;
    }
}
