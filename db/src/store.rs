use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{error::Res, key::hash_token};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    dtos::{
        key::{KeyCreateRequest, KeyUpdateRequest},
        usage::{UsageCreateRequest, UsageFilter},
    },
    models::{key::ApiKey, usage::UsageEvent},
};

/// Holds issued API keys and their usage counters.
///
/// Management methods take the owner's `user_id` and behave as if the key
/// does not exist when it belongs to someone else.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_by_token(&self, token: &str) -> Res<Option<ApiKey>>;

    /// Atomic increment-with-ceiling. Rolls the counters over to the
    /// `minute`/`month` buckets, and if the key is active and both request
    /// counters are below their limits, counts one request and stamps
    /// `last_used_at`. Returns the updated key, or `None` without writing
    /// anything.
    async fn consume_request(
        &self,
        key_id: &Uuid,
        minute: i64,
        month: i64,
        used_at: DateTime<Utc>,
    ) -> Res<Option<ApiKey>>;

    /// Atomically adds to `tokens_this_month`.
    async fn add_tokens(&self, key_id: &Uuid, tokens: i64) -> Res<()>;

    async fn insert(&self, data: KeyCreateRequest) -> Res<ApiKey>;
    async fn get_key(&self, key_id: &Uuid, user_id: &str) -> Res<Option<ApiKey>>;
    async fn list_by_user(&self, user_id: &str) -> Res<Vec<ApiKey>>;
    async fn update(
        &self,
        key_id: &Uuid,
        user_id: &str,
        data: KeyUpdateRequest,
    ) -> Res<Option<ApiKey>>;
    async fn set_active(&self, key_id: &Uuid, user_id: &str, is_active: bool)
    -> Res<Option<ApiKey>>;
    async fn delete(&self, key_id: &Uuid, user_id: &str) -> Res<bool>;
}

/// Append-only record of per-request consumption.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn append(&self, usage: UsageCreateRequest) -> Res<()>;
    /// Matching events, newest first.
    async fn list(&self, filter: UsageFilter) -> Res<Vec<UsageEvent>>;
}

/// Postgres-backed implementation of both collaborator ports.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn get_by_token(&self, token: &str) -> Res<Option<ApiKey>> {
        crate::key::get_key_by_token_hash(&*self.pool, &hash_token(token)).await
    }

    async fn consume_request(
        &self,
        key_id: &Uuid,
        minute: i64,
        month: i64,
        used_at: DateTime<Utc>,
    ) -> Res<Option<ApiKey>> {
        crate::key::consume_request(&*self.pool, key_id, minute, month, used_at).await
    }

    async fn add_tokens(&self, key_id: &Uuid, tokens: i64) -> Res<()> {
        crate::key::add_tokens(&*self.pool, key_id, tokens).await
    }

    async fn insert(&self, data: KeyCreateRequest) -> Res<ApiKey> {
        crate::key::insert_key(&*self.pool, data).await
    }

    async fn get_key(&self, key_id: &Uuid, user_id: &str) -> Res<Option<ApiKey>> {
        crate::key::get_key_for_user(&*self.pool, key_id, user_id).await
    }

    async fn list_by_user(&self, user_id: &str) -> Res<Vec<ApiKey>> {
        crate::key::get_keys_by_user_id(&*self.pool, user_id).await
    }

    async fn update(
        &self,
        key_id: &Uuid,
        user_id: &str,
        data: KeyUpdateRequest,
    ) -> Res<Option<ApiKey>> {
        crate::key::update_key(&*self.pool, key_id, user_id, data).await
    }

    async fn set_active(
        &self,
        key_id: &Uuid,
        user_id: &str,
        is_active: bool,
    ) -> Res<Option<ApiKey>> {
        crate::key::update_key_status(&*self.pool, key_id, user_id, is_active).await
    }

    async fn delete(&self, key_id: &Uuid, user_id: &str) -> Res<bool> {
        crate::key::delete_key(&*self.pool, key_id, user_id).await
    }
}

#[async_trait]
impl UsageLedger for PgStore {
    async fn append(&self, usage: UsageCreateRequest) -> Res<()> {
        crate::usage::insert_usage(&*self.pool, usage).await
    }

    async fn list(&self, filter: UsageFilter) -> Res<Vec<UsageEvent>> {
        crate::usage::get_report(&*self.pool, filter).await
    }
}
