//! In-process backend for development runs without Postgres, and for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{error::Res, key::hash_token};
use dashmap::DashMap;
use uuid::Uuid;

use crate::{
    dtos::{
        key::{KeyCreateRequest, KeyUpdateRequest},
        usage::{UsageCreateRequest, UsageFilter},
    },
    models::{key::ApiKey, usage::UsageEvent},
    store::{CredentialStore, UsageLedger},
};

#[derive(Default)]
pub struct MemoryStore {
    keys: DashMap<Uuid, ApiKey>,
    by_hash: DashMap<String, Uuid>,
    events: DashMap<Uuid, UsageEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a key regardless of owner.
    pub fn key(&self, key_id: &Uuid) -> Option<ApiKey> {
        self.keys.get(key_id).map(|entry| entry.value().clone())
    }

    /// Replaces a stored key wholesale, keeping the token index in sync.
    pub fn put(&self, key: ApiKey) {
        self.by_hash.insert(key.token_hash.clone(), key.id);
        self.keys.insert(key.id, key);
    }

    fn owned(&self, key_id: &Uuid, user_id: &str) -> bool {
        self.keys
            .get(key_id)
            .is_some_and(|entry| entry.user_id == user_id)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_by_token(&self, token: &str) -> Res<Option<ApiKey>> {
        let id = self
            .by_hash
            .get(&hash_token(token))
            .map(|entry| *entry.value());
        Ok(id.and_then(|id| self.key(&id)))
    }

    async fn consume_request(
        &self,
        key_id: &Uuid,
        minute: i64,
        month: i64,
        used_at: DateTime<Utc>,
    ) -> Res<Option<ApiKey>> {
        // check and write under one shard write lock
        let Some(mut entry) = self.keys.get_mut(key_id) else {
            return Ok(None);
        };
        let mut usage = entry.usage.rolled_over(minute, month);
        if !entry.is_active || !entry.limits.has_room(&usage) {
            return Ok(None);
        }
        usage.requests_this_minute += 1;
        usage.requests_this_month += 1;
        entry.usage = usage;
        entry.last_used_at = Some(used_at);
        Ok(Some(entry.value().clone()))
    }

    async fn add_tokens(&self, key_id: &Uuid, tokens: i64) -> Res<()> {
        if let Some(mut entry) = self.keys.get_mut(key_id) {
            entry.usage.tokens_this_month += tokens;
        }
        Ok(())
    }

    async fn insert(&self, data: KeyCreateRequest) -> Res<ApiKey> {
        let key = data.into_key(Uuid::new_v4(), Utc::now());
        self.put(key.clone());
        Ok(key)
    }

    async fn get_key(&self, key_id: &Uuid, user_id: &str) -> Res<Option<ApiKey>> {
        Ok(self.key(key_id).filter(|key| key.user_id == user_id))
    }

    async fn list_by_user(&self, user_id: &str) -> Res<Vec<ApiKey>> {
        let mut keys: Vec<ApiKey> = self
            .keys
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn update(
        &self,
        key_id: &Uuid,
        user_id: &str,
        data: KeyUpdateRequest,
    ) -> Res<Option<ApiKey>> {
        match self.keys.get_mut(key_id) {
            Some(mut entry) if entry.user_id == user_id => {
                data.apply(entry.value_mut(), Utc::now());
                Ok(Some(entry.value().clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_active(
        &self,
        key_id: &Uuid,
        user_id: &str,
        is_active: bool,
    ) -> Res<Option<ApiKey>> {
        match self.keys.get_mut(key_id) {
            Some(mut entry) if entry.user_id == user_id => {
                entry.is_active = is_active;
                entry.updated_at = Utc::now();
                Ok(Some(entry.value().clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, key_id: &Uuid, user_id: &str) -> Res<bool> {
        if !self.owned(key_id, user_id) {
            return Ok(false);
        }
        match self.keys.remove(key_id) {
            Some((_, key)) => {
                self.by_hash.remove(&key.token_hash);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl UsageLedger for MemoryStore {
    async fn append(&self, usage: UsageCreateRequest) -> Res<()> {
        let event = usage.into_event(Uuid::new_v4(), Utc::now());
        self.events.insert(event.id, event);
        Ok(())
    }

    async fn list(&self, filter: UsageFilter) -> Res<Vec<UsageEvent>> {
        let mut events: Vec<UsageEvent> = self
            .events
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            events.truncate(limit.max(0) as usize);
        }
        Ok(events)
    }
}
