use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    dtos::key::{KeyCreateRequest, KeyUpdateRequest},
    models::key::ApiKey,
};

pub async fn get_key_by_token_hash<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    token_hash: &str,
) -> Res<Option<ApiKey>> {
    sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE token_hash = $1")
        .bind(token_hash)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_key_for_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    key_id: &Uuid,
    user_id: &str,
) -> Res<Option<ApiKey>> {
    sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = $1 AND user_id = $2")
        .bind(key_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_keys_by_user_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: &str,
) -> Res<Vec<ApiKey>> {
    sqlx::query_as::<_, ApiKey>(
        "SELECT * FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

pub async fn insert_key<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: KeyCreateRequest,
) -> Res<ApiKey> {
    sqlx::query_as::<_, ApiKey>(
        r#"
        INSERT INTO api_keys (
            id, user_id, name, token_hash, token_prefix, is_active, permissions,
            requests_per_minute, requests_per_month, tokens_per_month
        )
        VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(data.user_id)
    .bind(data.name)
    .bind(data.token_hash)
    .bind(data.token_prefix)
    .bind(data.permissions)
    .bind(data.limits.requests_per_minute)
    .bind(data.limits.requests_per_month)
    .bind(data.limits.tokens_per_month)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn update_key<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    key_id: &Uuid,
    user_id: &str,
    data: KeyUpdateRequest,
) -> Res<Option<ApiKey>> {
    let limits = data.limits;
    sqlx::query_as::<_, ApiKey>(
        r#"
        UPDATE api_keys SET
            name = COALESCE($3, name),
            permissions = COALESCE($4, permissions),
            requests_per_minute = COALESCE($5, requests_per_minute),
            requests_per_month = COALESCE($6, requests_per_month),
            tokens_per_month = COALESCE($7, tokens_per_month),
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(key_id)
    .bind(user_id)
    .bind(data.name)
    .bind(data.permissions)
    .bind(limits.map(|l| l.requests_per_minute))
    .bind(limits.map(|l| l.requests_per_month))
    .bind(limits.map(|l| l.tokens_per_month))
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn update_key_status<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    key_id: &Uuid,
    user_id: &str,
    is_active: bool,
) -> Res<Option<ApiKey>> {
    sqlx::query_as::<_, ApiKey>(
        r#"
        UPDATE api_keys SET is_active = $3, updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(key_id)
    .bind(user_id)
    .bind(is_active)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn delete_key<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    key_id: &Uuid,
    user_id: &str,
) -> Res<bool> {
    let result = sqlx::query("DELETE FROM api_keys WHERE id = $1 AND user_id = $2")
        .bind(key_id)
        .bind(user_id)
        .execute(executor)
        .await
        .map_err(AppError::from)?;

    Ok(result.rows_affected() == 1)
}

/// Rolls the windows over, checks both request ceilings and counts one
/// request in a single statement. The row lock serialises concurrent
/// admissions of one key. Returns `None` when the key is inactive, gone or
/// out of request quota.
pub async fn consume_request<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    key_id: &Uuid,
    minute: i64,
    month: i64,
    used_at: DateTime<Utc>,
) -> Res<Option<ApiKey>> {
    sqlx::query_as::<_, ApiKey>(
        r#"
        UPDATE api_keys SET
            requests_this_minute = CASE WHEN last_reset_minute = $2
                THEN requests_this_minute + 1 ELSE 1 END,
            requests_this_month = CASE WHEN last_reset_month = $3
                THEN requests_this_month + 1 ELSE 1 END,
            tokens_this_month = CASE WHEN last_reset_month = $3
                THEN tokens_this_month ELSE 0 END,
            last_reset_minute = $2,
            last_reset_month = $3,
            last_used_at = $4
        WHERE id = $1
            AND is_active
            AND (CASE WHEN last_reset_minute = $2
                THEN requests_this_minute ELSE 0 END) < requests_per_minute
            AND (CASE WHEN last_reset_month = $3
                THEN requests_this_month ELSE 0 END) < requests_per_month
        RETURNING *
        "#,
    )
    .bind(key_id)
    .bind(minute)
    .bind(month)
    .bind(used_at)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn add_tokens<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    key_id: &Uuid,
    tokens: i64,
) -> Res<()> {
    sqlx::query("UPDATE api_keys SET tokens_this_month = tokens_this_month + $2 WHERE id = $1")
        .bind(key_id)
        .bind(tokens)
        .execute(executor)
        .await
        .map_err(AppError::from)?;

    Ok(())
}
