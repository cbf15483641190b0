use crate::{
    dtos::usage::{UsageCreateRequest, UsageFilter},
    models::usage::UsageEvent,
};
use common::error::{AppError, Res};
use sqlx::{Executor, Postgres, QueryBuilder};
use uuid::Uuid;

pub async fn get_report<'e, E>(executor: E, filter: UsageFilter) -> Res<Vec<UsageEvent>>
where
    E: Executor<'e, Database = Postgres>,
{
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM api_usage");
    let mut conditions_added = false;

    // Helper to add WHERE or AND
    let mut add_condition_separator = |qb: &mut QueryBuilder<Postgres>| {
        if !conditions_added {
            qb.push(" WHERE ");
            conditions_added = true;
        } else {
            qb.push(" AND ");
        }
    };

    if let Some(api_key_id) = filter.api_key_id {
        add_condition_separator(&mut qb);
        qb.push("api_key_id = ").push_bind(api_key_id);
    }

    if let Some(user_id) = filter.user_id {
        add_condition_separator(&mut qb);
        qb.push("user_id = ").push_bind(user_id);
    }

    if let Some(until) = filter.until {
        add_condition_separator(&mut qb);
        qb.push("timestamp < ").push_bind(until);
    }

    if let Some(since) = filter.since {
        add_condition_separator(&mut qb);
        qb.push("timestamp > ").push_bind(since);
    }

    qb.push(" ORDER BY timestamp DESC");

    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(limit);
    }

    qb.build_query_as::<UsageEvent>()
        .fetch_all(executor)
        .await
        .map_err(AppError::from)
}

pub async fn insert_usage<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    usage: UsageCreateRequest,
) -> Res<()> {
    sqlx::query(
        "INSERT INTO api_usage (id, api_key_id, user_id, endpoint, model, input_tokens, output_tokens, ip_address, user_agent)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(Uuid::new_v4())
    .bind(usage.api_key_id)
    .bind(&usage.user_id)
    .bind(&usage.endpoint)
    .bind(usage.model)
    .bind(usage.input_tokens)
    .bind(usage.output_tokens)
    .bind(usage.ip_address)
    .bind(usage.user_agent)
    .execute(executor)
    .await
    .map_err(AppError::from)?;

    Ok(())
}
