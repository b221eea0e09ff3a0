//! SQLx Postgres 连接池初始化与健康检查
//!
//! 用法：
//! let pool = init_pool(&config.database).await?;
//! health_check(&pool).await?;

use std::time::Duration;

use anyhow::Result;

use crate::config::DatabaseConfig;

pub type PgPool = sqlx::Pool<sqlx::Postgres>;

/// 初始化连接池
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool_opts = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        // 取用前验证连接有效性，避免使用已断开的连接
        .test_before_acquire(true);

    let pool = pool_opts.connect(&config.url).await.map_err(|e| {
        tracing::error!("Failed to connect to Postgres: {}", e);
        e
    })?;

    health_check(&pool).await?;
    Ok(pool)
}

/// 数据库健康检查
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// 建表（幂等）
///
/// 四张业务表加一张派生游标表；余额与分配表的唯一约束、交易表的
/// dedup_key 唯一约束是对账与分配正确性的存储层依据。
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS derivation_cursors (
            namespace   TEXT PRIMARY KEY,
            next_index  BIGINT NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS allocations (
            id                    UUID PRIMARY KEY,
            user_id               UUID NOT NULL,
            asset                 TEXT NOT NULL,
            address               TEXT NOT NULL UNIQUE,
            derivation_index      BIGINT NOT NULL,
            public_key            TEXT NOT NULL,
            encrypted_key         BYTEA NOT NULL,
            last_observed_balance NUMERIC(38, 18) NOT NULL DEFAULT 0,
            last_checked_at       TIMESTAMPTZ,
            created_at            TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (user_id, asset)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS balances (
            user_id    UUID NOT NULL,
            asset      TEXT NOT NULL,
            amount     NUMERIC(38, 18) NOT NULL DEFAULT 0 CHECK (amount >= 0),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (user_id, asset)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id         UUID PRIMARY KEY,
            user_id    UUID NOT NULL,
            tx_type    TEXT NOT NULL,
            asset      TEXT NOT NULL,
            amount     NUMERIC(38, 18) NOT NULL,
            status     TEXT NOT NULL,
            dedup_key  TEXT NOT NULL UNIQUE,
            metadata   JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS staking_positions (
            id                  UUID PRIMARY KEY,
            user_id             UUID NOT NULL,
            asset               TEXT NOT NULL,
            principal           NUMERIC(38, 18) NOT NULL,
            rate_per_period     NUMERIC(20, 10) NOT NULL,
            period_secs         BIGINT NOT NULL,
            started_at          TIMESTAMPTZ NOT NULL,
            last_reward_at      TIMESTAMPTZ NOT NULL,
            accumulated_rewards NUMERIC(38, 18) NOT NULL DEFAULT 0,
            status              TEXT NOT NULL,
            ends_at             TIMESTAMPTZ
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_transactions_user_created
            ON transactions (user_id, created_at DESC)
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_staking_positions_user
            ON staking_positions (user_id)
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database migrations applied");
    Ok(())
}
