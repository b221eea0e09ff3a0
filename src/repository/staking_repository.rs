//! 质押仓位数据访问 Repository
//!
//! 仓位状态机 active → completed，终态不可逆。开仓先扣账本余额，
//! 关仓的结算恰好发生一次：status 的条件更新是并发关仓的唯一闸门，
//! 失败方拿到 AlreadyClosed 而不是重复入账。

use std::{fmt, str::FromStr};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    domain::{accrual, asset::AssetKind},
    error::Error,
};

// ============ 领域模型 ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Active,
    Completed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionStatus::Active => "active",
            PositionStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PositionStatus::Active),
            "completed" => Ok(PositionStatus::Completed),
            other => Err(format!("unknown position status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StakingPosition {
    pub id: Uuid,
    pub user_id: Uuid,
    pub asset: AssetKind,
    pub principal: Decimal,
    /// 每期收益率（小数）
    pub rate_per_period: Decimal,
    pub period_secs: i64,
    pub started_at: DateTime<Utc>,
    /// 计息基准时刻，只按整周期推进
    pub last_reward_at: DateTime<Utc>,
    pub accumulated_rewards: Decimal,
    pub status: PositionStatus,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct OpenStake {
    pub user_id: Uuid,
    pub asset: AssetKind,
    pub principal: Decimal,
    pub rate_per_period: Decimal,
    pub period_secs: i64,
}

/// 关仓结算结果
#[derive(Debug, Clone, Serialize)]
pub struct StakeSettlement {
    pub position_id: Uuid,
    pub user_id: Uuid,
    pub asset: AssetKind,
    pub principal: Decimal,
    pub rewards: Decimal,
    pub ends_at: DateTime<Utc>,
}

// ============ Repository Trait ============

#[async_trait]
pub trait StakingRepository: Send + Sync {
    /// 开仓：扣除本金（余额不足则整体失败，无任何副作用）、写 stake
    /// 交易记录、创建仓位，同事务提交
    async fn open(&self, params: OpenStake, now: DateTime<Utc>)
        -> Result<StakingPosition, Error>;

    /// 按整周期计息；零周期经过时是无副作用的幂等调用
    async fn accrue(&self, position_id: Uuid, now: DateTime<Utc>)
        -> Result<StakingPosition, Error>;

    /// 关仓：最终计息、本金+收益入账、写 unstake/reward 交易记录、
    /// 状态置为 completed，同事务恰好发生一次
    async fn close(&self, position_id: Uuid, now: DateTime<Utc>)
        -> Result<StakeSettlement, Error>;

    async fn find(&self, position_id: Uuid) -> Result<Option<StakingPosition>>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<StakingPosition>>;

    /// 活跃仓位 ID 列表，供后台计息任务遍历
    async fn list_active(&self) -> Result<Vec<Uuid>>;
}

// ============ PostgreSQL 实现 ============

pub struct PgStakingRepository {
    pool: PgPool,
}

impl PgStakingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    id: Uuid,
    user_id: Uuid,
    asset: String,
    principal: Decimal,
    rate_per_period: Decimal,
    period_secs: i64,
    started_at: DateTime<Utc>,
    last_reward_at: DateTime<Utc>,
    accumulated_rewards: Decimal,
    status: String,
    ends_at: Option<DateTime<Utc>>,
}

impl PositionRow {
    fn into_position(self) -> Result<StakingPosition> {
        Ok(StakingPosition {
            id: self.id,
            user_id: self.user_id,
            asset: self.asset.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            principal: self.principal,
            rate_per_period: self.rate_per_period,
            period_secs: self.period_secs,
            started_at: self.started_at,
            last_reward_at: self.last_reward_at,
            accumulated_rewards: self.accumulated_rewards,
            status: self
                .status
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            ends_at: self.ends_at,
        })
    }
}

const POSITION_COLUMNS: &str = "id, user_id, asset, principal, rate_per_period, period_secs, \
     started_at, last_reward_at, accumulated_rewards, status, ends_at";

#[async_trait]
impl StakingRepository for PgStakingRepository {
    async fn open(
        &self,
        params: OpenStake,
        now: DateTime<Utc>,
    ) -> Result<StakingPosition, Error> {
        let mut tx = self.pool.begin().await?;

        // 条件扣减：余额不足时零行命中，余额永不为负
        let debited = sqlx::query(
            r#"
            UPDATE balances
            SET amount = amount - $3, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = $1 AND asset = $2 AND amount >= $3
            "#,
        )
        .bind(params.user_id)
        .bind(params.asset.symbol())
        .bind(params.principal)
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() == 0 {
            let available: Option<Decimal> =
                sqlx::query_scalar("SELECT amount FROM balances WHERE user_id = $1 AND asset = $2")
                    .bind(params.user_id)
                    .bind(params.asset.symbol())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(Error::InsufficientFunds {
                user_id: params.user_id,
                asset: params.asset,
                available: available.unwrap_or(Decimal::ZERO),
                requested: params.principal,
            });
        }

        let position_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, user_id, tx_type, asset, amount, status, dedup_key)
            VALUES ($1, $2, 'stake', $3, $4, 'completed', $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(params.user_id)
        .bind(params.asset.symbol())
        .bind(params.principal)
        .bind(format!("stake:{}", position_id))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            INSERT INTO staking_positions
                (id, user_id, asset, principal, rate_per_period, period_secs,
                 started_at, last_reward_at, accumulated_rewards, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, 0, 'active')
            RETURNING {}
            "#,
            POSITION_COLUMNS
        ))
        .bind(position_id)
        .bind(params.user_id)
        .bind(params.asset.symbol())
        .bind(params.principal)
        .bind(params.rate_per_period)
        .bind(params.period_secs)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        row.into_position().map_err(Error::Other)
    }

    async fn accrue(
        &self,
        position_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StakingPosition, Error> {
        let mut tx = self.pool.begin().await?;

        // 行锁串行化同一仓位上的并发计息
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {} FROM staking_positions WHERE id = $1 FOR UPDATE",
            POSITION_COLUMNS
        ))
        .bind(position_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("staking position {}", position_id)));
        };

        let position = row.into_position().map_err(Error::Other)?;

        if position.status != PositionStatus::Active {
            tx.rollback().await?;
            return Ok(position);
        }

        let result = accrual::accrue(
            position.principal,
            position.rate_per_period,
            position.period_secs,
            position.last_reward_at,
            now,
        );

        if result.periods == 0 {
            tx.rollback().await?;
            return Ok(position);
        }

        let updated = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            UPDATE staking_positions
            SET accumulated_rewards = accumulated_rewards + $1, last_reward_at = $2
            WHERE id = $3
            RETURNING {}
            "#,
            POSITION_COLUMNS
        ))
        .bind(result.reward)
        .bind(result.advanced_to)
        .bind(position_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        updated.into_position().map_err(Error::Other)
    }

    async fn close(
        &self,
        position_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StakeSettlement, Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {} FROM staking_positions WHERE id = $1 FOR UPDATE",
            POSITION_COLUMNS
        ))
        .bind(position_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("staking position {}", position_id)));
        };

        let position = row.into_position().map_err(Error::Other)?;

        if position.status != PositionStatus::Active {
            tx.rollback().await?;
            return Err(Error::AlreadyClosed(position_id));
        }

        // 最终计息
        let final_accrual = accrual::accrue(
            position.principal,
            position.rate_per_period,
            position.period_secs,
            position.last_reward_at,
            now,
        );
        let total_rewards = position.accumulated_rewards + final_accrual.reward;

        // 状态条件更新是并发关仓的闸门
        let flipped = sqlx::query(
            r#"
            UPDATE staking_positions
            SET status = 'completed', ends_at = $1,
                accumulated_rewards = $2, last_reward_at = $3
            WHERE id = $4 AND status = 'active'
            "#,
        )
        .bind(now)
        .bind(total_rewards)
        .bind(final_accrual.advanced_to)
        .bind(position_id)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::AlreadyClosed(position_id));
        }

        sqlx::query(
            r#"
            INSERT INTO balances (user_id, asset, amount, updated_at)
            VALUES ($1, $2, $3, CURRENT_TIMESTAMP)
            ON CONFLICT (user_id, asset)
            DO UPDATE SET amount = balances.amount + EXCLUDED.amount,
                          updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(position.user_id)
        .bind(position.asset.symbol())
        .bind(position.principal + total_rewards)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, user_id, tx_type, asset, amount, status, dedup_key)
            VALUES ($1, $2, 'unstake', $3, $4, 'completed', $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(position.user_id)
        .bind(position.asset.symbol())
        .bind(position.principal)
        .bind(format!("unstake:{}", position_id))
        .execute(&mut *tx)
        .await?;

        if total_rewards > Decimal::ZERO {
            sqlx::query(
                r#"
                INSERT INTO transactions
                    (id, user_id, tx_type, asset, amount, status, dedup_key)
                VALUES ($1, $2, 'reward', $3, $4, 'completed', $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(position.user_id)
            .bind(position.asset.symbol())
            .bind(total_rewards)
            .bind(format!("reward:{}", position_id))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(StakeSettlement {
            position_id,
            user_id: position.user_id,
            asset: position.asset,
            principal: position.principal,
            rewards: total_rewards,
            ends_at: now,
        })
    }

    async fn find(&self, position_id: Uuid) -> Result<Option<StakingPosition>> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {} FROM staking_positions WHERE id = $1",
            POSITION_COLUMNS
        ))
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PositionRow::into_position).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<StakingPosition>> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {} FROM staking_positions WHERE user_id = $1 ORDER BY started_at DESC",
            POSITION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PositionRow::into_position).collect()
    }

    async fn list_active(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM staking_positions WHERE status = 'active'")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}
