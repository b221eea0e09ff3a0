//! 内部账本数据访问 Repository
//!
//! 余额行是竞争最激烈的资源，所有变更都是存储层的原子增减表达式，
//! 不做应用内存中的读改写。每笔余额变更与其业务事件的交易记录在
//! 同一个存储事务里一起提交。

use std::{fmt, str::FromStr};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{domain::asset::AssetKind, error::Error};

// ============ 领域模型 ============

/// 交易类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Deposit,
    Stake,
    Unstake,
    Reward,
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxType::Deposit => "deposit",
            TxType::Stake => "stake",
            TxType::Unstake => "unstake",
            TxType::Reward => "reward",
        };
        f.write_str(s)
    }
}

impl FromStr for TxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TxType::Deposit),
            "stake" => Ok(TxType::Stake),
            "unstake" => Ok(TxType::Unstake),
            "reward" => Ok(TxType::Reward),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// 交易状态，创建后只允许 pending → completed/failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// 追加式交易记录
#[derive(Debug, Clone, Serialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tx_type: TxType,
    pub asset: AssetKind,
    pub amount: Decimal,
    pub status: TxStatus,
    pub dedup_key: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// 一次存款入账的完整描述
#[derive(Debug, Clone)]
pub struct DepositCredit {
    pub allocation_id: Uuid,
    pub user_id: Uuid,
    pub asset: AssetKind,
    /// 入账金额（已按记账单位折算）
    pub amount: Decimal,
    /// 从观测到的链上累计余额派生的去重键
    pub dedup_key: String,
    /// 本次观测到的链上累计余额，入账同时推进分配记录的观测值
    pub observed_balance: Decimal,
    pub metadata: serde_json::Value,
}

// ============ Repository Trait ============

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// 当前余额，无记录视为零
    async fn get_balance(&self, user_id: Uuid, asset: AssetKind) -> Result<Decimal>;

    /// 用户交易历史，新的在前
    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransaction>>;

    /// 原子入账：写交易记录（受 dedup_key 唯一约束保护）、增加余额、
    /// 推进分配的观测余额，三者同事务提交
    ///
    /// 去重键已存在时返回 `Error::DuplicateEvent`，调用方静默跳过
    async fn apply_deposit(&self, credit: DepositCredit)
        -> Result<LedgerTransaction, Error>;
}

// ============ PostgreSQL 实现 ============

pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    tx_type: String,
    asset: String,
    amount: Decimal,
    status: String,
    dedup_key: String,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    pub(crate) fn into_transaction(self) -> Result<LedgerTransaction> {
        Ok(LedgerTransaction {
            id: self.id,
            user_id: self.user_id,
            tx_type: self.tx_type.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            asset: self.asset.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            amount: self.amount,
            status: self.status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            dedup_key: self.dedup_key,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

pub(crate) const TRANSACTION_COLUMNS: &str =
    "id, user_id, tx_type, asset, amount, status, dedup_key, metadata, created_at";

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn get_balance(&self, user_id: Uuid, asset: AssetKind) -> Result<Decimal> {
        let amount: Option<Decimal> =
            sqlx::query_scalar("SELECT amount FROM balances WHERE user_id = $1 AND asset = $2")
                .bind(user_id)
                .bind(asset.symbol())
                .fetch_optional(&self.pool)
                .await?;

        Ok(amount.unwrap_or(Decimal::ZERO))
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"SELECT {} FROM transactions
               WHERE user_id = $1
               ORDER BY created_at DESC
               LIMIT $2 OFFSET $3"#,
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    async fn apply_deposit(
        &self,
        credit: DepositCredit,
    ) -> Result<LedgerTransaction, Error> {
        let mut tx = self.pool.begin().await?;

        // 去重约束在此生效：同一 dedup_key 第二次插入不产生任何行，
        // 事务随即回滚，余额与观测值都不会动
        let inserted = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions
                (id, user_id, tx_type, asset, amount, status, dedup_key, metadata)
            VALUES ($1, $2, 'deposit', $3, $4, 'completed', $5, $6)
            ON CONFLICT (dedup_key) DO NOTHING
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(credit.user_id)
        .bind(credit.asset.symbol())
        .bind(credit.amount)
        .bind(&credit.dedup_key)
        .bind(&credit.metadata)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = inserted else {
            tx.rollback().await?;
            return Err(Error::DuplicateEvent {
                dedup_key: credit.dedup_key,
            });
        };

        sqlx::query(
            r#"
            INSERT INTO balances (user_id, asset, amount, updated_at)
            VALUES ($1, $2, $3, CURRENT_TIMESTAMP)
            ON CONFLICT (user_id, asset)
            DO UPDATE SET amount = balances.amount + EXCLUDED.amount,
                          updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(credit.user_id)
        .bind(credit.asset.symbol())
        .bind(credit.amount)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE allocations
            SET last_observed_balance = $1, last_checked_at = CURRENT_TIMESTAMP
            WHERE id = $2
            "#,
        )
        .bind(credit.observed_balance)
        .bind(credit.allocation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        row.into_transaction().map_err(Error::Other)
    }
}
