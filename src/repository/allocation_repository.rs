//! 地址分配数据访问 Repository
//!
//! 派生索引游标是本模块唯一的并发敏感点：预留必须是存储层的原子
//! 读改写，预留后落库失败的索引被永久烧掉，绝不复用。

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::asset::{AssetKind, DerivationNamespace};

// ============ 领域模型 ============

/// 一条地址分配记录，(user_id, asset) 唯一，创建后除观测字段外不可变
#[derive(Debug, Clone, Serialize)]
pub struct WalletAllocation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub asset: AssetKind,
    pub address: String,
    pub derivation_index: i64,
    pub public_key: String,
    /// AES-256-GCM 加密后的私钥材料，明文永不落盘
    #[serde(skip_serializing)]
    pub encrypted_key: Vec<u8>,
    /// 上次观测到的链上累计余额
    pub last_observed_balance: Decimal,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAllocation {
    pub user_id: Uuid,
    pub asset: AssetKind,
    pub address: String,
    pub derivation_index: i64,
    pub public_key: String,
    pub encrypted_key: Vec<u8>,
}

// ============ Repository Trait ============

#[async_trait]
pub trait AllocationRepository: Send + Sync {
    /// 查询 (user, asset) 的既有分配
    async fn find(&self, user_id: Uuid, asset: AssetKind) -> Result<Option<WalletAllocation>>;

    /// 原子预留命名空间的下一个派生索引
    async fn reserve_index(&self, namespace: DerivationNamespace) -> Result<i64>;

    /// 持久化新分配
    ///
    /// (user, asset) 已存在时返回 None（并发分配的竞争失败方，调用方
    /// 应重新读取胜者的记录）
    async fn insert(&self, alloc: NewAllocation) -> Result<Option<WalletAllocation>>;

    /// 列出全部分配，供对账调度器遍历
    async fn list_all(&self) -> Result<Vec<WalletAllocation>>;

    /// 仅更新检查时间（本周期无余额变化）
    async fn mark_checked(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

// ============ PostgreSQL 实现 ============

pub struct PgAllocationRepository {
    pool: PgPool,
}

impl PgAllocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AllocationRow {
    id: Uuid,
    user_id: Uuid,
    asset: String,
    address: String,
    derivation_index: i64,
    public_key: String,
    encrypted_key: Vec<u8>,
    last_observed_balance: Decimal,
    last_checked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl AllocationRow {
    fn into_allocation(self) -> Result<WalletAllocation> {
        let asset = self
            .asset
            .parse::<AssetKind>()
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(WalletAllocation {
            id: self.id,
            user_id: self.user_id,
            asset,
            address: self.address,
            derivation_index: self.derivation_index,
            public_key: self.public_key,
            encrypted_key: self.encrypted_key,
            last_observed_balance: self.last_observed_balance,
            last_checked_at: self.last_checked_at,
            created_at: self.created_at,
        })
    }
}

const ALLOCATION_COLUMNS: &str = "id, user_id, asset, address, derivation_index, public_key, \
     encrypted_key, last_observed_balance, last_checked_at, created_at";

#[async_trait]
impl AllocationRepository for PgAllocationRepository {
    async fn find(&self, user_id: Uuid, asset: AssetKind) -> Result<Option<WalletAllocation>> {
        let row = sqlx::query_as::<_, AllocationRow>(&format!(
            "SELECT {} FROM allocations WHERE user_id = $1 AND asset = $2",
            ALLOCATION_COLUMNS
        ))
        .bind(user_id)
        .bind(asset.symbol())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AllocationRow::into_allocation).transpose()
    }

    async fn reserve_index(&self, namespace: DerivationNamespace) -> Result<i64> {
        // 单条语句内的原子 fetch-and-increment，多实例下同样安全
        let index: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO derivation_cursors (namespace, next_index)
            VALUES ($1, 1)
            ON CONFLICT (namespace)
            DO UPDATE SET next_index = derivation_cursors.next_index + 1
            RETURNING next_index - 1
            "#,
        )
        .bind(namespace.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(index)
    }

    async fn insert(&self, alloc: NewAllocation) -> Result<Option<WalletAllocation>> {
        let result = sqlx::query_as::<_, AllocationRow>(&format!(
            r#"
            INSERT INTO allocations
                (id, user_id, asset, address, derivation_index, public_key, encrypted_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            ALLOCATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(alloc.user_id)
        .bind(alloc.asset.symbol())
        .bind(&alloc.address)
        .bind(alloc.derivation_index)
        .bind(&alloc.public_key)
        .bind(&alloc.encrypted_key)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(Some(row.into_allocation()?)),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some("23505")
                    && db_err
                        .constraint()
                        .map(|c| c.contains("user_id"))
                        .unwrap_or(false) =>
            {
                // (user, asset) 并发竞争的失败方
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_all(&self) -> Result<Vec<WalletAllocation>> {
        let rows = sqlx::query_as::<_, AllocationRow>(&format!(
            "SELECT {} FROM allocations ORDER BY created_at",
            ALLOCATION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AllocationRow::into_allocation).collect()
    }

    async fn mark_checked(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE allocations SET last_checked_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
