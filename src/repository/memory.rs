//! 内存存储适配器
//!
//! 与 Postgres 适配器实现同一组存储端口。全部状态在一把互斥锁后面，
//! 每个操作持锁完成，与数据库事务同样满足线性化要求。用于测试与
//! 单机试运行。

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    domain::{
        accrual,
        asset::{AssetKind, DerivationNamespace},
    },
    error::Error,
    repository::{
        allocation_repository::{AllocationRepository, NewAllocation, WalletAllocation},
        ledger_repository::{
            DepositCredit, LedgerRepository, LedgerTransaction, TxStatus, TxType,
        },
        staking_repository::{
            OpenStake, PositionStatus, StakeSettlement, StakingPosition, StakingRepository,
        },
    },
};

#[derive(Default)]
struct MemoryState {
    cursors: HashMap<DerivationNamespace, i64>,
    allocations: HashMap<Uuid, WalletAllocation>,
    allocation_by_owner: HashMap<(Uuid, AssetKind), Uuid>,
    addresses: HashSet<String>,
    balances: HashMap<(Uuid, AssetKind), Decimal>,
    transactions: Vec<LedgerTransaction>,
    dedup_keys: HashSet<String>,
    positions: HashMap<Uuid, StakingPosition>,
}

impl MemoryState {
    fn credit(&mut self, user_id: Uuid, asset: AssetKind, amount: Decimal) {
        *self.balances.entry((user_id, asset)).or_insert(Decimal::ZERO) += amount;
    }

    fn push_transaction(
        &mut self,
        user_id: Uuid,
        tx_type: TxType,
        asset: AssetKind,
        amount: Decimal,
        dedup_key: String,
        metadata: Option<serde_json::Value>,
    ) -> LedgerTransaction {
        let tx = LedgerTransaction {
            id: Uuid::new_v4(),
            user_id,
            tx_type,
            asset,
            amount,
            status: TxStatus::Completed,
            dedup_key: dedup_key.clone(),
            metadata,
            created_at: Utc::now(),
        };
        self.dedup_keys.insert(dedup_key);
        self.transactions.push(tx.clone());
        tx
    }
}

/// 内存存储，同时实现分配、账本、质押三个端口
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AllocationRepository for MemoryStore {
    async fn find(&self, user_id: Uuid, asset: AssetKind) -> Result<Option<WalletAllocation>> {
        let state = self.state.lock().await;
        Ok(state
            .allocation_by_owner
            .get(&(user_id, asset))
            .and_then(|id| state.allocations.get(id))
            .cloned())
    }

    async fn reserve_index(&self, namespace: DerivationNamespace) -> Result<i64> {
        let mut state = self.state.lock().await;
        let cursor = state.cursors.entry(namespace).or_insert(0);
        let index = *cursor;
        *cursor += 1;
        Ok(index)
    }

    async fn insert(&self, alloc: NewAllocation) -> Result<Option<WalletAllocation>> {
        let mut state = self.state.lock().await;

        if state
            .allocation_by_owner
            .contains_key(&(alloc.user_id, alloc.asset))
        {
            return Ok(None);
        }
        if state.addresses.contains(&alloc.address) {
            anyhow::bail!("address collision: {}", alloc.address);
        }

        let allocation = WalletAllocation {
            id: Uuid::new_v4(),
            user_id: alloc.user_id,
            asset: alloc.asset,
            address: alloc.address.clone(),
            derivation_index: alloc.derivation_index,
            public_key: alloc.public_key,
            encrypted_key: alloc.encrypted_key,
            last_observed_balance: Decimal::ZERO,
            last_checked_at: None,
            created_at: Utc::now(),
        };

        state.addresses.insert(alloc.address);
        state
            .allocation_by_owner
            .insert((alloc.user_id, alloc.asset), allocation.id);
        state.allocations.insert(allocation.id, allocation.clone());

        Ok(Some(allocation))
    }

    async fn list_all(&self) -> Result<Vec<WalletAllocation>> {
        let state = self.state.lock().await;
        let mut all: Vec<_> = state.allocations.values().cloned().collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all)
    }

    async fn mark_checked(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(alloc) = state.allocations.get_mut(&id) {
            alloc.last_checked_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn get_balance(&self, user_id: Uuid, asset: AssetKind) -> Result<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .get(&(user_id, asset))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        let state = self.state.lock().await;
        let mut txs: Vec<_> = state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn apply_deposit(
        &self,
        credit: DepositCredit,
    ) -> Result<LedgerTransaction, Error> {
        let mut state = self.state.lock().await;

        if state.dedup_keys.contains(&credit.dedup_key) {
            return Err(Error::DuplicateEvent {
                dedup_key: credit.dedup_key,
            });
        }

        let tx = state.push_transaction(
            credit.user_id,
            TxType::Deposit,
            credit.asset,
            credit.amount,
            credit.dedup_key,
            Some(credit.metadata),
        );
        state.credit(credit.user_id, credit.asset, credit.amount);

        if let Some(alloc) = state.allocations.get_mut(&credit.allocation_id) {
            alloc.last_observed_balance = credit.observed_balance;
            alloc.last_checked_at = Some(Utc::now());
        }

        Ok(tx)
    }
}

#[async_trait]
impl StakingRepository for MemoryStore {
    async fn open(
        &self,
        params: OpenStake,
        now: DateTime<Utc>,
    ) -> Result<StakingPosition, Error> {
        let mut state = self.state.lock().await;

        let available = state
            .balances
            .get(&(params.user_id, params.asset))
            .copied()
            .unwrap_or(Decimal::ZERO);
        if available < params.principal {
            return Err(Error::InsufficientFunds {
                user_id: params.user_id,
                asset: params.asset,
                available,
                requested: params.principal,
            });
        }

        state.credit(params.user_id, params.asset, -params.principal);

        let position = StakingPosition {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            asset: params.asset,
            principal: params.principal,
            rate_per_period: params.rate_per_period,
            period_secs: params.period_secs,
            started_at: now,
            last_reward_at: now,
            accumulated_rewards: Decimal::ZERO,
            status: PositionStatus::Active,
            ends_at: None,
        };

        state.push_transaction(
            params.user_id,
            TxType::Stake,
            params.asset,
            params.principal,
            format!("stake:{}", position.id),
            None,
        );
        state.positions.insert(position.id, position.clone());

        Ok(position)
    }

    async fn accrue(
        &self,
        position_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StakingPosition, Error> {
        let mut state = self.state.lock().await;

        let Some(position) = state.positions.get_mut(&position_id) else {
            return Err(Error::NotFound(format!("staking position {}", position_id)));
        };

        if position.status != PositionStatus::Active {
            return Ok(position.clone());
        }

        let result = accrual::accrue(
            position.principal,
            position.rate_per_period,
            position.period_secs,
            position.last_reward_at,
            now,
        );
        if result.periods > 0 {
            position.accumulated_rewards += result.reward;
            position.last_reward_at = result.advanced_to;
        }

        Ok(position.clone())
    }

    async fn close(
        &self,
        position_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StakeSettlement, Error> {
        let mut state = self.state.lock().await;

        let Some(position) = state.positions.get_mut(&position_id) else {
            return Err(Error::NotFound(format!("staking position {}", position_id)));
        };

        if position.status != PositionStatus::Active {
            return Err(Error::AlreadyClosed(position_id));
        }

        let final_accrual = accrual::accrue(
            position.principal,
            position.rate_per_period,
            position.period_secs,
            position.last_reward_at,
            now,
        );
        let total_rewards = position.accumulated_rewards + final_accrual.reward;

        position.status = PositionStatus::Completed;
        position.ends_at = Some(now);
        position.accumulated_rewards = total_rewards;
        position.last_reward_at = final_accrual.advanced_to;

        let user_id = position.user_id;
        let asset = position.asset;
        let principal = position.principal;

        state.credit(user_id, asset, principal + total_rewards);
        state.push_transaction(
            user_id,
            TxType::Unstake,
            asset,
            principal,
            format!("unstake:{}", position_id),
            None,
        );
        if total_rewards > Decimal::ZERO {
            state.push_transaction(
                user_id,
                TxType::Reward,
                asset,
                total_rewards,
                format!("reward:{}", position_id),
                None,
            );
        }

        Ok(StakeSettlement {
            position_id,
            user_id,
            asset,
            principal,
            rewards: total_rewards,
            ends_at: now,
        })
    }

    async fn find(&self, position_id: Uuid) -> Result<Option<StakingPosition>> {
        let state = self.state.lock().await;
        Ok(state.positions.get(&position_id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<StakingPosition>> {
        let state = self.state.lock().await;
        let mut positions: Vec<_> = state
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        positions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(positions)
    }

    async fn list_active(&self) -> Result<Vec<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Active)
            .map(|p| p.id)
            .collect())
    }
}
