//! 存款对账调度器
//!
//! 固定间隔遍历全部已分配地址，向余额数据源询问链上累计余额，
//! 正增量作为存款入账。每个地址是独立的工作单元：数据源失败或
//! 落库失败只影响该地址本周期的处理，下周期整体重试。入账的
//! 去重与原子性由账本仓储的同事务约束保证，调度器重启或周期
//! 重叠都不会产生重复入账。

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::{stream, StreamExt};
use rust_decimal::Decimal;
use tokio::{sync::watch, time::interval};
use uuid::Uuid;

use crate::{
    config::{LedgerDenomination, ReconcilerConfig},
    error::Error,
    repository::{
        AllocationRepository, DepositCredit, LedgerRepository, LedgerTransaction,
        WalletAllocation,
    },
    service::{
        balance_provider::BalanceProvider,
        notification::{DepositEvent, NotificationSink},
    },
};

/// 单周期的处理统计
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    /// 完成观测的地址数
    pub checked: usize,
    /// 本周期入账的存款笔数
    pub credited: usize,
    /// 去重键命中而跳过的观测数
    pub duplicates: usize,
    /// 失败待下周期重试的地址数
    pub failed: usize,
}

enum Outcome {
    NoChange,
    Credited(LedgerTransaction),
    Duplicate,
}

/// 从观测到的链上累计余额派生存款去重键
///
/// normalize 去掉尾随零，同一余额的不同标度表示映射到同一个键
fn deposit_dedup_key(allocation_id: Uuid, observed: Decimal) -> String {
    format!("deposit:{}:{}", allocation_id, observed.normalize())
}

pub struct Reconciler {
    allocations: Arc<dyn AllocationRepository>,
    ledger: Arc<dyn LedgerRepository>,
    provider: Arc<BalanceProvider>,
    notifier: Arc<dyn NotificationSink>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        allocations: Arc<dyn AllocationRepository>,
        ledger: Arc<dyn LedgerRepository>,
        provider: Arc<BalanceProvider>,
        notifier: Arc<dyn NotificationSink>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            allocations,
            ledger,
            provider,
            notifier,
            config,
        }
    }

    /// 对账主循环
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));

        tracing::info!(
            interval_secs = self.config.interval_secs,
            concurrency = self.config.concurrency,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(stats) => {
                            if stats.credited > 0 || stats.failed > 0 {
                                tracing::info!(
                                    checked = stats.checked,
                                    credited = stats.credited,
                                    duplicates = stats.duplicates,
                                    failed = stats.failed,
                                    "Reconciliation cycle completed"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Reconciliation cycle failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Reconciler stopping");
                    break;
                }
            }
        }
    }

    /// 执行一个对账周期，按配置上限并发处理各地址
    pub async fn run_cycle(&self) -> anyhow::Result<CycleStats> {
        let allocations = self.allocations.list_all().await?;

        let results = stream::iter(allocations)
            .map(|alloc| async move {
                let outcome = self.process_allocation(&alloc).await;
                (alloc, outcome)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut stats = CycleStats::default();
        for (alloc, outcome) in results {
            match outcome {
                Ok(Outcome::NoChange) => stats.checked += 1,
                Ok(Outcome::Credited(tx)) => {
                    stats.checked += 1;
                    stats.credited += 1;
                    tracing::info!(
                        transaction_id = %tx.id,
                        user_id = %tx.user_id,
                        asset = %tx.asset,
                        amount = %tx.amount,
                        address = %alloc.address,
                        "Deposit credited"
                    );
                }
                Ok(Outcome::Duplicate) => {
                    stats.checked += 1;
                    stats.duplicates += 1;
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(
                        allocation_id = %alloc.id,
                        asset = %alloc.asset,
                        error = %e,
                        "Reconciliation failed for allocation, retrying next cycle"
                    );
                }
            }
        }

        Ok(stats)
    }

    /// 单个地址的观测与入账
    async fn process_allocation(&self, alloc: &WalletAllocation) -> Result<Outcome, Error> {
        let current = self.provider.get_balance(&alloc.address, alloc.asset).await?;

        // 负增量不是提现，出账不在本引擎范围内；零增量只推进检查时间
        let delta = current - alloc.last_observed_balance;
        if delta <= Decimal::ZERO {
            self.allocations.mark_checked(alloc.id, Utc::now()).await?;
            return Ok(Outcome::NoChange);
        }

        let (amount, price) = match self.config.denomination {
            LedgerDenomination::InKind => (delta, None),
            LedgerDenomination::Usd => {
                let price = self.provider.get_price_usd(alloc.asset).await?;
                (delta * price, Some(price))
            }
        };

        let dedup_key = deposit_dedup_key(alloc.id, current);
        let metadata = serde_json::json!({
            "address": alloc.address,
            "observed_balance": current,
            "delta": delta,
            "price_usd": price,
        });

        let applied = self
            .ledger
            .apply_deposit(DepositCredit {
                allocation_id: alloc.id,
                user_id: alloc.user_id,
                asset: alloc.asset,
                amount,
                dedup_key,
                observed_balance: current,
                metadata,
            })
            .await;

        match applied {
            Ok(tx) => {
                let event = DepositEvent {
                    transaction_id: tx.id,
                    user_id: tx.user_id,
                    asset: tx.asset,
                    amount: tx.amount,
                    address: alloc.address.clone(),
                };
                // 尽力而为：通知失败不回滚已提交的入账
                if let Err(e) = self.notifier.deposit_confirmed(&event).await {
                    tracing::warn!(
                        transaction_id = %tx.id,
                        error = %e,
                        "Deposit notification failed"
                    );
                }
                Ok(Outcome::Credited(tx))
            }
            Err(Error::DuplicateEvent { dedup_key }) => {
                // 重叠运行或重启后的重复观测
                tracing::debug!(
                    allocation_id = %alloc.id,
                    dedup_key = %dedup_key,
                    "Observation already processed, skipping"
                );
                self.allocations.mark_checked(alloc.id, Utc::now()).await?;
                Ok(Outcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_is_scale_insensitive() {
        let id = Uuid::new_v4();
        let a = deposit_dedup_key(id, Decimal::new(5000, 2)); // 50.00
        let b = deposit_dedup_key(id, Decimal::new(50, 0)); // 50
        assert_eq!(a, b);
    }

    #[test]
    fn dedup_key_distinguishes_allocations_and_balances() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let balance = Decimal::from(120);

        assert_ne!(
            deposit_dedup_key(id, balance),
            deposit_dedup_key(other, balance)
        );
        assert_ne!(
            deposit_dedup_key(id, balance),
            deposit_dedup_key(id, Decimal::from(50))
        );
    }
}
