//! 质押服务
//!
//! 开仓、关仓、持仓查询，外加一个后台计息循环。计息在读取与关仓
//! 前惰性触发，后台循环只是让长期无人读取的仓位也能按期推进。

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::{sync::watch, time::interval};
use uuid::Uuid;

use crate::{
    config::StakingConfig,
    domain::asset::AssetKind,
    error::{Error, Result},
    repository::{OpenStake, PositionStatus, StakeSettlement, StakingPosition, StakingRepository},
};

pub struct StakingService {
    staking: Arc<dyn StakingRepository>,
    config: StakingConfig,
}

impl StakingService {
    pub fn new(staking: Arc<dyn StakingRepository>, config: StakingConfig) -> Self {
        Self { staking, config }
    }

    /// 开仓：先扣本金，扣减失败则不产生任何仓位
    pub async fn open_stake(
        &self,
        user_id: Uuid,
        asset: AssetKind,
        amount: Decimal,
    ) -> Result<StakingPosition> {
        if amount <= Decimal::ZERO {
            return Err(Error::Configuration(format!(
                "stake principal must be positive, got {}",
                amount
            )));
        }

        let position = self
            .staking
            .open(
                OpenStake {
                    user_id,
                    asset,
                    principal: amount,
                    rate_per_period: self.config.rate_per_period,
                    period_secs: self.config.period_secs,
                },
                Utc::now(),
            )
            .await?;

        tracing::info!(
            position_id = %position.id,
            user_id = %user_id,
            asset = %asset,
            principal = %amount,
            "Staking position opened"
        );

        Ok(position)
    }

    /// 关仓：最终计息后把本金+收益一次性转回账本
    pub async fn close_stake(&self, position_id: Uuid) -> Result<StakeSettlement> {
        let settlement = self.staking.close(position_id, Utc::now()).await?;

        tracing::info!(
            position_id = %position_id,
            user_id = %settlement.user_id,
            principal = %settlement.principal,
            rewards = %settlement.rewards,
            "Staking position closed"
        );

        Ok(settlement)
    }

    /// 用户持仓，读取前对活跃仓位惰性计息
    pub async fn positions(&self, user_id: Uuid) -> Result<Vec<StakingPosition>> {
        let now = Utc::now();
        let mut positions = Vec::new();

        for position in self.staking.list_for_user(user_id).await? {
            if position.status == PositionStatus::Active {
                positions.push(self.staking.accrue(position.id, now).await?);
            } else {
                positions.push(position);
            }
        }

        Ok(positions)
    }

    /// 对所有活跃仓位计息一轮，单个仓位的失败不影响其余仓位
    pub async fn accrue_all(&self) -> Result<usize> {
        let now = Utc::now();
        let ids = self.staking.list_active().await?;
        let total = ids.len();

        for id in ids {
            if let Err(e) = self.staking.accrue(id, now).await {
                tracing::warn!(position_id = %id, error = %e, "Accrual failed for position");
            }
        }

        Ok(total)
    }

    /// 后台计息循环
    pub async fn run_accrual_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.accrual_interval_secs));

        tracing::info!(
            interval_secs = self.config.accrual_interval_secs,
            "Staking accrual loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.accrue_all().await {
                        Ok(count) if count > 0 => {
                            tracing::debug!(positions = count, "Accrual pass completed");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Accrual pass failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Staking accrual loop stopping");
                    break;
                }
            }
        }
    }
}
