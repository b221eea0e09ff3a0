//! 应用状态装配
//!
//! 把存储适配器、数据源与各业务服务接成一棵共享的 Arc 树

use std::{sync::Arc, time::Duration};

use crate::{
    config::Config,
    infrastructure::{db::PgPool, encryption::SecretProvider},
    repository::{
        AllocationRepository, LedgerRepository, PgAllocationRepository, PgLedgerRepository,
        PgStakingRepository, StakingRepository,
    },
    service::{
        BalanceProvider, LedgerService, LogSink, NotificationSink, Reconciler, StakingService,
        WalletService, WebhookSink,
    },
};

/// 应用状态
/// 包含所有共享资源
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub wallet_service: Arc<WalletService>,
    pub ledger_service: Arc<LedgerService>,
    pub staking_service: Arc<StakingService>,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    /// 创建新的应用状态（Postgres 存储）
    pub async fn new(
        pool: PgPool,
        config: Arc<Config>,
        secrets: &dyn SecretProvider,
    ) -> anyhow::Result<Self> {
        let allocations: Arc<dyn AllocationRepository> =
            Arc::new(PgAllocationRepository::new(pool.clone()));
        let ledger: Arc<dyn LedgerRepository> = Arc::new(PgLedgerRepository::new(pool.clone()));
        let staking: Arc<dyn StakingRepository> = Arc::new(PgStakingRepository::new(pool.clone()));

        let provider = Arc::new(BalanceProvider::from_config(&config.provider)?);

        let notifier: Arc<dyn NotificationSink> =
            match &config.notification.deposit_webhook_url {
                Some(url) => {
                    let client = reqwest::Client::builder().build()?;
                    Arc::new(WebhookSink::new(
                        client,
                        url.clone(),
                        Duration::from_secs(config.provider.request_timeout_secs),
                    ))
                }
                None => Arc::new(LogSink),
            };

        let wallet_service = Arc::new(WalletService::new(allocations.clone(), secrets)?);
        let ledger_service = Arc::new(LedgerService::new(ledger.clone()));
        let staking_service = Arc::new(StakingService::new(
            staking.clone(),
            config.staking.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            allocations,
            ledger,
            provider,
            notifier,
            config.reconciler.clone(),
        ));

        Ok(Self {
            pool,
            config,
            wallet_service,
            ledger_service,
            staking_service,
            reconciler,
        })
    }
}
