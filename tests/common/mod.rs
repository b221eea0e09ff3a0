//! 测试辅助模块
//!
//! 内存存储上装配完整引擎：可编程的链上余额源、固定报价源、
//! 计数通知出口

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;
use vaultcore::{
    config::{LedgerDenomination, ReconcilerConfig, StakingConfig},
    domain::asset::AssetKind,
    infrastructure::encryption::{EncryptionKey, SecretProvider},
    repository::{
        AllocationRepository, DepositCredit, LedgerRepository, MemoryStore, StakingRepository,
    },
    service::{
        BalanceProvider, BalanceSource, DepositEvent, LedgerService, NotificationSink,
        PriceSource, Reconciler, StakingService, WalletService,
    },
};

pub const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// 固定机密的测试提供者
pub struct FixedSecretProvider;

impl SecretProvider for FixedSecretProvider {
    fn encryption_key(&self) -> Result<EncryptionKey> {
        Ok(EncryptionKey::new([42u8; 32]))
    }

    fn master_mnemonic(&self) -> Result<String> {
        Ok(TEST_MNEMONIC.into())
    }
}

/// 可编程的链上状态
#[derive(Default)]
pub struct MockChain {
    balances: Mutex<HashMap<String, Decimal>>,
    failing: Mutex<HashSet<String>>,
}

impl MockChain {
    /// 设置地址的链上累计余额
    pub fn set_balance(&self, address: &str, balance: Decimal) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), balance);
    }

    /// 让指定地址的查询失败（模拟数据源故障）
    pub fn set_failing(&self, address: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }
}

struct MockChainSource(Arc<MockChain>);

#[async_trait]
impl BalanceSource for MockChainSource {
    fn name(&self) -> &str {
        "mock-chain"
    }

    async fn fetch_balance(&self, address: &str, _asset: AssetKind) -> Result<Decimal> {
        if self.0.failing.lock().unwrap().contains(address) {
            anyhow::bail!("mock source down for {}", address);
        }
        Ok(self
            .0
            .balances
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

struct FixedPriceSource(Decimal);

#[async_trait]
impl PriceSource for FixedPriceSource {
    fn name(&self) -> &str {
        "fixed-price"
    }

    async fn fetch_price_usd(&self, _asset: AssetKind) -> Result<Decimal> {
        Ok(self.0)
    }
}

/// 计数通知出口
#[derive(Default)]
pub struct CountingSink {
    pub delivered: AtomicUsize,
}

#[async_trait]
impl NotificationSink for CountingSink {
    async fn deposit_confirmed(&self, _event: &DepositEvent) -> Result<()> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 内存存储上的完整引擎
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub chain: Arc<MockChain>,
    pub wallet: Arc<WalletService>,
    pub ledger: Arc<LedgerService>,
    pub staking: Arc<StakingService>,
    pub reconciler: Arc<Reconciler>,
    pub notifications: Arc<CountingSink>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_denomination(LedgerDenomination::InKind, Decimal::ONE)
    }

    pub fn usd_denominated(price: Decimal) -> Self {
        Self::with_denomination(LedgerDenomination::Usd, price)
    }

    fn with_denomination(denomination: LedgerDenomination, price: Decimal) -> Self {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(MockChain::default());

        let mut sources: HashMap<AssetKind, Vec<Box<dyn BalanceSource>>> = HashMap::new();
        for asset in AssetKind::ALL {
            sources.insert(
                asset,
                vec![Box::new(MockChainSource(chain.clone())) as Box<dyn BalanceSource>],
            );
        }
        // TTL 为零：每个周期都重新观测链上状态
        let provider = Arc::new(BalanceProvider::new(
            sources,
            vec![Box::new(FixedPriceSource(price))],
            Duration::ZERO,
        ));

        let allocations: Arc<dyn AllocationRepository> = store.clone();
        let ledger_repo: Arc<dyn LedgerRepository> = store.clone();
        let staking_repo: Arc<dyn StakingRepository> = store.clone();

        let notifications = Arc::new(CountingSink::default());

        let wallet = Arc::new(
            WalletService::new(allocations.clone(), &FixedSecretProvider)
                .expect("wallet service"),
        );
        let ledger = Arc::new(LedgerService::new(ledger_repo.clone()));
        let staking = Arc::new(StakingService::new(
            staking_repo,
            StakingConfig {
                rate_per_period: Decimal::new(1, 2), // 0.01 = 1%/期
                period_secs: 86400,
                accrual_interval_secs: 3600,
            },
        ));
        let reconciler = Arc::new(Reconciler::new(
            allocations,
            ledger_repo,
            provider,
            notifications.clone(),
            ReconcilerConfig {
                interval_secs: 30,
                concurrency: 4,
                denomination,
            },
        ));

        Self {
            store,
            chain,
            wallet,
            ledger,
            staking,
            reconciler,
            notifications,
        }
    }

    /// 直接向账本注入资金（绕过链上观测，用于质押测试）
    pub async fn fund(&self, user_id: Uuid, asset: AssetKind, amount: Decimal) {
        let ledger: &dyn LedgerRepository = self.store.as_ref();
        ledger
            .apply_deposit(DepositCredit {
                allocation_id: Uuid::new_v4(),
                user_id,
                asset,
                amount,
                dedup_key: format!("test-fund:{}", Uuid::new_v4()),
                observed_balance: amount,
                metadata: serde_json::json!({}),
            })
            .await
            .expect("fund");
    }
}
