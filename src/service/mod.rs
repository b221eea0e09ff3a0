//! Service 模块
//!
//! 钱包分配、账本查询、质押与存款对账的业务服务层，
//! 外加余额/报价数据源与通知出口

pub mod balance_provider;
pub mod chain_sources;
pub mod ledger_service;
pub mod notification;
pub mod price_source;
pub mod reconciler;
pub mod staking_service;
pub mod wallet_service;

pub use balance_provider::{BalanceProvider, BalanceSource};
pub use ledger_service::LedgerService;
pub use notification::{DepositEvent, LogSink, NotificationSink, WebhookSink};
pub use price_source::{CoinGeckoSource, PriceSource};
pub use reconciler::{CycleStats, Reconciler};
pub use staking_service::StakingService;
pub use wallet_service::WalletService;
