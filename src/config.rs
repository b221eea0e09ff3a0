//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{path::Path, str::FromStr};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub provider: ProviderConfig,
    pub reconciler: ReconcilerConfig,
    pub staking: StakingConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 余额数据源配置
///
/// 每条链一个有序的数据源列表，索引 0 为首选，后续为降级备选
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub eth_rpc_urls: Vec<String>,
    pub sol_rpc_urls: Vec<String>,
    pub btc_api_urls: Vec<String>,
    pub price_api_url: String,
    /// 单次外部调用超时（秒）
    pub request_timeout_secs: u64,
    /// 余额/价格响应的短期缓存时长（秒）
    pub cache_ttl_secs: u64,
}

/// 记账单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerDenomination {
    /// 按资产原币种记账
    InKind,
    /// 按入账时价格折算为 USD 记账
    Usd,
}

/// 对账调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// 轮询周期（秒）
    pub interval_secs: u64,
    /// 单周期内并发处理的地址数上限
    pub concurrency: usize,
    pub denomination: LedgerDenomination,
}

/// 入账通知配置
///
/// webhook 未配置时退化为日志通知，通知失败不影响入账
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub deposit_webhook_url: Option<String>,
}

/// 质押配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingConfig {
    /// 每期收益率（小数，如 0.01 = 1%/期）
    pub rate_per_period: Decimal,
    /// 计息周期长度（秒）
    pub period_secs: i64,
    /// 后台计息任务的运行间隔（秒）
    pub accrual_interval_secs: u64,
}

fn env_list(name: &str, default: &[&str]) -> Vec<String> {
    std::env::var(name)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://postgres@localhost:5432/vaultcore".into()),
            max_connections: std::env::var("DB_MAX_CONNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            min_connections: std::env::var("DB_MIN_CONNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            acquire_timeout_secs: std::env::var("DB_ACQ_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            eth_rpc_urls: env_list(
                "ETH_RPC_URLS",
                &["https://eth.llamarpc.com", "https://rpc.ankr.com/eth"],
            ),
            sol_rpc_urls: env_list(
                "SOL_RPC_URLS",
                &[
                    "https://api.mainnet-beta.solana.com",
                    "https://solana-rpc.publicnode.com",
                ],
            ),
            btc_api_urls: env_list(
                "BTC_API_URLS",
                &["https://blockstream.info/api", "https://mempool.space/api"],
            ),
            price_api_url: std::env::var("PRICE_API_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".into()),
            request_timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            cache_ttl_secs: std::env::var("PROVIDER_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        let denomination = match std::env::var("LEDGER_DENOMINATION").as_deref() {
            Ok("usd") => LedgerDenomination::Usd,
            _ => LedgerDenomination::InKind,
        };
        Self {
            interval_secs: std::env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            concurrency: std::env::var("RECONCILE_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
            denomination,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            deposit_webhook_url: std::env::var("DEPOSIT_WEBHOOK_URL").ok(),
        }
    }
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            rate_per_period: std::env::var("STAKING_RATE_PER_PERIOD")
                .ok()
                .and_then(|s| Decimal::from_str(&s).ok())
                .unwrap_or_else(|| Decimal::new(1, 2)), // 0.01 = 1%/期
            period_secs: std::env::var("STAKING_PERIOD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(86400),
            accrual_interval_secs: std::env::var("STAKING_ACCRUAL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            provider: ProviderConfig::default(),
            reconciler: ReconcilerConfig::default(),
            staking: StakingConfig::default(),
            notification: NotificationConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            anyhow::bail!("DATABASE_URL must start with postgres:// or postgresql://");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.provider.eth_rpc_urls.is_empty()
            || self.provider.sol_rpc_urls.is_empty()
            || self.provider.btc_api_urls.is_empty()
        {
            anyhow::bail!("every chain needs at least one balance source URL");
        }

        if self.staking.rate_per_period < Decimal::ZERO {
            anyhow::bail!("STAKING_RATE_PER_PERIOD must be non-negative");
        }
        if self.staking.period_secs <= 0 {
            anyhow::bail!("STAKING_PERIOD_SECS must be positive");
        }

        Ok(())
    }
}
