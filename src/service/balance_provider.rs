//! 余额数据源适配器
//!
//! 把多个外部只读数据源包在统一接口后面：按配置顺序逐个尝试，
//! 超时、非 2xx、响应格式错误都触发降级到下一个源；全部失败才向
//! 调用方返回 ProviderUnavailable。命中结果做数十秒的短期缓存，
//! 约束高频轮询下的外部调用量。

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::{
    config::ProviderConfig,
    domain::asset::AssetKind,
    error::Error,
    service::{
        chain_sources::{EsploraSource, EvmRpcSource, SolanaRpcSource},
        price_source::{CoinGeckoSource, PriceSource},
    },
};

/// 链上余额数据源抽象
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// 数据源标识，用于日志
    fn name(&self) -> &str;

    /// 地址当前的链上累计余额（主单位）
    async fn fetch_balance(&self, address: &str, asset: AssetKind) -> Result<Decimal>;
}

struct CacheEntry {
    value: Decimal,
    fetched_at: Instant,
}

/// 带降级与缓存的余额/报价提供者
pub struct BalanceProvider {
    sources: HashMap<AssetKind, Vec<Box<dyn BalanceSource>>>,
    price_sources: Vec<Box<dyn PriceSource>>,
    balance_cache: RwLock<HashMap<(AssetKind, String), CacheEntry>>,
    price_cache: RwLock<HashMap<AssetKind, CacheEntry>>,
    cache_ttl: Duration,
}

impl BalanceProvider {
    pub fn new(
        sources: HashMap<AssetKind, Vec<Box<dyn BalanceSource>>>,
        price_sources: Vec<Box<dyn PriceSource>>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            sources,
            price_sources,
            balance_cache: RwLock::new(HashMap::new()),
            price_cache: RwLock::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// 按配置构建全部数据源
    ///
    /// 每条 URL 一个源，配置中的顺序即降级顺序；USDT 复用 Ethereum
    /// 的 RPC 端点
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let mut sources: HashMap<AssetKind, Vec<Box<dyn BalanceSource>>> = HashMap::new();

        for asset in [AssetKind::Eth, AssetKind::Usdt] {
            let chain: Vec<Box<dyn BalanceSource>> = config
                .eth_rpc_urls
                .iter()
                .map(|url| {
                    Box::new(EvmRpcSource::new(client.clone(), url.clone(), timeout))
                        as Box<dyn BalanceSource>
                })
                .collect();
            sources.insert(asset, chain);
        }

        sources.insert(
            AssetKind::Sol,
            config
                .sol_rpc_urls
                .iter()
                .map(|url| {
                    Box::new(SolanaRpcSource::new(client.clone(), url.clone(), timeout))
                        as Box<dyn BalanceSource>
                })
                .collect(),
        );

        sources.insert(
            AssetKind::Btc,
            config
                .btc_api_urls
                .iter()
                .map(|url| {
                    Box::new(EsploraSource::new(client.clone(), url.clone(), timeout))
                        as Box<dyn BalanceSource>
                })
                .collect(),
        );

        let price_sources: Vec<Box<dyn PriceSource>> = vec![Box::new(CoinGeckoSource::new(
            client,
            config.price_api_url.clone(),
            timeout,
        ))];

        Ok(Self::new(
            sources,
            price_sources,
            Duration::from_secs(config.cache_ttl_secs),
        ))
    }

    /// 地址当前余额
    ///
    /// 全部源失败返回 ProviderUnavailable，调用方必须视为"本周期
    /// 无观测"，绝不能当作余额为零
    pub async fn get_balance(&self, address: &str, asset: AssetKind) -> Result<Decimal, Error> {
        let cache_key = (asset, address.to_string());
        {
            let cache = self.balance_cache.read().await;
            if let Some(entry) = cache.get(&cache_key) {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.value);
                }
            }
        }

        let sources = self.sources.get(&asset).ok_or_else(|| {
            Error::Configuration(format!("no balance sources configured for {}", asset))
        })?;

        let mut last_error = String::from("no sources configured");
        for source in sources {
            match source.fetch_balance(address, asset).await {
                Ok(balance) => {
                    self.balance_cache.write().await.insert(
                        cache_key,
                        CacheEntry {
                            value: balance,
                            fetched_at: Instant::now(),
                        },
                    );
                    return Ok(balance);
                }
                Err(e) => {
                    tracing::warn!(
                        source = source.name(),
                        asset = %asset,
                        error = %e,
                        "Balance source failed, trying next"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(Error::ProviderUnavailable {
            asset,
            detail: last_error,
        })
    }

    /// 资产 USD 报价
    pub async fn get_price_usd(&self, asset: AssetKind) -> Result<Decimal, Error> {
        {
            let cache = self.price_cache.read().await;
            if let Some(entry) = cache.get(&asset) {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.value);
                }
            }
        }

        let mut last_error = String::from("no price sources configured");
        for source in &self.price_sources {
            match source.fetch_price_usd(asset).await {
                Ok(price) => {
                    self.price_cache.write().await.insert(
                        asset,
                        CacheEntry {
                            value: price,
                            fetched_at: Instant::now(),
                        },
                    );
                    return Ok(price);
                }
                Err(e) => {
                    tracing::warn!(
                        source = source.name(),
                        asset = %asset,
                        error = %e,
                        "Price source failed, trying next"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(Error::ProviderUnavailable {
            asset,
            detail: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// 可编程的测试数据源
    struct StubSource {
        label: String,
        balance: Option<Decimal>,
        calls: Arc<AtomicUsize>,
    }

    impl StubSource {
        fn ok(label: &str, balance: Decimal) -> Self {
            Self {
                label: label.into(),
                balance: Some(balance),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(label: &str) -> Self {
            Self {
                label: label.into(),
                balance: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl BalanceSource for StubSource {
        fn name(&self) -> &str {
            &self.label
        }

        async fn fetch_balance(&self, _address: &str, _asset: AssetKind) -> Result<Decimal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.balance
                .ok_or_else(|| anyhow::anyhow!("{} unavailable", self.label))
        }
    }

    fn provider_with(sources: Vec<Box<dyn BalanceSource>>, ttl: Duration) -> BalanceProvider {
        let mut map: HashMap<AssetKind, Vec<Box<dyn BalanceSource>>> = HashMap::new();
        map.insert(AssetKind::Eth, sources);
        BalanceProvider::new(map, Vec::new(), ttl)
    }

    #[tokio::test]
    async fn falls_back_to_next_source() {
        let provider = provider_with(
            vec![
                Box::new(StubSource::failing("primary")),
                Box::new(StubSource::ok("secondary", Decimal::from(42))),
            ],
            Duration::ZERO,
        );

        let balance = provider.get_balance("0xabc", AssetKind::Eth).await.unwrap();
        assert_eq!(balance, Decimal::from(42));
    }

    #[tokio::test]
    async fn all_sources_failing_is_unavailable_not_zero() {
        let provider = provider_with(
            vec![
                Box::new(StubSource::failing("a")),
                Box::new(StubSource::failing("b")),
            ],
            Duration::ZERO,
        );

        let err = provider
            .get_balance("0xabc", AssetKind::Eth)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider_unavailable");
    }

    #[tokio::test]
    async fn cache_bounds_repeat_calls() {
        let source = StubSource::ok("only", Decimal::from(7));
        let calls = source.calls.clone();
        let provider = provider_with(vec![Box::new(source)], Duration::from_secs(60));

        for _ in 0..5 {
            let balance = provider.get_balance("0xabc", AssetKind::Eth).await.unwrap();
            assert_eq!(balance, Decimal::from(7));
        }

        // 仅首次调用击穿到数据源
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unconfigured_asset_is_configuration_error() {
        let provider = provider_with(Vec::new(), Duration::ZERO);
        let err = provider.get_balance("bc1q", AssetKind::Btc).await.unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }
}
