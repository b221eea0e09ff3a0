//! 资产 USD 报价数据源
//!
//! CoinGecko simple-price 风格的 REST 接口。报价仅在账本按 USD
//! 记账时参与入账折算，拉取失败与余额数据源失败同样处理：
//! 本周期无观测，下周期重试。

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::asset::AssetKind;

/// USD 报价源抽象
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_price_usd(&self, asset: AssetKind) -> Result<Decimal>;
}

/// CoinGecko simple-price 数据源
pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CoinGeckoSource {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }

    /// 符号转 CoinGecko ID
    fn coin_id(asset: AssetKind) -> &'static str {
        match asset {
            AssetKind::Btc => "bitcoin",
            AssetKind::Eth => "ethereum",
            AssetKind::Sol => "solana",
            AssetKind::Usdt => "tether",
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn fetch_price_usd(&self, asset: AssetKind) -> Result<Decimal> {
        let coin_id = Self::coin_id(asset);
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.base_url, coin_id
        );

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "vaultcore/0.1")
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to fetch price from {}", self.base_url))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned HTTP {}", self.base_url, response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse price response")?;

        let price_f64 = body
            .get(coin_id)
            .and_then(|c| c.get("usd"))
            .and_then(|p| p.as_f64())
            .ok_or_else(|| anyhow!("price for {} missing in response", coin_id))?;

        Decimal::from_f64_retain(price_f64)
            .ok_or_else(|| anyhow!("invalid price value: {}", price_f64))
    }
}
