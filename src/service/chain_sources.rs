//! 链上余额数据源
//!
//! 每类链一种只读数据源实现：Ethereum 系走 JSON-RPC `eth_getBalance`
//! （ERC-20 代币走 `eth_call` balanceOf），Solana 走 JSON-RPC
//! `getBalance`，Bitcoin 走 Esplora 风格 REST API 的 UTXO 聚合。
//! 所有返回值统一折算为资产主单位的 Decimal。

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;

use crate::{
    domain::asset::{self, AssetKind},
    service::balance_provider::BalanceSource,
};

/// USDT (ERC-20) 主网合约地址
const USDT_CONTRACT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

/// ERC-20 balanceOf(address) 函数选择器
const BALANCE_OF_SELECTOR: &str = "70a08231";

fn asset_decimals(asset: AssetKind) -> Result<u32> {
    asset::registry()
        .get(asset)
        .map(|c| c.decimals)
        .ok_or_else(|| anyhow!("no asset config for {}", asset))
}

/// 按链上最小单位折算为主单位
fn scale_down(raw: u128, decimals: u32) -> Result<Decimal> {
    let value = i128::try_from(raw).map_err(|_| anyhow!("balance {} out of range", raw))?;
    Decimal::try_from_i128_with_scale(value, decimals)
        .map_err(|e| anyhow!("balance {} not representable: {}", raw, e))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ethereum 系 JSON-RPC 数据源 (ETH, USDT)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EvmRpcSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl EvmRpcSource {
    pub fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }

    async fn rpc_call(&self, method: &str, params: serde_json::Value) -> Result<String> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to call {} at {}", method, self.url))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned HTTP {}", self.url, response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse JSON-RPC response")?;

        if let Some(err) = body.get("error") {
            anyhow::bail!("JSON-RPC error from {}: {}", self.url, err);
        }

        body.get("result")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("malformed JSON-RPC result from {}", self.url))
    }

    fn parse_hex_quantity(hex: &str) -> Result<u128> {
        let stripped = hex.trim_start_matches("0x");
        if stripped.is_empty() {
            return Ok(0);
        }
        u128::from_str_radix(stripped, 16)
            .with_context(|| format!("invalid hex quantity: {}", hex))
    }

    async fn native_balance(&self, address: &str) -> Result<u128> {
        let result = self
            .rpc_call("eth_getBalance", json!([address, "latest"]))
            .await?;
        Self::parse_hex_quantity(&result)
    }

    async fn erc20_balance(&self, contract: &str, address: &str) -> Result<u128> {
        let data = format!(
            "0x{}{:0>64}",
            BALANCE_OF_SELECTOR,
            address.trim_start_matches("0x")
        );
        let result = self
            .rpc_call("eth_call", json!([{"to": contract, "data": data}, "latest"]))
            .await?;
        Self::parse_hex_quantity(&result)
    }
}

#[async_trait]
impl BalanceSource for EvmRpcSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch_balance(&self, address: &str, asset: AssetKind) -> Result<Decimal> {
        let raw = match asset {
            AssetKind::Eth => self.native_balance(address).await?,
            AssetKind::Usdt => self.erc20_balance(USDT_CONTRACT, address).await?,
            other => anyhow::bail!("EVM source does not serve {}", other),
        };
        scale_down(raw, asset_decimals(asset)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Solana JSON-RPC 数据源
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SolanaRpcSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl SolanaRpcSource {
    pub fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }
}

#[async_trait]
impl BalanceSource for SolanaRpcSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch_balance(&self, address: &str, asset: AssetKind) -> Result<Decimal> {
        if asset != AssetKind::Sol {
            anyhow::bail!("Solana source does not serve {}", asset);
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address]
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to call Solana RPC at {}", self.url))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned HTTP {}", self.url, response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse Solana RPC response")?;

        let lamports = body
            .get("result")
            .and_then(|r| r.get("value"))
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("malformed Solana RPC response from {}", self.url))?;

        scale_down(lamports as u128, asset_decimals(asset)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bitcoin Esplora REST 数据源 (UTXO 聚合)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EsploraSource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl EsploraSource {
    pub fn new(client: reqwest::Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl BalanceSource for EsploraSource {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn fetch_balance(&self, address: &str, asset: AssetKind) -> Result<Decimal> {
        if asset != AssetKind::Btc {
            anyhow::bail!("Esplora source does not serve {}", asset);
        }

        #[derive(serde::Deserialize)]
        struct Utxo {
            value: u64,
        }

        let url = format!("{}/address/{}/utxo", self.base_url, address);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to call Esplora API at {}", self.base_url))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned HTTP {}", self.base_url, response.status());
        }

        let utxos: Vec<Utxo> = response
            .json()
            .await
            .context("Failed to parse Esplora UTXO response")?;

        let total: u128 = utxos.iter().map(|u| u.value as u128).sum();
        scale_down(total, asset_decimals(asset)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_quantity_parsing() {
        assert_eq!(EvmRpcSource::parse_hex_quantity("0x0").unwrap(), 0);
        assert_eq!(EvmRpcSource::parse_hex_quantity("0x").unwrap(), 0);
        assert_eq!(
            EvmRpcSource::parse_hex_quantity("0xde0b6b3a7640000").unwrap(),
            1_000_000_000_000_000_000
        );
        assert!(EvmRpcSource::parse_hex_quantity("0xzz").is_err());
    }

    #[test]
    fn scale_down_to_major_units() {
        // 1.5 ETH in wei
        let wei = 1_500_000_000_000_000_000u128;
        assert_eq!(
            scale_down(wei, 18).unwrap(),
            Decimal::new(15, 1) // 1.5
        );

        // 0.001 BTC in sats
        assert_eq!(scale_down(100_000, 8).unwrap(), Decimal::new(1, 3));
    }

    #[test]
    fn balance_of_calldata_is_padded() {
        let data = format!(
            "0x{}{:0>64}",
            BALANCE_OF_SELECTOR,
            "0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B".trim_start_matches("0x")
        );
        // 选择器 4 字节 + 参数 32 字节
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.starts_with("0x70a08231000000000000000000000000"));
    }
}
