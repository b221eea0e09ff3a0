//! 资产配置模块
//!
//! 定义所有支持的资产及其派生命名空间配置

use std::{collections::HashMap, fmt, str::FromStr};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// 加密曲线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    /// secp256k1 曲线 (Bitcoin, Ethereum 系列)
    Secp256k1,
    /// ed25519 曲线 (Solana)
    Ed25519,
}

/// 地址编码格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFormat {
    /// 十六进制 0x... (Ethereum 系列)
    Hex,
    /// Bech32 编码 (Bitcoin native segwit)
    Bech32,
    /// Base58 编码 (Solana)
    Base58,
}

/// 派生命名空间
///
/// 索引游标按命名空间而非资产符号计数：共享地址空间的资产（如 ERC-20
/// 形态的 USDT 复用 ETH 地址）必须共享同一个游标，否则两个资产会在
/// 同一索引上派生出相同地址，破坏地址全局唯一性。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivationNamespace {
    /// UTXO 系 (BTC, BIP84 P2WPKH)
    Utxo,
    /// 账户系 secp256k1 (ETH 及复用其地址空间的代币)
    Account,
    /// 账户系 ed25519 (SOL)
    AccountEd25519,
}

impl fmt::Display for DerivationNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DerivationNamespace::Utxo => "utxo",
            DerivationNamespace::Account => "account",
            DerivationNamespace::AccountEd25519 => "account_ed25519",
        };
        f.write_str(s)
    }
}

impl FromStr for DerivationNamespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "utxo" => Ok(DerivationNamespace::Utxo),
            "account" => Ok(DerivationNamespace::Account),
            "account_ed25519" => Ok(DerivationNamespace::AccountEd25519),
            other => Err(format!("unknown derivation namespace: {}", other)),
        }
    }
}

/// 支持的资产
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetKind {
    Btc,
    Eth,
    Sol,
    /// ERC-20 USDT，复用 ETH 的地址空间与派生命名空间
    Usdt,
}

impl AssetKind {
    pub const ALL: [AssetKind; 4] = [
        AssetKind::Btc,
        AssetKind::Eth,
        AssetKind::Sol,
        AssetKind::Usdt,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            AssetKind::Btc => "BTC",
            AssetKind::Eth => "ETH",
            AssetKind::Sol => "SOL",
            AssetKind::Usdt => "USDT",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BTC" => Ok(AssetKind::Btc),
            "ETH" => Ok(AssetKind::Eth),
            "SOL" => Ok(AssetKind::Sol),
            "USDT" => Ok(AssetKind::Usdt),
            other => Err(format!("unsupported asset: {}", other)),
        }
    }
}

/// 资产配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub kind: AssetKind,
    pub name: String,
    pub curve_type: CurveType,
    pub address_format: AddressFormat,
    pub namespace: DerivationNamespace,
    /// BIP44/SLIP-44 coin type
    pub coin_type: u32,
    /// 链上最小单位精度（小数位数）
    pub decimals: u32,
}

impl AssetConfig {
    /// 生成地址索引对应的派生路径
    pub fn derivation_path(&self, index: u32) -> String {
        match self.namespace {
            // BIP84 native segwit
            DerivationNamespace::Utxo => format!("m/84'/{}'/0'/0/{}", self.coin_type, index),
            // BIP44 account-style
            DerivationNamespace::Account => format!("m/44'/{}'/0'/0/{}", self.coin_type, index),
            // SLIP-0010 全硬化路径
            DerivationNamespace::AccountEd25519 => {
                format!("m/44'/{}'/{}'/0'", self.coin_type, index)
            }
        }
    }
}

/// 资产配置注册表
pub struct AssetRegistry {
    configs: HashMap<AssetKind, AssetConfig>,
}

impl AssetRegistry {
    /// 创建预配置的注册表
    pub fn new() -> Self {
        let mut registry = Self {
            configs: HashMap::new(),
        };
        registry.register_default_assets();
        registry
    }

    fn register_default_assets(&mut self) {
        self.register(AssetConfig {
            kind: AssetKind::Btc,
            name: "Bitcoin".to_string(),
            curve_type: CurveType::Secp256k1,
            address_format: AddressFormat::Bech32,
            namespace: DerivationNamespace::Utxo,
            coin_type: 0,
            decimals: 8,
        });

        self.register(AssetConfig {
            kind: AssetKind::Eth,
            name: "Ethereum".to_string(),
            curve_type: CurveType::Secp256k1,
            address_format: AddressFormat::Hex,
            namespace: DerivationNamespace::Account,
            coin_type: 60,
            decimals: 18,
        });

        self.register(AssetConfig {
            kind: AssetKind::Sol,
            name: "Solana".to_string(),
            curve_type: CurveType::Ed25519,
            address_format: AddressFormat::Base58,
            namespace: DerivationNamespace::AccountEd25519,
            coin_type: 501,
            decimals: 9,
        });

        // USDT 别名 ETH 的地址空间：相同曲线、相同 coin type、相同命名空间
        self.register(AssetConfig {
            kind: AssetKind::Usdt,
            name: "Tether USD (ERC-20)".to_string(),
            curve_type: CurveType::Secp256k1,
            address_format: AddressFormat::Hex,
            namespace: DerivationNamespace::Account,
            coin_type: 60,
            decimals: 6,
        });
    }

    fn register(&mut self, config: AssetConfig) {
        self.configs.insert(config.kind, config);
    }

    pub fn get(&self, kind: AssetKind) -> Option<&AssetConfig> {
        self.configs.get(&kind)
    }

    pub fn all(&self) -> impl Iterator<Item = &AssetConfig> {
        self.configs.values()
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<AssetRegistry> = Lazy::new(AssetRegistry::new);

/// 全局资产注册表
pub fn registry() -> &'static AssetRegistry {
    &REGISTRY
}
