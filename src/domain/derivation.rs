//! 钱包派生策略
//!
//! 纯函数式派生：相同的 (种子, 资产, 索引) 输入在任何进程、任何时刻
//! 产生完全相同的地址与密钥材料。私钥材料从不落盘明文，由调用方加密存储。

use anyhow::Context;
use bip39::{Language, Mnemonic};
use coins_bip32::path::DerivationPath;

use crate::{
    domain::asset::{AddressFormat, AssetConfig, CurveType},
    error::{Error, Result},
};

/// 硬化派生索引的上界，超过即视为配置错误
const HARDENED_OFFSET: u32 = 0x8000_0000;

/// 派生结果
#[derive(Debug, Clone)]
pub struct DerivedKey {
    /// 地址
    pub address: String,
    /// 公钥 (hex 编码)
    pub public_key: String,
    /// 私钥 (hex 编码，仅供加密存储)
    pub private_key: String,
}

/// 钱包派生策略 trait
pub trait DerivationStrategy: Send + Sync {
    /// 从主种子派生指定索引的地址
    fn derive(&self, seed: &[u8], config: &AssetConfig, index: u32) -> Result<DerivedKey>;

    /// 验证地址格式
    fn validate_address(&self, address: &str, config: &AssetConfig) -> bool;
}

/// 解析 BIP39 助记词为 64 字节主种子
pub fn seed_from_mnemonic(phrase: &str) -> Result<[u8; 64]> {
    let mnemonic = Mnemonic::parse_in(Language::English, phrase)
        .map_err(|e| Error::Configuration(format!("invalid mnemonic: {}", e)))?;
    Ok(mnemonic.to_seed(""))
}

/// 按资产配置派生地址，索引越界或资产不支持返回配置错误
pub fn derive(seed: &[u8], config: &AssetConfig, index: u32) -> Result<DerivedKey> {
    if index >= HARDENED_OFFSET {
        return Err(Error::Configuration(format!(
            "derivation index {} out of range for {}",
            index, config.kind
        )));
    }
    DerivationStrategyFactory::create_strategy(config.curve_type).derive(seed, config, index)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Secp256k1 策略 (BTC, ETH 及其别名资产)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Secp256k1Strategy;

impl DerivationStrategy for Secp256k1Strategy {
    fn derive(&self, seed: &[u8], config: &AssetConfig, index: u32) -> Result<DerivedKey> {
        let path = config.derivation_path(index);
        match config.address_format {
            AddressFormat::Hex => self.derive_account_style(seed, &path),
            AddressFormat::Bech32 => self.derive_utxo_style(seed, &path),
            AddressFormat::Base58 => Err(Error::Configuration(format!(
                "address format {:?} unsupported on secp256k1",
                config.address_format
            ))),
        }
    }

    fn validate_address(&self, address: &str, config: &AssetConfig) -> bool {
        match config.address_format {
            // Ethereum 地址: 0x + 40 hex chars
            AddressFormat::Hex => {
                address.len() == 42
                    && address.starts_with("0x")
                    && address[2..].chars().all(|c| c.is_ascii_hexdigit())
            }
            // Bitcoin native segwit: bc1...
            AddressFormat::Bech32 => address.starts_with("bc1"),
            AddressFormat::Base58 => false,
        }
    }
}

impl Secp256k1Strategy {
    fn derive_signing_key(&self, seed: &[u8], path: &str) -> Result<k256::ecdsa::SigningKey> {
        use coins_bip32::prelude::*;

        let derivation_path = path
            .parse::<DerivationPath>()
            .context("Invalid derivation path")?;

        let master_key =
            XPriv::root_from_seed(seed, None).context("Failed to derive master key")?;

        let derived_key = master_key
            .derive_path(&derivation_path)
            .context("Failed to derive key")?;

        // XPriv 实现 AsRef<SigningKey>
        let signing_key: &k256::ecdsa::SigningKey = derived_key.as_ref();
        Ok(signing_key.clone())
    }

    /// 账户系地址：Keccak256(未压缩公钥)[12..]
    fn derive_account_style(&self, seed: &[u8], path: &str) -> Result<DerivedKey> {
        use sha3::{Digest, Keccak256};

        let signing_key = self.derive_signing_key(seed, path)?;
        let private_key_bytes = signing_key.to_bytes();

        let verifying_key = signing_key.verifying_key();
        let public_key_point = verifying_key.to_encoded_point(false); // 未压缩格式
        let public_key_slice = &public_key_point.as_bytes()[1..]; // 去掉 0x04 前缀

        let hash = Keccak256::digest(public_key_slice);
        let address = format!("0x{}", hex::encode(&hash[12..]));

        Ok(DerivedKey {
            address,
            public_key: hex::encode(public_key_slice),
            private_key: hex::encode(private_key_bytes),
        })
    }

    /// UTXO 系地址：P2WPKH (native segwit)
    fn derive_utxo_style(&self, seed: &[u8], path: &str) -> Result<DerivedKey> {
        use bitcoin::{
            secp256k1::PublicKey as Secp256k1PublicKey, Address, Network,
            PublicKey as BitcoinPublicKey,
        };

        let signing_key = self.derive_signing_key(seed, path)?;
        let private_key_bytes = signing_key.to_bytes();
        let verifying_key = signing_key.verifying_key();
        let public_key_point = verifying_key.to_encoded_point(true); // 压缩格式

        let secp_pubkey = Secp256k1PublicKey::from_slice(public_key_point.as_bytes())
            .context("Invalid secp256k1 public key")?;
        let bitcoin_pubkey = BitcoinPublicKey::new(secp_pubkey);

        let address = Address::p2wpkh(&bitcoin_pubkey, Network::Bitcoin)
            .context("Failed to create P2WPKH address")?
            .to_string();

        Ok(DerivedKey {
            address,
            public_key: hex::encode(public_key_point.as_bytes()),
            private_key: hex::encode(private_key_bytes),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ed25519 策略 (SOL)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Ed25519Strategy;

impl DerivationStrategy for Ed25519Strategy {
    fn derive(&self, seed: &[u8], config: &AssetConfig, index: u32) -> Result<DerivedKey> {
        use ed25519_dalek::{SigningKey, VerifyingKey};

        // 全硬化路径 m/44'/coin'/index'/0'
        let path = [44, config.coin_type, index, 0];
        let private_key_bytes = self.derive_ed25519_key(seed, &path);

        let signing_key = SigningKey::from_bytes(&private_key_bytes);
        let verifying_key: VerifyingKey = signing_key.verifying_key();
        let public_key_bytes = verifying_key.to_bytes();

        // 地址即公钥的 Base58 编码
        let address = bs58::encode(&public_key_bytes).into_string();

        Ok(DerivedKey {
            address,
            public_key: hex::encode(public_key_bytes),
            private_key: hex::encode(private_key_bytes),
        })
    }

    fn validate_address(&self, address: &str, _config: &AssetConfig) -> bool {
        // Base58 编码的 32 字节公钥，长度 32-44 字符
        address.len() >= 32
            && address.len() <= 44
            && bs58::decode(address)
                .into_vec()
                .map(|b| b.len() == 32)
                .unwrap_or(false)
    }
}

impl Ed25519Strategy {
    /// 硬化链式派生：每级 SHA512("ed25519 seed" || key || hardened_index)
    fn derive_ed25519_key(&self, seed: &[u8], path: &[u32]) -> [u8; 32] {
        use sha2::{Digest, Sha512};

        let mut key = seed.to_vec();

        for &index in path {
            let hardened_index = index | HARDENED_OFFSET;

            let mut hasher = Sha512::new();
            hasher.update(b"ed25519 seed");
            hasher.update(&key);
            hasher.update(hardened_index.to_be_bytes());
            let derived = hasher.finalize();

            key = derived[..32].to_vec();
        }

        // Ed25519 clamping
        key[0] &= 248;
        key[31] &= 127;
        key[31] |= 64;

        let mut result = [0u8; 32];
        result.copy_from_slice(&key);
        result
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 策略工厂
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DerivationStrategyFactory;

impl DerivationStrategyFactory {
    /// 根据曲线类型创建策略
    pub fn create_strategy(curve_type: CurveType) -> Box<dyn DerivationStrategy> {
        match curve_type {
            CurveType::Secp256k1 => Box::new(Secp256k1Strategy),
            CurveType::Ed25519 => Box::new(Ed25519Strategy),
        }
    }
}
