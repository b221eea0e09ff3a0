//! AES-256-GCM 加密/解密模块
//!
//! 用于私钥材料的加密存储。加密密钥与主助记词由 SecretProvider
//! 提供，来源在本模块控制之外（环境变量、外部 KMS 等），密钥材料
//! 永不写入日志。

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 加密数据
///
/// 返回 nonce (12字节) + ciphertext 的拼接
pub fn encrypt_data(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 {
        return Err(anyhow!("Key must be 32 bytes for AES-256"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// 解密数据
pub fn decrypt_data(encrypted: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 {
        return Err(anyhow!("Key must be 32 bytes for AES-256"));
    }

    if encrypted.len() < 12 {
        return Err(anyhow!("Encrypted data too short"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;

    let nonce = Nonce::from_slice(&encrypted[..12]);
    let ciphertext = &encrypted[12..];

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(plaintext)
}

/// 加密密钥（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }
}

/// 密钥与种子的来源抽象
///
/// 派生模块与分配服务只通过该接口取得机密材料，不关心其存放位置
pub trait SecretProvider: Send + Sync {
    /// 私钥材料的静态加密密钥
    fn encryption_key(&self) -> Result<EncryptionKey>;

    /// 主助记词（BIP39）
    fn master_mnemonic(&self) -> Result<String>;
}

/// 从环境变量读取机密的默认实现
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn encryption_key(&self) -> Result<EncryptionKey> {
        let key_str = std::env::var("WALLET_ENC_KEY")
            .map_err(|_| anyhow!("WALLET_ENC_KEY environment variable not set"))?;

        if key_str.is_empty() {
            return Err(anyhow!("WALLET_ENC_KEY empty"));
        }

        // 支持多格式密钥：64位hex、32字节原文、或任意>=16字节经SHA256拉伸
        let bytes: Vec<u8> = if key_str.len() == 64 {
            hex::decode(&key_str).map_err(|e| anyhow!("Invalid hex key: {}", e))?
        } else if key_str.len() == 32 {
            key_str.as_bytes().to_vec()
        } else if key_str.len() >= 16 {
            let mut hasher = Sha256::new();
            hasher.update(key_str.as_bytes());
            hasher.finalize().to_vec()
        } else {
            return Err(anyhow!("WALLET_ENC_KEY too short (min 16)"));
        };

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(EncryptionKey::new(key))
    }

    fn master_mnemonic(&self) -> Result<String> {
        std::env::var("MASTER_MNEMONIC")
            .map_err(|_| anyhow!("MASTER_MNEMONIC environment variable not set"))
    }
}

/// 私钥材料封存
pub struct KeyVault {
    key: EncryptionKey,
}

impl KeyVault {
    pub fn new(provider: &dyn SecretProvider) -> Result<Self> {
        Ok(Self {
            key: provider.encryption_key()?,
        })
    }

    /// 加密私钥材料供持久化
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        encrypt_data(plaintext, self.key.as_slice())
    }

    /// 解密已持久化的私钥材料
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        decrypt_data(sealed, self.key.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = b"01234567890123456789012345678901"; // 32 bytes
        let data = b"Hello, World!";

        let encrypted = encrypt_data(data, key).unwrap();
        assert_ne!(encrypted, data);

        let decrypted = decrypt_data(&encrypted, key).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn vault_round_trip() {
        struct FixedProvider;
        impl SecretProvider for FixedProvider {
            fn encryption_key(&self) -> Result<EncryptionKey> {
                Ok(EncryptionKey::new([7u8; 32]))
            }
            fn master_mnemonic(&self) -> Result<String> {
                Ok("abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about".into())
            }
        }

        let vault = KeyVault::new(&FixedProvider).unwrap();
        let sealed = vault.seal(b"private key material").unwrap();
        assert_ne!(sealed.as_slice(), b"private key material".as_slice());
        assert_eq!(vault.open(&sealed).unwrap(), b"private key material");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let key = [3u8; 32];
        let mut sealed = encrypt_data(b"secret", &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(decrypt_data(&sealed, &key).is_err());
    }
}
