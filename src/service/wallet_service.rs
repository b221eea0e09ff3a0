//! 钱包分配服务
//!
//! (user, asset) 的幂等地址分配：已存在直接返回；否则原子预留命名
//! 空间的下一个索引、确定性派生地址、加密私钥材料后落库。预留后
//! 任何一步失败，该索引永久作废，不会带着同一索引重试。

use std::sync::Arc;

use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::{
    domain::{asset, derivation},
    error::{Error, Result},
    infrastructure::encryption::{KeyVault, SecretProvider},
    repository::{AllocationRepository, NewAllocation, WalletAllocation},
};

pub struct WalletService {
    allocations: Arc<dyn AllocationRepository>,
    vault: KeyVault,
    seed: Zeroizing<[u8; 64]>,
}

impl WalletService {
    /// 从机密提供者解析主种子与加密密钥
    pub fn new(
        allocations: Arc<dyn AllocationRepository>,
        secrets: &dyn SecretProvider,
    ) -> Result<Self> {
        let mnemonic = secrets.master_mnemonic()?;
        let seed = Zeroizing::new(derivation::seed_from_mnemonic(&mnemonic)?);
        let vault = KeyVault::new(secrets)?;

        Ok(Self {
            allocations,
            vault,
            seed,
        })
    }

    /// 为 (user, asset) 分配充值地址，幂等
    pub async fn allocate_address(
        &self,
        user_id: Uuid,
        asset: asset::AssetKind,
    ) -> Result<WalletAllocation> {
        if let Some(existing) = self.allocations.find(user_id, asset).await? {
            return Ok(existing);
        }

        let config = asset::registry()
            .get(asset)
            .ok_or_else(|| Error::Configuration(format!("unsupported asset: {}", asset)))?;

        let index = self.allocations.reserve_index(config.namespace).await?;
        let index = u32::try_from(index).map_err(|_| {
            Error::Configuration(format!("derivation cursor {} exhausted for {}", index, asset))
        })?;

        let mut derived = derivation::derive(self.seed.as_ref(), config, index)?;

        let mut key_bytes = hex::decode(&derived.private_key)
            .map_err(|e| Error::Configuration(format!("derived key not hex: {}", e)))?;
        let encrypted_key = self.vault.seal(&key_bytes)?;
        key_bytes.zeroize();
        derived.private_key.zeroize();

        let inserted = self
            .allocations
            .insert(NewAllocation {
                user_id,
                asset,
                address: derived.address.clone(),
                derivation_index: index as i64,
                public_key: derived.public_key,
                encrypted_key,
            })
            .await?;

        match inserted {
            Some(allocation) => {
                tracing::info!(
                    user_id = %user_id,
                    asset = %asset,
                    address = %allocation.address,
                    derivation_index = allocation.derivation_index,
                    "Deposit address allocated"
                );
                Ok(allocation)
            }
            // (user, asset) 并发分配的失败方：本次预留的索引作废，
            // 返回胜者已落库的记录
            None => self
                .allocations
                .find(user_id, asset)
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!("allocation for user {} asset {}", user_id, asset))
                }),
        }
    }
}
