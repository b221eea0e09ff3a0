//! 地址分配集成测试
//!
//! 不变量：派生索引按命名空间严格递增且从不复用，地址全局唯一，
//! 相同种子在任何进程里派生出相同地址

mod common;

use std::collections::HashSet;

use uuid::Uuid;
use vaultcore::{domain::asset::AssetKind, repository::AllocationRepository};

use common::TestHarness;

/// 同一 (user, asset) 的重复分配返回原记录
#[tokio::test]
async fn allocate_is_idempotent() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();

    let first = h.wallet.allocate_address(user, AssetKind::Eth).await.unwrap();
    let second = h.wallet.allocate_address(user, AssetKind::Eth).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.address, second.address);
    assert_eq!(first.derivation_index, second.derivation_index);

    let repo: &dyn AllocationRepository = h.store.as_ref();
    assert_eq!(repo.list_all().await.unwrap().len(), 1);
}

/// N 个并发分配请求拿到 N 个互不相同的索引与地址
#[tokio::test]
async fn concurrent_allocations_get_distinct_indices() {
    let h = TestHarness::new();
    const N: usize = 16;

    let mut handles = Vec::new();
    for _ in 0..N {
        let wallet = h.wallet.clone();
        handles.push(tokio::spawn(async move {
            wallet
                .allocate_address(Uuid::new_v4(), AssetKind::Eth)
                .await
                .unwrap()
        }));
    }

    let mut indices = HashSet::new();
    let mut addresses = HashSet::new();
    for handle in handles {
        let alloc = handle.await.unwrap();
        assert!(
            indices.insert(alloc.derivation_index),
            "index {} reused",
            alloc.derivation_index
        );
        assert!(
            addresses.insert(alloc.address.clone()),
            "address {} reused",
            alloc.address
        );
    }

    // 无失败分配时索引连续覆盖 0..N
    let max = indices.iter().max().copied().unwrap();
    assert_eq!(max, N as i64 - 1);
}

/// USDT 复用 ETH 的派生命名空间：共享同一游标，地址从不碰撞
#[tokio::test]
async fn aliased_assets_share_cursor_without_collision() {
    let h = TestHarness::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let eth = h.wallet.allocate_address(alice, AssetKind::Eth).await.unwrap();
    let usdt = h.wallet.allocate_address(bob, AssetKind::Usdt).await.unwrap();
    let eth2 = h.wallet.allocate_address(bob, AssetKind::Eth).await.unwrap();

    // 三次分配依次取走共享游标的 0、1、2
    let mut indices = vec![eth.derivation_index, usdt.derivation_index, eth2.derivation_index];
    indices.sort();
    assert_eq!(indices, vec![0, 1, 2]);

    let addresses: HashSet<_> = [&eth.address, &usdt.address, &eth2.address]
        .into_iter()
        .collect();
    assert_eq!(addresses.len(), 3);
}

/// 独立命名空间各自从零计数
#[tokio::test]
async fn namespaces_count_independently() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();

    let eth = h.wallet.allocate_address(user, AssetKind::Eth).await.unwrap();
    let btc = h.wallet.allocate_address(user, AssetKind::Btc).await.unwrap();
    let sol = h.wallet.allocate_address(user, AssetKind::Sol).await.unwrap();

    assert_eq!(eth.derivation_index, 0);
    assert_eq!(btc.derivation_index, 0);
    assert_eq!(sol.derivation_index, 0);

    assert!(eth.address.starts_with("0x"));
    assert!(btc.address.starts_with("bc1"));
}

/// 相同种子在独立的引擎实例上派生出相同地址
#[tokio::test]
async fn derivation_is_reproducible_across_instances() {
    let a = TestHarness::new();
    let b = TestHarness::new();
    let user = Uuid::new_v4();

    for asset in AssetKind::ALL {
        let first = a.wallet.allocate_address(user, asset).await.unwrap();
        let second = b.wallet.allocate_address(user, asset).await.unwrap();
        assert_eq!(
            first.address, second.address,
            "{} index {} must derive identically",
            asset, first.derivation_index
        );
    }
}

/// 私钥材料只以密文落库
#[tokio::test]
async fn key_material_is_sealed_at_rest() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();

    let alloc = h.wallet.allocate_address(user, AssetKind::Eth).await.unwrap();

    // AES-GCM: 12 字节 nonce + 密文，远长于 32 字节裸私钥
    assert!(alloc.encrypted_key.len() > 32);
    // 密文里不应出现十六进制私钥的可打印形态
    assert!(!alloc.encrypted_key.iter().all(|b| b.is_ascii_hexdigit()));
}
