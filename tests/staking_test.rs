//! 质押子账本集成测试
//!
//! 不变量：余额永不为负、整周期计息且幂等、关仓结算恰好一次

mod common;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use vaultcore::{
    domain::asset::AssetKind,
    repository::{OpenStake, PositionStatus, StakingRepository, TxType},
    Error,
};

use common::TestHarness;

const PERIOD: i64 = 86400;

fn rate() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

/// 余额不足的开仓被拒绝，无任何副作用
#[tokio::test]
async fn stake_without_funds_is_rejected() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();

    let err = h
        .staking
        .open_stake(user, AssetKind::Eth, Decimal::from(100))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "insufficient_funds");

    assert!(h.staking.positions(user).await.unwrap().is_empty());
    assert!(h.ledger.list_transactions(user, 10, 0).await.unwrap().is_empty());
}

/// 超出余额的开仓被拒绝而不是把余额扣到负数
#[tokio::test]
async fn debit_is_rejected_not_clamped() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();
    h.fund(user, AssetKind::Eth, Decimal::from(100)).await;

    let err = h
        .staking
        .open_stake(user, AssetKind::Eth, Decimal::from(150))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds { .. }));

    // 余额原封不动
    assert_eq!(
        h.ledger.get_balance(user, AssetKind::Eth).await.unwrap(),
        Decimal::from(100)
    );
}

/// 开仓扣减本金并写 stake 交易；立即关仓原额退回
#[tokio::test]
async fn open_debits_and_close_settles() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();
    h.fund(user, AssetKind::Eth, Decimal::from(1000)).await;

    let position = h
        .staking
        .open_stake(user, AssetKind::Eth, Decimal::from(400))
        .await
        .unwrap();
    assert_eq!(position.status, PositionStatus::Active);
    assert_eq!(
        h.ledger.get_balance(user, AssetKind::Eth).await.unwrap(),
        Decimal::from(600)
    );

    let settlement = h.staking.close_stake(position.id).await.unwrap();
    assert_eq!(settlement.principal, Decimal::from(400));
    assert_eq!(settlement.rewards, Decimal::ZERO);
    assert_eq!(
        h.ledger.get_balance(user, AssetKind::Eth).await.unwrap(),
        Decimal::from(1000)
    );

    let txs = h.ledger.list_transactions(user, 10, 0).await.unwrap();
    let stakes = txs.iter().filter(|t| t.tx_type == TxType::Stake).count();
    let unstakes = txs.iter().filter(|t| t.tx_type == TxType::Unstake).count();
    assert_eq!((stakes, unstakes), (1, 1));
}

/// 1000 本金、1%/期：3 个整周期计 30，半周期计 0，补足后再计 10
#[tokio::test]
async fn accrual_counts_whole_periods_and_carries_remainder() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();
    h.fund(user, AssetKind::Eth, Decimal::from(1000)).await;

    let repo: &dyn StakingRepository = h.store.as_ref();
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let position = repo
        .open(
            OpenStake {
                user_id: user,
                asset: AssetKind::Eth,
                principal: Decimal::from(1000),
                rate_per_period: rate(),
                period_secs: PERIOD,
            },
            t0,
        )
        .await
        .unwrap();

    // 3 个整周期
    let after_three = repo
        .accrue(position.id, t0 + Duration::seconds(3 * PERIOD))
        .await
        .unwrap();
    assert_eq!(after_three.accumulated_rewards, Decimal::from(30));

    // 再过半个周期：无新增
    let after_half = repo
        .accrue(position.id, t0 + Duration::seconds(3 * PERIOD + PERIOD / 2))
        .await
        .unwrap();
    assert_eq!(after_half.accumulated_rewards, Decimal::from(30));

    // 补足剩余半个周期：新增 10
    let after_four = repo
        .accrue(position.id, t0 + Duration::seconds(4 * PERIOD))
        .await
        .unwrap();
    assert_eq!(after_four.accumulated_rewards, Decimal::from(40));
}

/// 零时间间隔的重复计息是幂等的
#[tokio::test]
async fn accrue_twice_at_same_instant_adds_zero() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();
    h.fund(user, AssetKind::Btc, Decimal::from(500)).await;

    let repo: &dyn StakingRepository = h.store.as_ref();
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let position = repo
        .open(
            OpenStake {
                user_id: user,
                asset: AssetKind::Btc,
                principal: Decimal::from(500),
                rate_per_period: rate(),
                period_secs: PERIOD,
            },
            t0,
        )
        .await
        .unwrap();

    let now = t0 + Duration::seconds(7 * PERIOD);
    let first = repo.accrue(position.id, now).await.unwrap();
    let second = repo.accrue(position.id, now).await.unwrap();

    assert_eq!(first.accumulated_rewards, Decimal::from(35));
    assert_eq!(second.accumulated_rewards, first.accumulated_rewards);
}

/// 关仓结算含最终计息：本金+收益一次性回到账本
#[tokio::test]
async fn close_settles_principal_plus_rewards() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();
    h.fund(user, AssetKind::Eth, Decimal::from(1000)).await;

    let repo: &dyn StakingRepository = h.store.as_ref();
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let position = repo
        .open(
            OpenStake {
                user_id: user,
                asset: AssetKind::Eth,
                principal: Decimal::from(1000),
                rate_per_period: rate(),
                period_secs: PERIOD,
            },
            t0,
        )
        .await
        .unwrap();

    let settlement = repo
        .close(position.id, t0 + Duration::seconds(4 * PERIOD))
        .await
        .unwrap();
    assert_eq!(settlement.principal, Decimal::from(1000));
    assert_eq!(settlement.rewards, Decimal::from(40));

    assert_eq!(
        h.ledger.get_balance(user, AssetKind::Eth).await.unwrap(),
        Decimal::from(1040)
    );

    let txs = h.ledger.list_transactions(user, 10, 0).await.unwrap();
    let reward_tx = txs.iter().find(|t| t.tx_type == TxType::Reward).unwrap();
    assert_eq!(reward_tx.amount, Decimal::from(40));
}

/// 并发关仓只有一方结算成功，另一方拿到 AlreadyClosed
#[tokio::test]
async fn concurrent_close_settles_exactly_once() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();
    h.fund(user, AssetKind::Eth, Decimal::from(800)).await;

    let position = h
        .staking
        .open_stake(user, AssetKind::Eth, Decimal::from(800))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        h.staking.close_stake(position.id),
        h.staking.close_stake(position.id)
    );

    let outcomes = [a, b];
    let ok = outcomes.iter().filter(|r| r.is_ok()).count();
    let already_closed = outcomes
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadyClosed(_))))
        .count();
    assert_eq!((ok, already_closed), (1, 1));

    // 本金只回来一次
    assert_eq!(
        h.ledger.get_balance(user, AssetKind::Eth).await.unwrap(),
        Decimal::from(800)
    );
}

/// 已关仓位再关：AlreadyClosed；不存在的仓位：NotFound
#[tokio::test]
async fn close_is_terminal_and_missing_is_not_found() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();
    h.fund(user, AssetKind::Sol, Decimal::from(50)).await;

    let position = h
        .staking
        .open_stake(user, AssetKind::Sol, Decimal::from(50))
        .await
        .unwrap();
    h.staking.close_stake(position.id).await.unwrap();

    let err = h.staking.close_stake(position.id).await.unwrap_err();
    assert_eq!(err.code(), "already_closed");

    let err = h.staking.close_stake(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

/// 持仓查询返回用户全部仓位，关仓后状态为 completed
#[tokio::test]
async fn positions_reflect_lifecycle() {
    let h = TestHarness::new();
    let user = Uuid::new_v4();
    h.fund(user, AssetKind::Eth, Decimal::from(300)).await;

    let p1 = h
        .staking
        .open_stake(user, AssetKind::Eth, Decimal::from(100))
        .await
        .unwrap();
    let _p2 = h
        .staking
        .open_stake(user, AssetKind::Eth, Decimal::from(100))
        .await
        .unwrap();

    h.staking.close_stake(p1.id).await.unwrap();

    let positions = h.staking.positions(user).await.unwrap();
    assert_eq!(positions.len(), 2);

    let closed = positions.iter().find(|p| p.id == p1.id).unwrap();
    assert_eq!(closed.status, PositionStatus::Completed);
    assert!(closed.ends_at.is_some());

    let active = positions.iter().filter(|p| p.status == PositionStatus::Active).count();
    assert_eq!(active, 1);
}
