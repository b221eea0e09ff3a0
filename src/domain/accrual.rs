//! 质押收益计息
//!
//! 严格按整周期计息：经过的不足一个周期的时间保留到下一次计算，
//! `last_reward_at` 只按整周期数推进，周期边界上既不少算也不重算。

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// 一次计息的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accrual {
    /// 本次结算的整周期数
    pub periods: i64,
    /// 本次新增收益 = principal × rate × periods
    pub reward: Decimal,
    /// 推进后的计息基准时刻（仅按整周期推进）
    pub advanced_to: DateTime<Utc>,
}

/// 计算自 `last_reward_at` 起到 `now` 为止的整周期收益
///
/// 零周期经过时返回零增量且不推进基准时刻，因此对同一时刻重复调用
/// 是幂等的。
pub fn accrue(
    principal: Decimal,
    rate_per_period: Decimal,
    period_secs: i64,
    last_reward_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Accrual {
    let elapsed_secs = (now - last_reward_at).num_seconds();
    if elapsed_secs <= 0 || period_secs <= 0 {
        return Accrual {
            periods: 0,
            reward: Decimal::ZERO,
            advanced_to: last_reward_at,
        };
    }

    let periods = elapsed_secs / period_secs;
    if periods == 0 {
        return Accrual {
            periods: 0,
            reward: Decimal::ZERO,
            advanced_to: last_reward_at,
        };
    }

    let reward = principal * rate_per_period * Decimal::from(periods);
    let advanced_to = last_reward_at + Duration::seconds(periods * period_secs);

    Accrual {
        periods,
        reward,
        advanced_to,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PERIOD: i64 = 86400;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn rate() -> Decimal {
        Decimal::new(1, 2) // 0.01
    }

    #[test]
    fn three_whole_periods() {
        let principal = Decimal::from(1000);
        let now = t0() + Duration::seconds(3 * PERIOD);

        let result = accrue(principal, rate(), PERIOD, t0(), now);
        assert_eq!(result.periods, 3);
        assert_eq!(result.reward, Decimal::from(30));
        assert_eq!(result.advanced_to, now);
    }

    #[test]
    fn fractional_period_carries_forward() {
        let principal = Decimal::from(1000);
        let start = t0();

        // 3 个整周期
        let first = accrue(principal, rate(), PERIOD, start, start + Duration::seconds(3 * PERIOD));
        assert_eq!(first.reward, Decimal::from(30));

        // 再过半个周期：无新增，基准时刻不动
        let half = accrue(
            principal,
            rate(),
            PERIOD,
            first.advanced_to,
            start + Duration::seconds(3 * PERIOD + PERIOD / 2),
        );
        assert_eq!(half.periods, 0);
        assert_eq!(half.reward, Decimal::ZERO);
        assert_eq!(half.advanced_to, first.advanced_to);

        // 补足剩余半个周期：恰好一个整周期，新增 10
        let full = accrue(
            principal,
            rate(),
            PERIOD,
            half.advanced_to,
            start + Duration::seconds(4 * PERIOD),
        );
        assert_eq!(full.periods, 1);
        assert_eq!(full.reward, Decimal::from(10));
    }

    #[test]
    fn zero_elapsed_is_idempotent() {
        let principal = Decimal::from(500);
        let now = t0() + Duration::seconds(7 * PERIOD);

        let first = accrue(principal, rate(), PERIOD, t0(), now);
        let again = accrue(principal, rate(), PERIOD, first.advanced_to, now);
        assert_eq!(again.periods, 0);
        assert_eq!(again.reward, Decimal::ZERO);
    }

    #[test]
    fn negative_elapsed_yields_nothing() {
        let result = accrue(
            Decimal::from(100),
            rate(),
            PERIOD,
            t0(),
            t0() - Duration::seconds(10),
        );
        assert_eq!(result.periods, 0);
        assert_eq!(result.reward, Decimal::ZERO);
        assert_eq!(result.advanced_to, t0());
    }

    #[test]
    fn no_drift_across_many_small_steps() {
        // 多次小步计息与一次性计息结果一致
        let principal = Decimal::from(1000);
        let mut cursor = t0();
        let mut total = Decimal::ZERO;

        for step in 1..=40 {
            let now = t0() + Duration::seconds(step * PERIOD * 3 / 4);
            let result = accrue(principal, rate(), PERIOD, cursor, now);
            cursor = result.advanced_to;
            total += result.reward;
        }

        let whole = accrue(
            principal,
            rate(),
            PERIOD,
            t0(),
            t0() + Duration::seconds(40 * PERIOD * 3 / 4),
        );
        assert_eq!(total, whole.reward);
    }
}
