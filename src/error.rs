//! 核心错误类型
//!
//! 业务规则错误（余额不足、仓位已关闭）以类型化结果同步返回给调用方；
//! 外部数据源错误在下一个对账周期重试，不向上传播为存款事件。

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::asset::AssetKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 派生参数或资产配置错误，属于编程错误，不重试
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 所有余额数据源在本周期均失败，调用方视为"本周期无观测"
    #[error("all balance sources failed for {asset}: {detail}")]
    ProviderUnavailable { asset: AssetKind, detail: String },

    /// 余额不足，扣减被拒绝（不会将余额钳制为零）
    #[error("insufficient funds: user {user_id} {asset} has {available}, requested {requested}")]
    InsufficientFunds {
        user_id: Uuid,
        asset: AssetKind,
        available: Decimal,
        requested: Decimal,
    },

    /// 去重键已处理过，静默跳过
    #[error("duplicate event: {dedup_key}")]
    DuplicateEvent { dedup_key: String },

    /// 质押仓位并发关闭的失败方，作为无副作用的拒绝返回
    #[error("staking position {0} already closed")]
    AlreadyClosed(Uuid),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// 稳定的错误码，供外部协作层（API等）映射使用
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration_error",
            Error::ProviderUnavailable { .. } => "provider_unavailable",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::DuplicateEvent { .. } => "duplicate_event",
            Error::AlreadyClosed(_) => "already_closed",
            Error::NotFound(_) => "not_found",
            Error::Storage(_) => "storage_error",
            Error::Other(_) => "internal",
        }
    }

    /// 是否可在下一个调度周期重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderUnavailable { .. } | Error::Storage(_) | Error::Other(_)
        )
    }
}
