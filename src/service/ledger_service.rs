//! 内部账本查询服务
//!
//! 余额与交易历史的协作方只读入口；所有余额变更都走存储层的
//! 原子操作，在各自的业务服务里发生。

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    domain::asset::AssetKind,
    error::Result,
    repository::{LedgerRepository, LedgerTransaction},
};

/// 单页交易数上限
const MAX_PAGE_SIZE: i64 = 100;

pub struct LedgerService {
    ledger: Arc<dyn LedgerRepository>,
}

impl LedgerService {
    pub fn new(ledger: Arc<dyn LedgerRepository>) -> Self {
        Self { ledger }
    }

    /// 当前余额，无记录视为零
    pub async fn get_balance(&self, user_id: Uuid, asset: AssetKind) -> Result<Decimal> {
        Ok(self.ledger.get_balance(user_id, asset).await?)
    }

    /// 交易历史分页，新的在前
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = offset.max(0);
        Ok(self.ledger.list_transactions(user_id, limit, offset).await?)
    }
}
