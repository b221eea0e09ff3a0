//! 入账通知
//!
//! 尽力而为的事件推送：入账提交之后发出，失败只记日志，
//! 永远不会回滚已提交的入账。

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::asset::AssetKind;

/// 存款确认事件
#[derive(Debug, Clone, Serialize)]
pub struct DepositEvent {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub asset: AssetKind,
    pub amount: Decimal,
    pub address: String,
}

/// 通知出口抽象
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deposit_confirmed(&self, event: &DepositEvent) -> Result<()>;
}

/// 结构化日志通知，webhook 未配置时的默认出口
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deposit_confirmed(&self, event: &DepositEvent) -> Result<()> {
        tracing::info!(
            transaction_id = %event.transaction_id,
            user_id = %event.user_id,
            asset = %event.asset,
            amount = %event.amount,
            address = %event.address,
            "Deposit confirmed"
        );
        Ok(())
    }
}

/// Webhook 通知出口
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deposit_confirmed(&self, event: &DepositEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to deliver deposit webhook to {}", self.url))?;

        if !response.status().is_success() {
            anyhow::bail!("deposit webhook returned HTTP {}", response.status());
        }

        Ok(())
    }
}
