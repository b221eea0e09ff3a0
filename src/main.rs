//! VaultCore 主入口
//!
//! 装配配置、数据库与业务服务，启动对账与计息两个后台循环，
//! 等待退出信号后优雅停机

use std::sync::Arc;

use anyhow::Result;
use vaultcore::{
    app_state::AppState,
    config::Config,
    infrastructure::{db, encryption::EnvSecretProvider, logging},
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量与配置
    dotenvy::dotenv().ok();

    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Arc::new(Config::from_env_and_file(config_path.as_deref())?);
    config.validate()?;

    // 2. 初始化日志
    logging::init_logging(&config.logging);
    tracing::info!("Starting VaultCore reconciliation engine");

    // 3. 连接数据库并建表
    let pool = db::init_pool(&config.database).await?;
    tracing::info!("Database connected");
    db::run_migrations(&pool).await?;

    // 4. 装配应用状态
    let state = AppState::new(pool, config.clone(), &EnvSecretProvider).await?;

    // 5. 启动后台循环
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let reconciler = state.reconciler.clone();
    let reconciler_handle = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { reconciler.run(rx).await })
    };

    let staking = state.staking_service.clone();
    let accrual_handle = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { staking.run_accrual_loop(rx).await })
    };

    // 6. 等待退出信号，在途的地址处理会完成后再退出
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(reconciler_handle, accrual_handle);

    tracing::info!("VaultCore stopped");
    Ok(())
}
