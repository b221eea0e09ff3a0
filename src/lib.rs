//! VaultCore - 托管式多资产余额平台的钱包供给与存款对账引擎
//!
//! 确定性地址派生、无碰撞的地址分配账本、幂等的链上存款入账，
//! 以及按整周期计息的质押子账本

pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod repository;
pub mod service;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{Error, Result};

// 统一模块导出
pub mod prelude {
    pub use crate::{
        app_state::AppState,
        config::Config,
        domain::asset::AssetKind,
        error::{Error, Result},
    };
}
