//! Domain 模块
//!
//! 资产注册表、确定性派生与计息规则

pub mod accrual;
pub mod asset;
pub mod derivation;

// 重新导出常用类型
pub use accrual::{accrue, Accrual};
pub use asset::{registry, AssetConfig, AssetKind, AssetRegistry, CurveType, DerivationNamespace};
pub use derivation::{derive, seed_from_mnemonic, DerivationStrategy, DerivedKey};
