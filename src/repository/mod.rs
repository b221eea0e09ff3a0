pub mod allocation_repository;
pub mod ledger_repository;
pub mod memory;
pub mod staking_repository;

pub use allocation_repository::{
    AllocationRepository, NewAllocation, PgAllocationRepository, WalletAllocation,
};
pub use ledger_repository::{
    DepositCredit, LedgerRepository, LedgerTransaction, PgLedgerRepository, TxStatus, TxType,
};
pub use memory::MemoryStore;
pub use staking_repository::{
    OpenStake, PgStakingRepository, PositionStatus, StakeSettlement, StakingPosition,
    StakingRepository,
};
