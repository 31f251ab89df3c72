//! Interface boundary to the on-chain beacon contract's fixed attributes.

use crate::primitives::B256;

use async_trait::async_trait;

/// Error type for contract attribute reads.
#[derive(Debug, thiserror::Error)]
pub enum ContractReadError {
    #[error("call failed: {0}")]
    CallFailed(String),
    #[error("call canceled")]
    Canceled,
}

/// Capability trait over the beacon contract's read-only attributes, so the
/// reconciliation logic never depends on a concrete chain SDK.
#[async_trait]
pub trait BeaconReader: Send + Sync {
    /// Hash of the current VRF proving key.
    async fn proving_key_hash(&self) -> Result<B256, ContractReadError>;

    /// The beacon emits one output every this many blocks.
    async fn beacon_period_blocks(&self) -> Result<u16, ContractReadError>;

    /// Confirmation delays the contract accepts in requests.
    async fn confirmation_delays(&self) -> Result<Vec<u32>, ContractReadError>;

    /// Identifier of the DKG key the beacon currently operates under.
    async fn key_id(&self) -> Result<B256, ContractReadError>;
}
