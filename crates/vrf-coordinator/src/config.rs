use crate::primitives::Address;

/// Contains the configuration for the coordinator.
///
/// One configuration corresponds to exactly one beacon/DKG contract pair.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address of the VRF beacon coordinator contract.
    pub beacon_address: Address,
    /// Address of the DKG contract.
    pub dkg_address: Address,
    /// How many blocks behind the chain head `report_blocks` scans for
    /// request and fulfillment events.
    pub lookback_blocks: u64,
    /// Depth beyond which a block is treated as irreversible.
    pub finality_depth: u32,
}

impl CoordinatorConfig {
    pub fn new(beacon_address: Address, dkg_address: Address) -> Self {
        CoordinatorConfig {
            beacon_address,
            dkg_address,
            lookback_blocks: 1_000,
            finality_depth: 50,
        }
    }

    /// Set the log scan lookback window.
    pub fn with_lookback_blocks(mut self, lookback_blocks: u64) -> Self {
        self.lookback_blocks = lookback_blocks;
        self
    }

    /// Set the chain finality depth.
    pub fn with_finality_depth(mut self, finality_depth: u32) -> Self {
        self.finality_depth = finality_depth;
        self
    }

    /// Height window after which a tracked block/callback stops counting as
    /// in-flight. A transmission that has not confirmed within twice the
    /// finality depth is stuck, and holding its cache entry longer would
    /// only leak memory.
    pub fn eviction_window(&self) -> u64 {
        u64::from(self.finality_depth) * 2
    }
}
