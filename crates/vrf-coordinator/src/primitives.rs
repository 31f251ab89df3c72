pub use alloy_primitives::{
    Address,
    B256,
    Bytes,
    FixedBytes,
    U256,
    keccak256,
};

use serde::{
    Deserialize,
    Serialize,
};

/// Identity of a distinct beacon output slot.
///
/// Two requests for the same beacon height with different confirmation
/// delays are served by different outputs, so the delay is part of the
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub block_number: u64,
    pub conf_delay: u32,
}

/// Identity of a distinct callback fulfillment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackId {
    pub block_number: u64,
    pub request_id: u64,
}

/// A beacon block that needs a VRF proof in the next report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportableBlock {
    /// Hash of the block at `height`, as known to the log poller.
    pub hash: B256,
    pub height: u64,
    pub confirmation_delay: u32,
}

/// A callback fulfillment obligation that is eligible for service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostedCallbackRequest {
    pub beacon_height: u64,
    pub confirmation_delay: u32,
    pub subscription_id: u64,
    /// Always zero: subscription-balance accounting happens upstream.
    pub price: U256,
    pub request_id: u64,
    pub num_words: u16,
    pub requester: Address,
    pub arguments: Bytes,
    pub gas_allowance: U256,
    /// Block in which the request event was emitted.
    pub request_height: u64,
    pub request_block_hash: B256,
}

/// The signer/transmitter set authorized for a contract, as of its most
/// recent configuration event. `signers[i]` pairs with `transmitters[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrCommittee {
    pub signers: Vec<Address>,
    pub transmitters: Vec<Address>,
}

/// A report accepted into the transmission pipeline.
#[derive(Debug, Clone, Default)]
pub struct VrfReport {
    pub outputs: Vec<ReportOutput>,
}

/// One beacon output covered by a report, with the callbacks it serves.
///
/// An empty `vrf_proof` means the output is already on-chain and needs no
/// transmission tracking.
#[derive(Debug, Clone, Default)]
pub struct ReportOutput {
    pub block_height: u64,
    pub confirmation_delay: u32,
    pub vrf_proof: Bytes,
    pub callbacks: Vec<CostedCallbackRequest>,
}
