//! Interface boundary to the log-polling subsystem.
//!
//! The coordinator never talks to a chain client directly; it consumes an
//! implementation of [`LogPoller`] that follows the chain, matches the
//! registered topics, and answers block-hash queries. Implementations may
//! wrap an indexer, a node RPC connection, or a test double.

use crate::primitives::{
    Address,
    B256,
    Bytes,
};

use async_trait::async_trait;

/// A raw matched log row as stored by the poller, before ABI decoding.
#[derive(Debug, Clone)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// A `(height, hash)` pair answered by a block query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    pub block_number: u64,
    pub block_hash: B256,
}

/// Error type for log poller queries.
///
/// Cancellation of the caller-supplied deadline surfaces as `Canceled`; the
/// coordinator propagates it untouched without mutating any cache state.
#[derive(Debug, thiserror::Error)]
pub enum LogPollerError {
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("query canceled")]
    Canceled,
    #[error("no matching log found")]
    NoSuchLog,
}

/// Capability trait over the log-polling collaborator.
#[async_trait]
pub trait LogPoller: Send + Sync {
    /// Register interest in a set of topics for a set of addresses.
    /// Registrations are merged with existing ones and survive restarts, so
    /// calling this again with the same arguments is a no-op.
    async fn merge_filter(
        &self,
        topics: Vec<B256>,
        addresses: Vec<Address>,
    ) -> Result<(), LogPollerError>;

    /// The latest block height the poller has observed.
    async fn latest_block(&self) -> Result<u64, LogPollerError>;

    /// All logs for the given topics and address in `[from_block, to_block]`,
    /// ordered by block number then log index.
    async fn logs_with_sigs(
        &self,
        from_block: u64,
        to_block: u64,
        topics: Vec<B256>,
        address: Address,
    ) -> Result<Vec<Log>, LogPollerError>;

    /// Logs for `event_sig` at `address` whose topic at `topic_index`
    /// (0 is the event signature) matches one of `values`, with at least
    /// `confirmations` blocks on top.
    async fn indexed_logs(
        &self,
        event_sig: B256,
        address: Address,
        topic_index: usize,
        values: Vec<B256>,
        confirmations: u32,
    ) -> Result<Vec<Log>, LogPollerError>;

    /// Hashes for the requested heights. Implementations return one entry
    /// per height they know; the caller treats a shortfall as fatal.
    async fn get_blocks(&self, block_numbers: Vec<u64>) -> Result<Vec<BlockMeta>, LogPollerError>;

    /// The most recent log for `event_sig` at `address` with at least
    /// `confirmations` blocks on top.
    async fn latest_log_by_event_sig_with_confs(
        &self,
        event_sig: B256,
        address: Address,
        confirmations: u32,
    ) -> Result<Log, LogPollerError>;
}
