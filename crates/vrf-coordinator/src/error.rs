use crate::{
    cache::CacheKeyError,
    contract::ContractReadError,
    log_poller::LogPollerError,
};

use thiserror::Error;

/// Errors surfaced by the coordinator's public operations.
///
/// Every variant aborts the surrounding call with no cache mutation; the
/// driving consensus loop decides whether to retry on the next round.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("log poller query failed")]
    LogPoller(#[source] LogPollerError),
    #[error("contract read failed")]
    ContractRead(#[source] ContractReadError),
    #[error("failed to decode {event} log")]
    LogDecode {
        event: &'static str,
        #[source]
        source: alloy_sol_types::Error,
    },
    #[error("could not find all requested heads: want {want} got {got}")]
    MissingHeads { want: usize, got: usize },
    #[error("no block hash known for requested height {height}")]
    MissingBlockHash { height: u64 },
    #[error("block is already in flight: height {height}, confirmation delay {conf_delay}")]
    BlockInFlight { height: u64, conf_delay: u32 },
    #[error("callback is already in flight: height {height}, request id {request_id}")]
    CallbackInFlight { height: u64, request_id: u64 },
    #[error("cache key derivation failed")]
    CacheKey(#[from] CacheKeyError),
}
