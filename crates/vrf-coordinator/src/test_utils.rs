//! Shared fixtures and collaborator doubles for coordinator tests.

use crate::{
    contract::{
        BeaconReader,
        ContractReadError,
    },
    events::{
        Callback,
        ConfigSet,
        NewTransmission,
        OutputServed,
        RandomWordsFulfilled,
        RandomnessFulfillmentRequested,
        RandomnessRequested,
    },
    log_poller::{
        BlockMeta,
        Log,
        LogPoller,
        LogPollerError,
    },
    primitives::{
        Address,
        B256,
        Bytes,
        U256,
    },
};

use alloy_primitives::aliases::{
    U24,
    U40,
    U96,
    U192,
};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

/// Wraps an encoded event into a raw poller row at the given block, with a
/// random block hash.
pub fn log_from_event<E: SolEvent>(event: &E, address: Address, block_number: u64) -> Log {
    let data = event.encode_log_data();
    Log {
        address,
        topics: data.topics().to_vec(),
        data: data.data.clone(),
        block_number,
        block_hash: B256::random(),
        tx_hash: B256::random(),
        log_index: 0,
    }
}

pub fn randomness_requested(next_output_height: u64, conf_delay: u32) -> RandomnessRequested {
    RandomnessRequested {
        nextBeaconOutputHeight: next_output_height,
        confDelay: U24::from(conf_delay),
    }
}

pub fn fulfillment_requested(
    next_output_height: u64,
    conf_delay: u32,
    request_id: u64,
    subscription_id: u64,
) -> RandomnessFulfillmentRequested {
    RandomnessFulfillmentRequested {
        nextBeaconOutputHeight: next_output_height,
        confDelay: U24::from(conf_delay),
        subID: subscription_id,
        callback: Callback {
            requestID: U256::from(request_id),
            numWords: 1,
            requester: Address::random(),
            arguments: Bytes::new(),
            gasAllowance: U96::from(100_000u64),
        },
    }
}

pub fn random_words_fulfilled(outcomes: &[(u64, bool)]) -> RandomWordsFulfilled {
    RandomWordsFulfilled {
        requestIDs: outcomes.iter().map(|(id, _)| U256::from(*id)).collect(),
        successfulFulfillment: outcomes
            .iter()
            .map(|(_, success)| u8::from(*success))
            .collect::<Vec<u8>>()
            .into(),
        truncatedErrorData: outcomes.iter().map(|_| Bytes::new()).collect(),
    }
}

pub fn new_transmission(outputs: &[(u64, u32)], epoch: u32, round: u8) -> NewTransmission {
    NewTransmission {
        aggregatorRoundId: 1,
        epochAndRound: U40::from((u64::from(epoch) << 8) | u64::from(round)),
        transmitter: Address::random(),
        juelsPerFeeCoin: U192::ZERO,
        configDigest: B256::ZERO,
        outputsServed: outputs
            .iter()
            .map(|(height, conf_delay)| OutputServed {
                height: *height,
                confirmationDelay: U24::from(*conf_delay),
                proofG1X: U256::ZERO,
                proofG1Y: U256::ZERO,
            })
            .collect(),
    }
}

pub fn config_set(signers: &[Address], transmitters: &[Address]) -> ConfigSet {
    ConfigSet {
        previousConfigBlockNumber: 0,
        configDigest: B256::ZERO,
        configCount: 1,
        signers: signers.to_vec(),
        transmitters: transmitters.to_vec(),
        f: 1,
        onchainConfig: Bytes::new(),
        offchainConfigVersion: 1,
        offchainConfig: Bytes::new(),
    }
}

#[derive(Default)]
struct PollerState {
    latest_block: u64,
    logs: Vec<Log>,
    block_hashes: HashMap<u64, B256>,
    latest_by_sig: HashMap<(B256, Address), Log>,
    registered_filters: Vec<(Vec<B256>, Vec<Address>)>,
    fail_queries: bool,
}

/// In-memory [`LogPoller`] fed by hand: tests push logs and block hashes,
/// then point the chain head wherever the scenario needs it.
#[derive(Clone, Default)]
pub struct StaticLogPoller {
    inner: Arc<Mutex<PollerState>>,
}

impl StaticLogPoller {
    pub fn set_latest_block(&self, height: u64) {
        self.inner.lock().unwrap().latest_block = height;
    }

    pub fn push_log(&self, log: Log) {
        self.inner.lock().unwrap().logs.push(log);
    }

    pub fn insert_block(&self, height: u64, hash: B256) {
        self.inner.lock().unwrap().block_hashes.insert(height, hash);
    }

    pub fn set_latest_log(&self, event_sig: B256, address: Address, log: Log) {
        self.inner
            .lock()
            .unwrap()
            .latest_by_sig
            .insert((event_sig, address), log);
    }

    /// Makes every subsequent query fail, simulating an unreachable or
    /// canceled poller.
    pub fn fail_queries(&self, fail: bool) {
        self.inner.lock().unwrap().fail_queries = fail;
    }

    pub fn registered_filters(&self) -> usize {
        self.inner.lock().unwrap().registered_filters.len()
    }
}

#[async_trait]
impl LogPoller for StaticLogPoller {
    async fn merge_filter(
        &self,
        topics: Vec<B256>,
        addresses: Vec<Address>,
    ) -> Result<(), LogPollerError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_queries {
            return Err(LogPollerError::QueryFailed("injected failure".into()));
        }
        state.registered_filters.push((topics, addresses));
        Ok(())
    }

    async fn latest_block(&self) -> Result<u64, LogPollerError> {
        let state = self.inner.lock().unwrap();
        if state.fail_queries {
            return Err(LogPollerError::QueryFailed("injected failure".into()));
        }
        Ok(state.latest_block)
    }

    async fn logs_with_sigs(
        &self,
        from_block: u64,
        to_block: u64,
        topics: Vec<B256>,
        address: Address,
    ) -> Result<Vec<Log>, LogPollerError> {
        let state = self.inner.lock().unwrap();
        if state.fail_queries {
            return Err(LogPollerError::QueryFailed("injected failure".into()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|lg| {
                lg.address == address
                    && (from_block..=to_block).contains(&lg.block_number)
                    && lg.topics.first().is_some_and(|sig| topics.contains(sig))
            })
            .cloned()
            .collect())
    }

    async fn indexed_logs(
        &self,
        event_sig: B256,
        address: Address,
        topic_index: usize,
        values: Vec<B256>,
        _confirmations: u32,
    ) -> Result<Vec<Log>, LogPollerError> {
        let state = self.inner.lock().unwrap();
        if state.fail_queries {
            return Err(LogPollerError::QueryFailed("injected failure".into()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|lg| {
                lg.address == address
                    && lg.topics.first() == Some(&event_sig)
                    && lg
                        .topics
                        .get(topic_index)
                        .is_some_and(|topic| values.contains(topic))
            })
            .cloned()
            .collect())
    }

    async fn get_blocks(&self, block_numbers: Vec<u64>) -> Result<Vec<BlockMeta>, LogPollerError> {
        let state = self.inner.lock().unwrap();
        if state.fail_queries {
            return Err(LogPollerError::QueryFailed("injected failure".into()));
        }
        Ok(block_numbers
            .into_iter()
            .filter_map(|block_number| {
                state.block_hashes.get(&block_number).map(|hash| BlockMeta {
                    block_number,
                    block_hash: *hash,
                })
            })
            .collect())
    }

    async fn latest_log_by_event_sig_with_confs(
        &self,
        event_sig: B256,
        address: Address,
        _confirmations: u32,
    ) -> Result<Log, LogPollerError> {
        let state = self.inner.lock().unwrap();
        if state.fail_queries {
            return Err(LogPollerError::QueryFailed("injected failure".into()));
        }
        state
            .latest_by_sig
            .get(&(event_sig, address))
            .cloned()
            .ok_or(LogPollerError::NoSuchLog)
    }
}

/// [`BeaconReader`] answering fixed values.
#[derive(Debug, Clone)]
pub struct StaticBeaconReader {
    pub proving_key_hash: B256,
    pub beacon_period: u16,
    pub confirmation_delays: Vec<u32>,
    pub key_id: B256,
}

impl Default for StaticBeaconReader {
    fn default() -> Self {
        StaticBeaconReader {
            proving_key_hash: B256::ZERO,
            beacon_period: 3,
            confirmation_delays: vec![0, 1, 3, 8],
            key_id: B256::ZERO,
        }
    }
}

#[async_trait]
impl BeaconReader for StaticBeaconReader {
    async fn proving_key_hash(&self) -> Result<B256, ContractReadError> {
        Ok(self.proving_key_hash)
    }

    async fn beacon_period_blocks(&self) -> Result<u16, ContractReadError> {
        Ok(self.beacon_period)
    }

    async fn confirmation_delays(&self) -> Result<Vec<u32>, ContractReadError> {
        Ok(self.confirmation_delays.clone())
    }

    async fn key_id(&self) -> Result<B256, ContractReadError> {
        Ok(self.key_id)
    }
}
