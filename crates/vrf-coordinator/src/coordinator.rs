//! Reconciles the on-chain event log with local transmission state to
//! produce the blocks and callbacks that belong in the next report, and
//! tracks what has already been handed to the transmission pipeline so it
//! is not offered twice.
//!
//! The read path (`report_blocks`) and the write path
//! (`report_will_be_transmitted`) share two dedup caches behind a single
//! mutex: an eligibility decision must be atomic with respect to
//! insertions, or the same block could be claimed by two concurrent
//! reports. Cache writes only ever happen after every collaborator query
//! has completed, so a failed call leaves no partial state behind.

use crate::{
    CoordinatorError,
    cache::{
        TransmissionCache,
        cache_key,
    },
    config::CoordinatorConfig,
    contract::BeaconReader,
    events::{
        ClassifiedLogs,
        ConfigSet,
        DecodedLog,
        NewTransmission,
        RandomWordsFulfilled,
        RandomnessFulfillmentRequested,
        RandomnessRequested,
        Topics,
        classify_logs,
    },
    log_poller::LogPoller,
    primitives::{
        B256,
        BlockId,
        CallbackId,
        CostedCallbackRequest,
        OcrCommittee,
        ReportableBlock,
        U256,
        VrfReport,
    },
};

use alloy_sol_types::SolEvent;

use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::{
        Mutex,
        PoisonError,
    },
};

use tracing::{
    debug,
    error,
    info,
};

/// Both caches live under one lock: the in-flight check on the read path
/// and the insertion on the write path must observe the same state.
struct TransmissionCaches {
    blocks: TransmissionCache<BlockId>,
    callbacks: TransmissionCache<CallbackId>,
}

/// Off-chain coordinator for one VRF-beacon/DKG contract pair.
pub struct VrfCoordinator<P, C> {
    lp: P,
    beacon: C,
    config: CoordinatorConfig,
    topics: Topics,
    caches: Mutex<TransmissionCaches>,
}

impl<P: LogPoller, C: BeaconReader> VrfCoordinator<P, C> {
    /// Creates a coordinator and registers its event filters with the log
    /// poller so the poller picks up the logs the coordinator will query.
    ///
    /// # Errors
    ///
    /// Returns an error if filter registration fails.
    pub async fn new(
        config: CoordinatorConfig,
        log_poller: P,
        beacon: C,
    ) -> Result<Self, CoordinatorError> {
        let topics = Topics::new();

        log_poller
            .merge_filter(
                topics.all().to_vec(),
                vec![config.beacon_address, config.dkg_address],
            )
            .await
            .map_err(CoordinatorError::LogPoller)?;

        info!(
            target: "vrf-coordinator",
            beacon_address = ?config.beacon_address,
            dkg_address = ?config.dkg_address,
            eviction_window = config.eviction_window(),
            "registered event filters"
        );

        let eviction_window = config.eviction_window();
        Ok(VrfCoordinator {
            lp: log_poller,
            beacon,
            config,
            topics,
            caches: Mutex::new(TransmissionCaches {
                blocks: TransmissionCache::new(eviction_window),
                callbacks: TransmissionCache::new(eviction_window),
            }),
        })
    }

    /// Returns whether a transmission for the given OCR epoch and round is
    /// already present on-chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the log poller query fails.
    pub async fn report_is_onchain(
        &self,
        epoch: u32,
        round: u8,
    ) -> Result<bool, CoordinatorError> {
        // The packed epoch/round is not a hash, but it is topic-sized once
        // left-padded to 32 bytes, which lets us use it as a topic filter.
        let enr_topic = epoch_and_round_topic(epoch, round);

        debug!(
            target: "vrf-coordinator::report",
            epoch,
            round,
            topic = %enr_topic,
            "checking for existing transmission"
        );

        let logs = self
            .lp
            .indexed_logs(
                self.topics.new_transmission,
                self.config.beacon_address,
                2,
                vec![enr_topic],
                1,
            )
            .await
            .map_err(CoordinatorError::LogPoller)?;

        Ok(!logs.is_empty())
    }

    /// Returns the beacon blocks that need a VRF proof in the next report
    /// and the callback requests that should be served alongside them.
    ///
    /// Repeated calls return the same items until
    /// [`report_will_be_transmitted`](Self::report_will_be_transmitted)
    /// records them, so a failed transmission attempt can simply be
    /// retried on the next round.
    ///
    /// # Errors
    ///
    /// Returns an error if a log poller query fails, a recognized log fails
    /// to decode, or a block hash is missing for a requested height. No
    /// cache state changes on any path of this call.
    pub async fn report_blocks(
        &self,
        confirmation_delays: &HashSet<u32>,
    ) -> Result<(Vec<ReportableBlock>, Vec<CostedCallbackRequest>), CoordinatorError> {
        let current_height = self
            .lp
            .latest_block()
            .await
            .map_err(CoordinatorError::LogPoller)?;

        debug!(target: "vrf-coordinator::report", current_height, "observed chain height");

        let from_block = current_height.saturating_sub(self.config.lookback_blocks);
        let logs = self
            .lp
            .logs_with_sigs(
                from_block,
                current_height,
                self.topics.report_topics().to_vec(),
                self.config.beacon_address,
            )
            .await
            .map_err(CoordinatorError::LogPoller)?;

        let classified = classify_logs(&logs)?;

        debug!(
            target: "vrf-coordinator::report",
            randomness_requests = classified.randomness_requests.len(),
            fulfillment_requests = classified.fulfillment_requests.len(),
            fulfillments = classified.fulfillments.len(),
            transmissions = classified.transmissions.len(),
            "classified report logs"
        );

        // Hashes for every height a request refers to, fetched before any
        // filtering so the emitted blocks carry concrete hashes.
        let blockhashes = self
            .requested_block_hashes(&classified, current_height)
            .await?;

        let mut blocks_requested: HashSet<BlockId> = HashSet::new();
        for id in self.filter_eligible_randomness_requests(
            &classified.randomness_requests,
            confirmation_delays,
            current_height,
        )? {
            blocks_requested.insert(id);
        }

        let (callbacks_requested, unfulfilled) = self.filter_eligible_callbacks(
            &classified.fulfillment_requests,
            confirmation_delays,
            current_height,
        )?;
        for id in unfulfilled {
            blocks_requested.insert(id);
        }

        // A block served by an on-chain transmission must not be offered
        // again, even if the local cache never saw it or already evicted
        // it.
        for fulfilled in fulfilled_blocks(&classified.transmissions) {
            blocks_requested.remove(&fulfilled);
        }

        let mut blocks = Vec::with_capacity(blocks_requested.len());
        for id in blocks_requested {
            let hash = blockhashes
                .get(&id.block_number)
                .copied()
                .ok_or(CoordinatorError::MissingBlockHash {
                    height: id.block_number,
                })?;
            blocks.push(ReportableBlock {
                hash,
                height: id.block_number,
                confirmation_delay: id.conf_delay,
            });
        }

        let fulfilled_ids = fulfilled_request_ids(&classified.fulfillments);
        let callbacks = self.filter_unfulfilled_callbacks(
            &callbacks_requested,
            &fulfilled_ids,
            confirmation_delays,
            current_height,
        );

        debug!(
            target: "vrf-coordinator::report",
            blocks = blocks.len(),
            callbacks = callbacks.len(),
            "assembled report contents"
        );

        Ok((blocks, callbacks))
    }

    /// Records that a report has been accepted for transmission, so none of
    /// its blocks or callbacks are offered again while still in flight.
    ///
    /// Every key is checked against the caches before anything is
    /// inserted; a conflict fails the whole call and leaves both caches
    /// untouched. Outputs with an empty proof are already on-chain and are
    /// not tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if any covered block or callback is already in
    /// flight, or if the latest chain height cannot be read. The caller is
    /// expected to abandon transmission of the report in that case.
    pub async fn report_will_be_transmitted(
        &self,
        report: &VrfReport,
    ) -> Result<(), CoordinatorError> {
        let latest_height = self
            .lp
            .latest_block()
            .await
            .map_err(CoordinatorError::LogPoller)?;

        let mut blocks_requested = Vec::new();
        let mut callbacks_requested = Vec::new();
        for output in &report.outputs {
            if !output.vrf_proof.is_empty() {
                let id = BlockId {
                    block_number: output.block_height,
                    conf_delay: output.confirmation_delay,
                };
                blocks_requested.push((id, cache_key(&id)?));
            }

            for cb in &output.callbacks {
                let id = CallbackId {
                    block_number: cb.beacon_height,
                    request_id: cb.request_id,
                };
                callbacks_requested.push((id, cache_key(&id)?));
            }
        }

        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);

        for (id, key) in &blocks_requested {
            if caches.blocks.get(key).is_some() {
                return Err(CoordinatorError::BlockInFlight {
                    height: id.block_number,
                    conf_delay: id.conf_delay,
                });
            }
        }
        for (id, key) in &callbacks_requested {
            if caches.callbacks.get(key).is_some() {
                return Err(CoordinatorError::CallbackInFlight {
                    height: id.block_number,
                    request_id: id.request_id,
                });
            }
        }

        info!(
            target: "vrf-coordinator::transmit",
            blocks = blocks_requested.len(),
            callbacks = callbacks_requested.len(),
            latest_height,
            "tracking report accepted for transmission"
        );

        for (id, key) in blocks_requested {
            caches.blocks.add(id, key, latest_height);
        }
        for (id, key) in callbacks_requested {
            caches.callbacks.add(id, key, latest_height);
        }

        caches.blocks.evict_expired(latest_height);
        caches.callbacks.evict_expired(latest_height);

        Ok(())
    }

    /// Returns the DKG and VRF committees from the most recent sufficiently
    /// confirmed `ConfigSet` event of each contract.
    ///
    /// # Errors
    ///
    /// Returns an error if either log cannot be fetched or decoded.
    pub async fn dkg_vrf_committees(
        &self,
    ) -> Result<(OcrCommittee, OcrCommittee), CoordinatorError> {
        let latest_vrf = self
            .lp
            .latest_log_by_event_sig_with_confs(
                self.topics.config_set,
                self.config.beacon_address,
                self.config.finality_depth,
            )
            .await
            .map_err(CoordinatorError::LogPoller)?;

        let latest_dkg = self
            .lp
            .latest_log_by_event_sig_with_confs(
                self.topics.config_set,
                self.config.dkg_address,
                self.config.finality_depth,
            )
            .await
            .map_err(CoordinatorError::LogPoller)?;

        let vrf_config =
            ConfigSet::decode_raw_log(latest_vrf.topics.iter().copied(), &latest_vrf.data)
                .map_err(|source| CoordinatorError::LogDecode {
                    event: "ConfigSet",
                    source,
                })?;
        let dkg_config =
            ConfigSet::decode_raw_log(latest_dkg.topics.iter().copied(), &latest_dkg.data)
                .map_err(|source| CoordinatorError::LogDecode {
                    event: "ConfigSet",
                    source,
                })?;

        Ok((committee_from(&dkg_config), committee_from(&vrf_config)))
    }

    /// Hash of the VRF proving key the beacon currently operates with.
    ///
    /// # Errors
    ///
    /// Returns an error if the contract read fails.
    pub async fn proving_key_hash(&self) -> Result<B256, CoordinatorError> {
        self.beacon
            .proving_key_hash()
            .await
            .map_err(CoordinatorError::ContractRead)
    }

    /// The beacon's output period in blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the contract read fails.
    pub async fn beacon_period(&self) -> Result<u16, CoordinatorError> {
        self.beacon
            .beacon_period_blocks()
            .await
            .map_err(CoordinatorError::ContractRead)
    }

    /// The confirmation delays the contract accepts.
    ///
    /// # Errors
    ///
    /// Returns an error if the contract read fails.
    pub async fn confirmation_delays(&self) -> Result<Vec<u32>, CoordinatorError> {
        self.beacon
            .confirmation_delays()
            .await
            .map_err(CoordinatorError::ContractRead)
    }

    /// Identifier of the DKG key the beacon operates under.
    ///
    /// # Errors
    ///
    /// Returns an error if the contract read fails.
    pub async fn key_id(&self) -> Result<B256, CoordinatorError> {
        self.beacon
            .key_id()
            .await
            .map_err(CoordinatorError::ContractRead)
    }

    /// Hashes for every height referenced by an eligible request, keyed by
    /// height. Heights are collected before the dedup filters run so the
    /// mapping covers everything the filters can let through.
    async fn requested_block_hashes(
        &self,
        classified: &ClassifiedLogs,
        current_height: u64,
    ) -> Result<HashMap<u64, B256>, CoordinatorError> {
        let mut raw_heights: HashSet<u64> = HashSet::new();
        for r in &classified.randomness_requests {
            let conf_delay = r.event.confDelay.to::<u32>();
            if is_eligible(r.event.nextBeaconOutputHeight, conf_delay, current_height) {
                raw_heights.insert(r.event.nextBeaconOutputHeight);
            }
        }
        for r in &classified.fulfillment_requests {
            let conf_delay = r.event.confDelay.to::<u32>();
            if is_eligible(r.event.nextBeaconOutputHeight, conf_delay, current_height) {
                raw_heights.insert(r.event.nextBeaconOutputHeight);
            }
        }

        let heights: Vec<u64> = raw_heights.into_iter().collect();
        let heads = self
            .lp
            .get_blocks(heights.clone())
            .await
            .map_err(CoordinatorError::LogPoller)?;
        if heads.len() != heights.len() {
            return Err(CoordinatorError::MissingHeads {
                want: heights.len(),
                got: heads.len(),
            });
        }

        Ok(heads
            .into_iter()
            .map(|head| (head.block_number, head.block_hash))
            .collect())
    }

    /// Blocks from plain randomness requests that are ready to serve and
    /// not already claimed by an in-flight report.
    fn filter_eligible_randomness_requests(
        &self,
        requests: &[DecodedLog<RandomnessRequested>],
        confirmation_delays: &HashSet<u32>,
        current_height: u64,
    ) -> Result<Vec<BlockId>, CoordinatorError> {
        let caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);

        let mut unfulfilled = Vec::new();
        for r in requests {
            let conf_delay = r.event.confDelay.to::<u32>();
            // The contract rejects requests with unsupported delays, so this
            // only fires under misconfiguration.
            if !confirmation_delays.contains(&conf_delay) {
                error!(
                    target: "vrf-coordinator::report",
                    conf_delay,
                    supported = ?confirmation_delays,
                    "ignoring request with unsupported confirmation delay"
                );
                continue;
            }

            let id = BlockId {
                block_number: r.event.nextBeaconOutputHeight,
                conf_delay,
            };
            let key = cache_key(&id)?;
            if caches.blocks.get(&key).is_none()
                && is_eligible(id.block_number, conf_delay, current_height)
            {
                unfulfilled.push(id);
            }
        }
        Ok(unfulfilled)
    }

    /// Callback requests that are ready to serve and not already claimed,
    /// together with the beacon blocks they depend on. A callback's beacon
    /// block may not coincide with any plain randomness request, so those
    /// blocks are returned separately for the caller to union in.
    #[allow(clippy::type_complexity)]
    fn filter_eligible_callbacks(
        &self,
        requests: &[DecodedLog<RandomnessFulfillmentRequested>],
        confirmation_delays: &HashSet<u32>,
        current_height: u64,
    ) -> Result<
        (
            Vec<DecodedLog<RandomnessFulfillmentRequested>>,
            Vec<BlockId>,
        ),
        CoordinatorError,
    > {
        let caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);

        let mut callbacks = Vec::new();
        let mut unfulfilled = Vec::new();
        for r in requests {
            let conf_delay = r.event.confDelay.to::<u32>();
            if !confirmation_delays.contains(&conf_delay) {
                error!(
                    target: "vrf-coordinator::report",
                    conf_delay,
                    supported = ?confirmation_delays,
                    "ignoring callback request with unsupported confirmation delay"
                );
                continue;
            }

            let id = CallbackId {
                block_number: r.event.nextBeaconOutputHeight,
                request_id: r.event.callback.requestID.wrapping_to::<u64>(),
            };
            let key = cache_key(&id)?;
            if caches.callbacks.get(&key).is_none()
                && is_eligible(r.event.nextBeaconOutputHeight, conf_delay, current_height)
            {
                callbacks.push(r.clone());
                unfulfilled.push(BlockId {
                    block_number: r.event.nextBeaconOutputHeight,
                    conf_delay,
                });
            }
        }
        Ok((callbacks, unfulfilled))
    }

    /// Builds the callback obligations for requests not yet fulfilled
    /// on-chain. In-flight filtering already happened in
    /// `filter_eligible_callbacks`; this pass only subtracts confirmed
    /// fulfillments.
    fn filter_unfulfilled_callbacks(
        &self,
        callbacks_requested: &[DecodedLog<RandomnessFulfillmentRequested>],
        fulfilled_request_ids: &HashSet<u64>,
        confirmation_delays: &HashSet<u32>,
        current_height: u64,
    ) -> Vec<CostedCallbackRequest> {
        let mut callbacks = Vec::new();
        for r in callbacks_requested {
            let request_id = r.event.callback.requestID.wrapping_to::<u64>();
            if fulfilled_request_ids.contains(&request_id) {
                continue;
            }

            let conf_delay = r.event.confDelay.to::<u32>();
            if !confirmation_delays.contains(&conf_delay) {
                error!(
                    target: "vrf-coordinator::report",
                    conf_delay,
                    supported = ?confirmation_delays,
                    "ignoring callback request with unsupported confirmation delay"
                );
                continue;
            }

            if is_eligible(r.event.nextBeaconOutputHeight, conf_delay, current_height) {
                callbacks.push(CostedCallbackRequest {
                    beacon_height: r.event.nextBeaconOutputHeight,
                    confirmation_delay: conf_delay,
                    subscription_id: r.event.subID,
                    price: U256::ZERO,
                    request_id,
                    num_words: r.event.callback.numWords,
                    requester: r.event.callback.requester,
                    arguments: r.event.callback.arguments.clone(),
                    gas_allowance: U256::from(r.event.callback.gasAllowance.to::<u128>()),
                    request_height: r.block_number,
                    request_block_hash: r.block_hash,
                });
            }
        }
        callbacks
    }
}

/// Whether a beacon output has accrued enough confirmations to be served.
///
/// The first clause guards simulated chains with very low heights, where
/// the depth comparison alone would be meaningless. The output height is
/// always at or past the height of the request that asked for it, so
/// confirming the output block also confirms the request block.
pub fn is_eligible(next_output_height: u64, conf_delay: u32, current_height: u64) -> bool {
    u64::from(conf_delay) < current_height
        && next_output_height.saturating_add(u64::from(conf_delay)) < current_height
}

/// Blocks already served by on-chain transmissions.
fn fulfilled_blocks(transmissions: &[DecodedLog<NewTransmission>]) -> Vec<BlockId> {
    let mut fulfilled = Vec::new();
    for t in transmissions {
        for served in &t.event.outputsServed {
            fulfilled.push(BlockId {
                block_number: served.height,
                conf_delay: served.confirmationDelay.to::<u32>(),
            });
        }
    }
    fulfilled
}

/// Request ids whose callbacks were executed successfully on-chain. Failed
/// fulfillment attempts do not count; their requests remain serviceable.
fn fulfilled_request_ids(fulfillments: &[DecodedLog<RandomWordsFulfilled>]) -> HashSet<u64> {
    let mut ids = HashSet::new();
    for f in fulfillments {
        for (request_id, success) in f
            .event
            .requestIDs
            .iter()
            .zip(f.event.successfulFulfillment.iter())
        {
            if *success == 1 {
                ids.insert(request_id.wrapping_to::<u64>());
            }
        }
    }
    ids
}

fn committee_from(config: &ConfigSet) -> OcrCommittee {
    let mut committee = OcrCommittee::default();
    for (signer, transmitter) in config.signers.iter().zip(config.transmitters.iter()) {
        committee.signers.push(*signer);
        committee.transmitters.push(*transmitter);
    }
    committee
}

/// Packs an OCR epoch and round into the 40-bit big-endian value the
/// transmission event indexes, left-padded to topic width.
fn epoch_and_round_topic(epoch: u32, round: u8) -> B256 {
    B256::from(U256::from((u64::from(epoch) << 8) | u64::from(round)))
}
