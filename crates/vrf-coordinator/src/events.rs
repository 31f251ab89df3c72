//! ABI declarations for the consumed contract events and classification of
//! raw poller logs into typed, ordered event batches.
//!
//! The `sol!` block is the single source of truth for the event ABI; topic
//! hashes are the generated `SIGNATURE_HASH` constants.

use crate::{
    CoordinatorError,
    log_poller::Log,
    primitives::B256,
};

use alloy_sol_types::{
    SolEvent,
    sol,
};

use tracing::error;

sol! {
    /// A beacon output that a transmitted report served.
    #[derive(Debug, PartialEq)]
    struct OutputServed {
        uint64 height;
        uint24 confirmationDelay;
        uint256 proofG1X;
        uint256 proofG1Y;
    }

    /// Callback details carried by a fulfillment request.
    #[derive(Debug, PartialEq)]
    struct Callback {
        uint256 requestID;
        uint16 numWords;
        address requester;
        bytes arguments;
        uint96 gasAllowance;
    }

    /// A client requested randomness from a future beacon output.
    #[derive(Debug, PartialEq)]
    event RandomnessRequested(
        uint64 indexed nextBeaconOutputHeight,
        uint24 confDelay
    );

    /// A client requested randomness delivered via callback.
    #[derive(Debug, PartialEq)]
    event RandomnessFulfillmentRequested(
        uint64 nextBeaconOutputHeight,
        uint24 confDelay,
        uint64 subID,
        Callback callback
    );

    /// Callback requests were executed on-chain; one status byte per
    /// request id, 1 meaning the fulfillment succeeded.
    #[derive(Debug, PartialEq)]
    event RandomWordsFulfilled(
        uint256[] requestIDs,
        bytes successfulFulfillment,
        bytes[] truncatedErrorData
    );

    /// A report was transmitted on-chain.
    #[derive(Debug, PartialEq)]
    event NewTransmission(
        uint32 indexed aggregatorRoundId,
        uint40 indexed epochAndRound,
        address transmitter,
        uint192 juelsPerFeeCoin,
        bytes32 configDigest,
        OutputServed[] outputsServed
    );

    /// Committee configuration change, emitted by both the beacon and the
    /// DKG contract.
    #[derive(Debug, PartialEq)]
    event ConfigSet(
        uint32 previousConfigBlockNumber,
        bytes32 configDigest,
        uint64 configCount,
        address[] signers,
        address[] transmitters,
        uint8 f,
        bytes onchainConfig,
        uint64 offchainConfigVersion,
        bytes offchainConfig
    );
}

/// Topic hashes of every event the coordinator subscribes to.
#[derive(Debug, Clone, Copy)]
pub struct Topics {
    pub randomness_requested: B256,
    pub randomness_fulfillment_requested: B256,
    pub random_words_fulfilled: B256,
    pub new_transmission: B256,
    pub config_set: B256,
}

impl Topics {
    pub fn new() -> Self {
        Topics {
            randomness_requested: RandomnessRequested::SIGNATURE_HASH,
            randomness_fulfillment_requested: RandomnessFulfillmentRequested::SIGNATURE_HASH,
            random_words_fulfilled: RandomWordsFulfilled::SIGNATURE_HASH,
            new_transmission: NewTransmission::SIGNATURE_HASH,
            config_set: ConfigSet::SIGNATURE_HASH,
        }
    }

    /// The four beacon topics scanned by report assembly. `ConfigSet` is
    /// queried separately during committee resolution.
    pub fn report_topics(&self) -> [B256; 4] {
        [
            self.randomness_requested,
            self.randomness_fulfillment_requested,
            self.random_words_fulfilled,
            self.new_transmission,
        ]
    }

    /// Every subscribed topic, for filter registration.
    pub fn all(&self) -> [B256; 5] {
        [
            self.randomness_requested,
            self.randomness_fulfillment_requested,
            self.random_words_fulfilled,
            self.new_transmission,
            self.config_set,
        ]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded event together with the block that emitted it. The emitting
/// block is needed later for callback obligation fields.
#[derive(Debug, Clone)]
pub struct DecodedLog<T> {
    pub event: T,
    pub block_number: u64,
    pub block_hash: B256,
}

/// Result of classifying one raw log batch. Input order is preserved
/// within each event kind.
#[derive(Debug, Default)]
pub struct ClassifiedLogs {
    pub randomness_requests: Vec<DecodedLog<RandomnessRequested>>,
    pub fulfillment_requests: Vec<DecodedLog<RandomnessFulfillmentRequested>>,
    pub fulfillments: Vec<DecodedLog<RandomWordsFulfilled>>,
    pub transmissions: Vec<DecodedLog<NewTransmission>>,
}

/// Partitions an ordered batch of raw logs into the four report-relevant
/// event kinds.
///
/// Logs with an unrecognized topic are reported and excluded. A log whose
/// topic matches a known signature but whose payload fails to decode aborts
/// the whole call: the poller only hands us logs matching our registered
/// filters, so a decode failure means corrupt chain data.
///
/// # Errors
///
/// Returns an error if a recognized log fails structural decoding.
pub fn classify_logs(logs: &[Log]) -> Result<ClassifiedLogs, CoordinatorError> {
    let mut classified = ClassifiedLogs::default();

    for lg in logs {
        let Some(sig) = lg.topics.first().copied() else {
            error!(
                target: "vrf-coordinator::events",
                block_number = lg.block_number,
                log_index = lg.log_index,
                "log without topics, skipping"
            );
            continue;
        };

        match sig {
            s if s == RandomnessRequested::SIGNATURE_HASH => {
                classified
                    .randomness_requests
                    .push(decode(lg, "RandomnessRequested")?);
            }
            s if s == RandomnessFulfillmentRequested::SIGNATURE_HASH => {
                classified
                    .fulfillment_requests
                    .push(decode(lg, "RandomnessFulfillmentRequested")?);
            }
            s if s == RandomWordsFulfilled::SIGNATURE_HASH => {
                classified
                    .fulfillments
                    .push(decode(lg, "RandomWordsFulfilled")?);
            }
            s if s == NewTransmission::SIGNATURE_HASH => {
                classified
                    .transmissions
                    .push(decode(lg, "NewTransmission")?);
            }
            _ => {
                error!(
                    target: "vrf-coordinator::events",
                    sig = %sig,
                    block_number = lg.block_number,
                    "unexpected event signature, skipping"
                );
            }
        }
    }

    Ok(classified)
}

fn decode<E: SolEvent>(lg: &Log, event: &'static str) -> Result<DecodedLog<E>, CoordinatorError> {
    let decoded = E::decode_raw_log(lg.topics.iter().copied(), &lg.data)
        .map_err(|source| CoordinatorError::LogDecode { event, source })?;
    Ok(DecodedLog {
        event: decoded,
        block_number: lg.block_number,
        block_hash: lg.block_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        primitives::Address,
        test_utils::{
            log_from_event,
            randomness_requested,
        },
    };

    use alloy_primitives::aliases::U24;

    #[test]
    fn test_topics_are_distinct() {
        let topics = Topics::new();
        let all = topics.all();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_classify_preserves_order() {
        let address = Address::random();
        let logs = vec![
            log_from_event(&randomness_requested(95, 0), address, 90),
            log_from_event(&randomness_requested(93, 3), address, 91),
            log_from_event(&randomness_requested(96, 0), address, 92),
        ];

        let classified = classify_logs(&logs).unwrap();
        assert_eq!(classified.randomness_requests.len(), 3);
        let heights: Vec<u64> = classified
            .randomness_requests
            .iter()
            .map(|r| r.event.nextBeaconOutputHeight)
            .collect();
        assert_eq!(heights, vec![95, 93, 96]);
        assert_eq!(classified.randomness_requests[1].block_number, 91);
    }

    #[test]
    fn test_classify_drops_unknown_topic() {
        let address = Address::random();
        let mut unknown = log_from_event(&randomness_requested(95, 0), address, 90);
        unknown.topics[0] = B256::random();

        let logs = vec![
            unknown,
            log_from_event(&randomness_requested(93, 3), address, 91),
        ];

        let classified = classify_logs(&logs).unwrap();
        assert_eq!(classified.randomness_requests.len(), 1);
        assert_eq!(
            classified.randomness_requests[0].event.confDelay,
            U24::from(3)
        );
    }

    #[test]
    fn test_classify_decode_failure_is_fatal() {
        let address = Address::random();
        let mut corrupt = log_from_event(&randomness_requested(95, 0), address, 90);
        corrupt.data = vec![0xde, 0xad].into();

        let result = classify_logs(&[corrupt]);
        assert!(matches!(
            result,
            Err(CoordinatorError::LogDecode {
                event: "RandomnessRequested",
                ..
            })
        ));
    }
}
