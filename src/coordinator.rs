//! Ledger-side interface of the VRF coordinator contract.
//!
//! The contract itself is an external collaborator; this module carries only
//! its consumed surface: the `RequestQueued` event and the
//! `onRandomGenerated` fulfillment entry point. Submission goes through the
//! [`FulfillmentSink`] trait so the retry loop can be exercised without a
//! live chain.

use async_trait::async_trait;
use ethers::abi::RawLog;
use ethers::contract::{abigen, EthLogDecode};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Bytes, Log, H256, U256, U64};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::monitor::QueuedRequest;

abigen!(
    VrfCoordinator,
    r#"[
        event RequestQueued(uint256 requestId, address caller, uint256 seed)
        function onRandomGenerated(uint256 requestId, uint256 random, bytes signature)
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Terminal outcome of a fulfillment submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The fulfillment transaction landed and the receipt reports success.
    Confirmed(H256),
    /// The contract already holds a fulfillment for this request; a duplicate
    /// submission is equivalent to success.
    AlreadyFulfilled,
}

/// A single submission attempt failure, classified for the retry loop.
#[derive(Debug)]
pub struct SinkError {
    pub reason: String,
    /// Transport-class failures retry; contract reverts do not.
    pub retryable: bool,
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Fulfillment entry point of the ledger, one attempt per call.
#[async_trait]
pub trait FulfillmentSink: Send + Sync {
    async fn submit(
        &self,
        request_id: U256,
        random: U256,
        signature: Bytes,
    ) -> Result<SubmissionOutcome, SinkError>;
}

/// Revert reasons that mean the request is already fulfilled on-chain.
fn is_already_fulfilled(err_str: &str) -> bool {
    err_str.contains("AlreadyFulfilled")
        || err_str.contains("already fulfilled")
        || err_str.contains("Request already processed")
}

/// Contract reverts are data-integrity class and must not be retried; only
/// transport-level failures are safe to repeat.
fn is_retryable(err_str: &str) -> bool {
    !(err_str.contains("execution reverted")
        || err_str.contains("revert")
        || err_str.contains("invalid signature")
        || err_str.contains("untrusted"))
}

/// Handle to the deployed coordinator, independent of any signing key.
pub struct CoordinatorClient {
    provider: Arc<Provider<Http>>,
    contract_address: ethers::types::Address,
}

impl CoordinatorClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())?;
        Ok(Self {
            provider: Arc::new(provider),
            contract_address: config.contract_address,
        })
    }

    /// Bind the coordinator to a generation-scoped wallet for submission.
    ///
    /// The wallet doubles as the transaction sender, so the registrar must
    /// have registered (and funded) the same generation's address on-chain.
    pub fn fulfillment_sink(&self, wallet: LocalWallet) -> CoordinatorSink {
        let client = Arc::new(SignerMiddleware::new(
            self.provider.as_ref().clone(),
            wallet,
        ));
        CoordinatorSink {
            contract: VrfCoordinator::new(self.contract_address, client),
        }
    }
}

/// Live submission path over ethers.
pub struct CoordinatorSink {
    contract: VrfCoordinator<SignerClient>,
}

#[async_trait]
impl FulfillmentSink for CoordinatorSink {
    async fn submit(
        &self,
        request_id: U256,
        random: U256,
        signature: Bytes,
    ) -> Result<SubmissionOutcome, SinkError> {
        let call = self.contract.on_random_generated(request_id, random, signature);

        // A revert raised while estimating or sending carries the contract's
        // reason string; "already fulfilled" surfaces here and counts as
        // success so retries stay idempotent.
        let pending = match call.send().await {
            Ok(pending) => pending,
            Err(e) => {
                let reason = format!("{e}");
                if is_already_fulfilled(&reason) {
                    return Ok(SubmissionOutcome::AlreadyFulfilled);
                }
                return Err(SinkError {
                    retryable: is_retryable(&reason),
                    reason,
                });
            }
        };
        let tx_hash = pending.tx_hash();

        let receipt = pending
            .await
            .map_err(|e| SinkError {
                reason: format!("confirmation failed: {e}"),
                retryable: true,
            })?
            .ok_or_else(|| SinkError {
                reason: "transaction dropped from mempool".into(),
                retryable: true,
            })?;

        if receipt.status != Some(U64::one()) {
            // A duplicate that passed gas estimation lands with status 0 and
            // a bare receipt; replay the call to recover the revert reason
            // so the already-fulfilled case still counts as success.
            let replay_reason = match call.call().await {
                Err(e) => format!("{e}"),
                Ok(_) => String::new(),
            };
            return classify_reverted_receipt(tx_hash, &replay_reason);
        }

        Ok(SubmissionOutcome::Confirmed(tx_hash))
    }
}

/// Classify a status-0 fulfillment receipt from its replayed revert reason.
///
/// An already-fulfilled revert is idempotent success; anything else is a
/// data-integrity failure and must not be retried.
fn classify_reverted_receipt(
    tx_hash: H256,
    replay_reason: &str,
) -> Result<SubmissionOutcome, SinkError> {
    if is_already_fulfilled(replay_reason) {
        return Ok(SubmissionOutcome::AlreadyFulfilled);
    }
    Err(SinkError {
        reason: format!("fulfillment transaction reverted: {tx_hash:#x} {replay_reason}"),
        retryable: false,
    })
}

/// Decode a raw ledger log into a [`QueuedRequest`], if it is a
/// `RequestQueued` event.
pub fn decode_request_queued(log: &Log) -> Option<QueuedRequest> {
    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    let event = RequestQueuedFilter::decode_log(&raw).ok()?;
    Some(QueuedRequest {
        request_id: event.request_id,
        caller: event.caller,
        seed: event.seed,
    })
}
