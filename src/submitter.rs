//! Submission retry loop.
//!
//! An explicit bounded loop carrying the attempt count and a fixed
//! inter-attempt delay. Safe to repeat because the random value and
//! signature are deterministic for the request, and the contract rejects a
//! second fulfillment — a rejection the sink maps onto the
//! `AlreadyFulfilled` success path.

use ethers::types::{Bytes, U256};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::coordinator::{FulfillmentSink, SubmissionOutcome};
use crate::error::OracleError;

/// Submit one fulfillment with bounded retry.
///
/// Transport failures are retried up to `max_retries` total attempts with a
/// fixed `delay` between them. Non-retryable failures (contract reverts)
/// abort immediately. Exhausting the budget yields
/// [`OracleError::SubmissionFailed`] carrying the last failure reason.
pub async fn submit_with_retries(
    sink: &dyn FulfillmentSink,
    request_id: U256,
    random: U256,
    signature: Bytes,
    max_retries: u32,
    delay: Duration,
) -> Result<SubmissionOutcome, OracleError> {
    let mut last_reason = String::new();

    for attempt in 1..=max_retries {
        match sink.submit(request_id, random, signature.clone()).await {
            Ok(SubmissionOutcome::Confirmed(tx_hash)) => {
                info!(
                    request_id = %request_id,
                    tx_hash = %format!("{tx_hash:#x}"),
                    attempt,
                    "Fulfillment confirmed"
                );
                return Ok(SubmissionOutcome::Confirmed(tx_hash));
            }
            Ok(SubmissionOutcome::AlreadyFulfilled) => {
                info!(
                    request_id = %request_id,
                    attempt,
                    "Request already fulfilled on-chain, treating as success"
                );
                return Ok(SubmissionOutcome::AlreadyFulfilled);
            }
            Err(e) if !e.retryable => {
                warn!(
                    request_id = %request_id,
                    attempt,
                    reason = %e,
                    "Non-retryable submission failure"
                );
                return Err(OracleError::SubmissionFailed {
                    attempts: attempt,
                    reason: e.reason,
                });
            }
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    attempt,
                    remaining = max_retries - attempt,
                    reason = %e,
                    "Submission attempt failed"
                );
                last_reason = e.reason;
                if attempt < max_retries {
                    sleep(delay).await;
                }
            }
        }
    }

    Err(OracleError::SubmissionFailed {
        attempts: max_retries,
        reason: last_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::SinkError;
    use async_trait::async_trait;
    use ethers::types::H256;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Sink that replays a scripted sequence of outcomes.
    struct ScriptedSink {
        script: Mutex<VecDeque<Result<SubmissionOutcome, SinkError>>>,
        calls: AtomicU32,
    }

    impl ScriptedSink {
        fn new(script: Vec<Result<SubmissionOutcome, SinkError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FulfillmentSink for ScriptedSink {
        async fn submit(
            &self,
            _request_id: U256,
            _random: U256,
            _signature: Bytes,
        ) -> Result<SubmissionOutcome, SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("sink called more times than scripted")
        }
    }

    fn network_error() -> SinkError {
        SinkError {
            reason: "connection reset by peer".into(),
            retryable: true,
        }
    }

    fn revert_error() -> SinkError {
        SinkError {
            reason: "execution reverted: untrusted signer".into(),
            retryable: false,
        }
    }

    fn args() -> (U256, U256, Bytes) {
        (U256::from(7u64), U256::from(123u64), Bytes::from(vec![1u8; 65]))
    }

    const DELAY: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn first_attempt_success_confirms() {
        let sink = ScriptedSink::new(vec![Ok(SubmissionOutcome::Confirmed(H256::zero()))]);
        let (id, random, sig) = args();

        let outcome = submit_with_retries(&sink, id, random, sig, 3, DELAY)
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::Confirmed(H256::zero()));
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn recovers_within_the_retry_budget() {
        let sink = ScriptedSink::new(vec![
            Err(network_error()),
            Err(network_error()),
            Ok(SubmissionOutcome::Confirmed(H256::zero())),
        ]);
        let (id, random, sig) = args();

        let outcome = submit_with_retries(&sink, id, random, sig, 3, DELAY)
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::Confirmed(H256::zero()));
        assert_eq!(sink.calls(), 3);
    }

    #[tokio::test]
    async fn exhausting_the_budget_reports_terminal_failure() {
        let sink = ScriptedSink::new(vec![
            Err(network_error()),
            Err(network_error()),
            Err(network_error()),
        ]);
        let (id, random, sig) = args();

        let err = submit_with_retries(&sink, id, random, sig, 3, DELAY)
            .await
            .unwrap_err();
        match err {
            OracleError::SubmissionFailed { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("connection reset"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.calls(), 3);
    }

    #[tokio::test]
    async fn already_fulfilled_counts_as_success() {
        let sink = ScriptedSink::new(vec![Ok(SubmissionOutcome::AlreadyFulfilled)]);
        let (id, random, sig) = args();

        let outcome = submit_with_retries(&sink, id, random, sig, 3, DELAY)
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::AlreadyFulfilled);
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn duplicate_submission_of_the_same_triple_succeeds_twice() {
        let sink = ScriptedSink::new(vec![
            Ok(SubmissionOutcome::Confirmed(H256::zero())),
            Ok(SubmissionOutcome::AlreadyFulfilled),
        ]);
        let (id, random, sig) = args();

        let first = submit_with_retries(&sink, id, random, sig.clone(), 3, DELAY)
            .await
            .unwrap();
        let second = submit_with_retries(&sink, id, random, sig, 3, DELAY)
            .await
            .unwrap();

        assert_eq!(first, SubmissionOutcome::Confirmed(H256::zero()));
        assert_eq!(second, SubmissionOutcome::AlreadyFulfilled);
    }

    #[tokio::test]
    async fn non_retryable_failure_aborts_immediately() {
        let sink = ScriptedSink::new(vec![Err(revert_error())]);
        let (id, random, sig) = args();

        let err = submit_with_retries(&sink, id, random, sig, 3, DELAY)
            .await
            .unwrap_err();
        match err {
            OracleError::SubmissionFailed { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.calls(), 1);
    }
}
