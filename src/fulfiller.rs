//! Fulfillment pipeline — consumes queued requests and runs each through
//! generate → attest → submit as an independent concurrent task.
//!
//! The key view is held only for the in-memory signing steps: a request that
//! has begun signing completes against the generation it started with, and
//! the view is released before any I/O wait so rotations are not blocked by
//! confirmation latency.

use ethers::signers::LocalWallet;
use ethers::types::{Bytes, U256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::coordinator::{CoordinatorClient, SubmissionOutcome};
use crate::error::OracleError;
use crate::keys::RootKeySource;
use crate::metrics::Metrics;
use crate::monitor::QueuedRequest;
use crate::submitter::submit_with_retries;
use crate::vrf::{attest, generate_random};

/// How many times a task re-attempts key acquisition when a rotation holds
/// the lock, and how long it waits between attempts.
const SIGNING_ACQUIRE_ATTEMPTS: u32 = 3;
const SIGNING_ACQUIRE_DELAY: Duration = Duration::from_millis(500);

/// Lifecycle of one fulfillment, from dispatch to terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

/// Transient record of one in-flight fulfillment. Dropped once terminal;
/// only the log trail remains (idempotency is enforced on-chain).
pub struct FulfillmentRecord {
    pub request_id: U256,
    pub random: U256,
    pub signature: Bytes,
    pub state: SubmissionState,
}

/// Main pipeline loop: one semaphore-bounded task per queued request.
pub async fn run_fulfiller(
    config: AppConfig,
    keys: Arc<RootKeySource>,
    coordinator: Arc<CoordinatorClient>,
    mut rx: mpsc::Receiver<QueuedRequest>,
    pending_count: Arc<AtomicU64>,
    metrics: Arc<Metrics>,
) {
    let semaphore = Arc::new(Semaphore::new(config.fulfillment_concurrency));

    while let Some(request) = rx.recv().await {
        pending_count.fetch_add(1, Ordering::Relaxed);

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                error!("Semaphore closed, stopping fulfiller");
                break;
            }
        };
        let cfg = config.clone();
        let keys = keys.clone();
        let coord = coordinator.clone();
        let pending = pending_count.clone();
        let met = metrics.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let start = Instant::now();

            info!(
                request_id = %request.request_id,
                caller = %format!("{:#x}", request.caller),
                seed = %request.seed,
                "Fulfilling randomness request"
            );

            match process_request(&cfg, &keys, &coord, &request).await {
                Ok(outcome) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    met.record_fulfillment(latency_ms);
                    info!(
                        request_id = %request.request_id,
                        outcome = ?outcome,
                        latency_ms,
                        "Request fulfilled"
                    );
                }
                Err(e) => {
                    met.record_failure();
                    // requestId and seed land in the log for operator follow-up.
                    error!(
                        request_id = %request.request_id,
                        seed = %request.seed,
                        error = %e,
                        "Terminal fulfillment failure"
                    );
                }
            }

            pending.fetch_sub(1, Ordering::Relaxed);
        });
    }

    info!("Fulfiller channel closed, shutting down");
}

/// Run one request through the full pipeline.
async fn process_request(
    config: &AppConfig,
    keys: &RootKeySource,
    coordinator: &CoordinatorClient,
    request: &QueuedRequest,
) -> Result<SubmissionOutcome, OracleError> {
    let (mut record, wallet, generation) = sign_request(keys, request).await?;

    record.state = SubmissionState::Submitted;
    let sink = coordinator.fulfillment_sink(wallet);

    let result = submit_with_retries(
        &sink,
        record.request_id,
        record.random,
        record.signature.clone(),
        config.max_retries,
        Duration::from_millis(config.retry_delay_ms),
    )
    .await;

    record.state = match &result {
        Ok(_) => SubmissionState::Confirmed,
        Err(_) => SubmissionState::Failed,
    };
    if record.state == SubmissionState::Confirmed {
        info!(
            request_id = %record.request_id,
            generation,
            random = %record.random,
            "Fulfillment record closed"
        );
    }
    result
}

/// Derive the random value and signature under a single key view.
///
/// Both steps are synchronous, so the view spans no suspension point; the
/// generation observed at the start is the generation that signs. The
/// generation's wallet is cloned out for the submission step, which runs
/// after the view is released.
async fn sign_request(
    keys: &RootKeySource,
    request: &QueuedRequest,
) -> Result<(FulfillmentRecord, LocalWallet, u64), OracleError> {
    let mut attempt = 0;
    let view = loop {
        attempt += 1;
        match keys.current_view().await {
            Ok(view) => break view,
            Err(OracleError::SigningUnavailable) if attempt < SIGNING_ACQUIRE_ATTEMPTS => {
                warn!(
                    request_id = %request.request_id,
                    attempt,
                    "Rotation in progress, waiting for key access"
                );
                tokio::time::sleep(SIGNING_ACQUIRE_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    };

    let random = generate_random(request.seed, view.secret());
    let signature = attest(request.request_id, request.seed, random, view.wallet())?;
    let record = FulfillmentRecord {
        request_id: request.request_id,
        random,
        signature: Bytes::from(signature.to_vec()),
        state: SubmissionState::Pending,
    };
    Ok((record, view.wallet().clone(), view.generation()))
}
