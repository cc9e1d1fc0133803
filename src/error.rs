//! Error kinds for the oracle, grouped by recovery policy.
//!
//! Transient conditions (`SubscriptionLost`, `SigningUnavailable`) are
//! retried locally with bounded backoff. `KeyDerivation` is recoverable for
//! rotation (the prior secret stays authoritative) but fatal at bootstrap.
//! `SubmissionFailed` is terminal for a single request after the retry
//! budget is exhausted and never affects other in-flight requests.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    /// The ledger event subscription dropped; the monitor reconnects and
    /// backfills from its block cursor.
    #[error("event subscription lost: {0}")]
    SubscriptionLost(String),

    /// Key material could not be derived or failed scalar validation.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The fulfillment digest could not be signed. Data-integrity class:
    /// aborts the affected request, never retried.
    #[error("attestation failed: {0}")]
    Attestation(String),

    /// All submission attempts for one request were exhausted.
    #[error("submission failed after {attempts} attempts: {reason}")]
    SubmissionFailed { attempts: u32, reason: String },

    /// A rotation held the key lock beyond the bounded wait.
    #[error("signing unavailable: key rotation in progress")]
    SigningUnavailable,
}
