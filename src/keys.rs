//! Root signing key lifecycle.
//!
//! The oracle's secret is bootstrapped once from the hardware-attested
//! key-derivation service and afterwards evolves only through [`RootKeySource::rotate`].
//! Exactly one secret is current at any instant, tagged with a monotonically
//! increasing generation counter.
//!
//! Concurrency discipline: signing and identity queries take the read side of
//! an `RwLock` via [`RootKeySource::current_view`]; rotation takes the write
//! side, draining all in-flight signings before swapping the secret. A signing
//! that began under generation G therefore always completes under G.

use ethers::core::k256::ecdsa::SigningKey;
use ethers::core::k256::elliptic_curve::sec1::ToEncodedPoint;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use pbkdf2::pbkdf2_hmac;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::OracleError;

/// secp256k1 group order; derived scalars are reduced into `[1, n-1]`.
const SECP256K1_ORDER_HEX: &str =
    "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";

/// Fixed domain-separation salt for the rotation KDF. A fixed salt keeps
/// rotation deterministic: the same prior secret always derives the same
/// successor.
const ROTATION_SALT: &[u8] = b"vrf-oracle/key-rotation/v1";

/// PBKDF2 round count for the rotation KDF.
const ROTATION_KDF_ROUNDS: u32 = 10;

/// How long a reader waits for the lock before the rotation in progress is
/// surfaced as `SigningUnavailable`.
const READ_WAIT: Duration = Duration::from_secs(5);

fn group_order() -> U256 {
    U256::from_str_radix(SECP256K1_ORDER_HEX, 16).unwrap()
}

/// Current secret plus everything derived from it.
struct KeyState {
    secret: [u8; 32],
    generation: u64,
    wallet: LocalWallet,
}

/// Read-scoped view of the current key.
///
/// Holds the read side of the lock; a rotation cannot begin until every
/// outstanding view is dropped. Drop it before any I/O wait.
pub struct KeyView<'a> {
    guard: RwLockReadGuard<'a, KeyState>,
}

impl KeyView<'_> {
    /// Generation counter this view is pinned to.
    pub fn generation(&self) -> u64 {
        self.guard.generation
    }

    /// Raw 32-byte secret scalar. Never leaves the signing path.
    pub fn secret(&self) -> &[u8; 32] {
        &self.guard.secret
    }

    /// Wallet bound to this generation's secret.
    pub fn wallet(&self) -> &LocalWallet {
        &self.guard.wallet
    }

    /// On-chain address derived from this generation's secret.
    pub fn address(&self) -> Address {
        self.guard.wallet.address()
    }

    /// Uncompressed secp256k1 public key, 0x04-prefixed hex.
    pub fn public_key(&self) -> String {
        let point = self.guard.wallet.signer().verifying_key().to_encoded_point(false);
        format!("0x{}", hex::encode(point.as_bytes()))
    }
}

/// Outcome of a successful rotation.
pub struct RotatedKey {
    pub generation: u64,
    pub address: Address,
    pub public_key: String,
}

/// Owner of the oracle's current signing secret.
pub struct RootKeySource {
    state: RwLock<KeyState>,
    chain_id: u64,
}

/// Response shape of the key-derivation service.
#[derive(Deserialize)]
struct DerivedKeyResponse {
    key: String,
}

impl RootKeySource {
    /// Obtain the initial secret from the hardware-attested key service.
    ///
    /// Called exactly once at process start; failure here is fatal. All later
    /// secrets derive from rotation, never from the service again.
    pub async fn bootstrap(config: &AppConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::new();
        let url = format!("{}/key", config.key_source_url.trim_end_matches('/'));

        info!(url = %url, path = %config.key_derivation_path, "Requesting attested root key");

        let response = client
            .post(&url)
            .json(&serde_json::json!({ "path": config.key_derivation_path }))
            .send()
            .await
            .map_err(|e| OracleError::KeyDerivation(format!("key source unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| OracleError::KeyDerivation(format!("key source rejected request: {e}")))?;

        let derived: DerivedKeyResponse = response
            .json()
            .await
            .map_err(|e| OracleError::KeyDerivation(format!("malformed key source response: {e}")))?;

        let secret = parse_key_material(&derived.key)?;
        Self::from_secret(secret, config.chain_id)
    }

    /// Build a source around an already-validated secret.
    pub fn from_secret(secret: [u8; 32], chain_id: u64) -> Result<Self, OracleError> {
        let wallet = wallet_from_secret(&secret, chain_id)?;
        Ok(Self {
            state: RwLock::new(KeyState {
                secret,
                generation: 0,
                wallet,
            }),
            chain_id,
        })
    }

    /// Acquire a read view of the current key, waiting a bounded time for any
    /// rotation in progress to finish.
    pub async fn current_view(&self) -> Result<KeyView<'_>, OracleError> {
        self.view_with_wait(READ_WAIT).await
    }

    async fn view_with_wait(&self, wait: Duration) -> Result<KeyView<'_>, OracleError> {
        match tokio::time::timeout(wait, self.state.read()).await {
            Ok(guard) => Ok(KeyView { guard }),
            Err(_) => Err(OracleError::SigningUnavailable),
        }
    }

    /// Derive the next secret from the current one and swap it in.
    ///
    /// Blocks until all in-flight signings have released their views. The new
    /// secret is fully derived and validated before any mutation, so a
    /// derivation failure leaves the prior secret authoritative.
    pub async fn rotate(&self) -> Result<RotatedKey, OracleError> {
        let mut state = self.state.write().await;

        let next_secret = derive_next_secret(&state.secret)?;
        let wallet = wallet_from_secret(&next_secret, self.chain_id)?;

        state.secret = next_secret;
        state.generation += 1;
        state.wallet = wallet;

        let rotated = RotatedKey {
            generation: state.generation,
            address: state.wallet.address(),
            public_key: {
                let point = state.wallet.signer().verifying_key().to_encoded_point(false);
                format!("0x{}", hex::encode(point.as_bytes()))
            },
        };

        info!(
            generation = rotated.generation,
            address = %format!("{:#x}", rotated.address),
            "Root key rotated"
        );
        Ok(rotated)
    }
}

/// One-way derivation of the successor secret: PBKDF2-HMAC-SHA256 over the
/// current secret with a fixed domain salt, reduced modulo the group order.
fn derive_next_secret(current: &[u8; 32]) -> Result<[u8; 32], OracleError> {
    let mut derived = [0u8; 32];
    pbkdf2_hmac::<Sha256>(current, ROTATION_SALT, ROTATION_KDF_ROUNDS, &mut derived);

    let scalar = U256::from_big_endian(&derived) % group_order();
    if scalar.is_zero() {
        warn!("Rotation KDF produced the zero scalar, keeping prior key");
        return Err(OracleError::KeyDerivation(
            "derived scalar is zero".into(),
        ));
    }

    let mut out = [0u8; 32];
    scalar.to_big_endian(&mut out);
    Ok(out)
}

fn wallet_from_secret(secret: &[u8; 32], chain_id: u64) -> Result<LocalWallet, OracleError> {
    let signing_key = SigningKey::from_slice(secret)
        .map_err(|e| OracleError::KeyDerivation(format!("invalid secret scalar: {e}")))?;
    Ok(LocalWallet::from(signing_key).with_chain_id(chain_id))
}

/// Decode hex key material from the key service into a valid 32-byte scalar.
fn parse_key_material(material: &str) -> Result<[u8; 32], OracleError> {
    let stripped = material.trim().trim_start_matches("0x");
    let bytes = hex::decode(stripped)
        .map_err(|e| OracleError::KeyDerivation(format!("key material is not hex: {e}")))?;
    if bytes.len() < 32 {
        return Err(OracleError::KeyDerivation(format!(
            "key material too short: {} bytes",
            bytes.len()
        )));
    }

    let mut secret = [0u8; 32];
    secret.copy_from_slice(&bytes[..32]);

    let scalar = U256::from_big_endian(&secret);
    if scalar.is_zero() || scalar >= group_order() {
        return Err(OracleError::KeyDerivation(
            "key material is not a valid scalar".into(),
        ));
    }
    Ok(secret)
}
