//! Application configuration loaded from environment variables.
//!
//! Required: `RPC_URL`, `WS_URL`, `CONTRACT_ADDRESS`, `KEY_SOURCE_URL`
//! Optional: `CHAIN_ID`, `KEY_DERIVATION_PATH`, `HTTP_PORT`, `MAX_RETRIES`,
//!           `RETRY_DELAY_MS`, `FULFILLMENT_CONCURRENCY`,
//!           `CATCH_UP_LOOKBACK_BLOCKS`

use anyhow::{Context, Result};
use ethers::types::Address;
use std::str::FromStr;

/// Application configuration for the randomness oracle.
#[derive(Clone)]
pub struct AppConfig {
    /// Ledger JSON-RPC endpoint (HTTP), used for submission and log backfill.
    pub rpc_url: String,
    /// Ledger PubSub endpoint (WebSocket) for event subscriptions.
    pub ws_url: String,
    /// Address of the deployed VRF coordinator contract.
    pub contract_address: Address,
    /// Chain id the signer is bound to.
    pub chain_id: u64,
    /// Endpoint of the hardware-attested key-derivation service.
    pub key_source_url: String,
    /// Derivation path/identifier passed to the key service at bootstrap.
    pub key_derivation_path: String,
    /// HTTP server port for the identity/status surface.
    pub http_port: u16,
    /// Maximum submission attempts per fulfillment.
    pub max_retries: u32,
    /// Fixed delay between submission attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Maximum concurrent fulfillment tasks.
    pub fulfillment_concurrency: usize,
    /// How many blocks behind the head the startup scan covers.
    pub catch_up_lookback_blocks: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let rpc_url = std::env::var("RPC_URL").context("RPC_URL env var must be set")?;
        let ws_url = std::env::var("WS_URL").context("WS_URL env var must be set")?;

        let contract_str =
            std::env::var("CONTRACT_ADDRESS").context("CONTRACT_ADDRESS env var must be set")?;
        let contract_address = Address::from_str(&contract_str)
            .with_context(|| format!("invalid CONTRACT_ADDRESS: {contract_str}"))?;

        let key_source_url =
            std::env::var("KEY_SOURCE_URL").context("KEY_SOURCE_URL env var must be set")?;

        let key_derivation_path =
            std::env::var("KEY_DERIVATION_PATH").unwrap_or_else(|_| "ethereum".into());

        let chain_id = std::env::var("CHAIN_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(11155111); // Sepolia

        let http_port = std::env::var("HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        let max_retries = std::env::var("MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let retry_delay_ms = std::env::var("RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);

        let fulfillment_concurrency = std::env::var("FULFILLMENT_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        let catch_up_lookback_blocks = std::env::var("CATCH_UP_LOOKBACK_BLOCKS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(Self {
            rpc_url,
            ws_url,
            contract_address,
            chain_id,
            key_source_url,
            key_derivation_path,
            http_port,
            max_retries,
            retry_delay_ms,
            fulfillment_concurrency,
            catch_up_lookback_blocks,
        })
    }
}
