//! Identity exchange HTTP surface.
//!
//! Consumed by the external registrar, which fetches the oracle's address,
//! registers and funds it on-chain, then fetches and authorizes the public
//! key — all before any request can be fulfilled. Only derived public
//! identifiers ever cross this boundary; the secret stays inside
//! [`RootKeySource`].

use actix_web::{web, HttpResponse};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

use crate::keys::RootKeySource;
use crate::metrics::Metrics;

/// Shared application state accessible from HTTP handlers.
pub struct AppState {
    pub keys: Arc<RootKeySource>,
    /// Number of fulfillment tasks currently in-flight.
    pub pending_count: Arc<AtomicU64>,
    pub metrics: Arc<Metrics>,
}

/// Liveness probe — returns 200 if the process is running.
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Readiness / status probe — reports in-flight fulfillments and counters.
async fn status(data: web::Data<AppState>) -> HttpResponse {
    let pending = data.pending_count.load(Ordering::Relaxed);
    HttpResponse::Ok().json(serde_json::json!({
        "status": "running",
        "pending_fulfillments": pending,
        "metrics": data.metrics.to_json(),
    }))
}

/// Current on-chain address, scoped to the generation it was read under.
async fn current_address(data: web::Data<AppState>) -> HttpResponse {
    match data.keys.current_view().await {
        Ok(view) => HttpResponse::Ok().json(serde_json::json!({
            "address": format!("{:#x}", view.address()),
            "generation": view.generation(),
        })),
        Err(e) => HttpResponse::ServiceUnavailable()
            .json(serde_json::json!({ "error": e.to_string() })),
    }
}

/// Current uncompressed public key, scoped to the generation it was read under.
async fn current_pubkey(data: web::Data<AppState>) -> HttpResponse {
    match data.keys.current_view().await {
        Ok(view) => HttpResponse::Ok().json(serde_json::json!({
            "pubkey": view.public_key(),
            "generation": view.generation(),
        })),
        Err(e) => HttpResponse::ServiceUnavailable()
            .json(serde_json::json!({ "error": e.to_string() })),
    }
}

/// Rotate the signing key and return the new public identity.
///
/// On failure the prior key remains authoritative and the error is surfaced
/// to the registrar.
async fn rotate_key(data: web::Data<AppState>) -> HttpResponse {
    match data.keys.rotate().await {
        Ok(rotated) => {
            data.metrics.record_rotation();
            HttpResponse::Ok().json(serde_json::json!({
                "status": "success",
                "message": "signing key rotated",
                "new_pubkey": rotated.public_key,
                "new_address": format!("{:#x}", rotated.address),
                "generation": rotated.generation,
            }))
        }
        Err(e) => {
            error!(error = %e, "Key rotation failed, prior key remains current");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

/// Register all routes of the identity/status surface.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/status", web::get().to(status))
        .route("/current-address", web::get().to(current_address))
        .route("/current-pubkey", web::get().to(current_pubkey))
        .route("/rotate-key", web::post().to(rotate_key));
}
