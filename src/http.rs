//! Shared HTTP client for persistence calls.
//!
//! Save/load/share requests are short and frequent enough to benefit from a
//! single pooled client instead of one per gateway instance. The analysis
//! transport builds its own client because its timeout comes from caller
//! configuration.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Client for persistence requests
///
/// - 30s timeout, these are plain request/response calls
/// - small idle pool, persistence traffic is bursty but light
static PERSISTENCE_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(5)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create persistence HTTP client")
});

#[inline]
pub(crate) fn persistence_client() -> &'static Client {
    &PERSISTENCE_CLIENT
}
