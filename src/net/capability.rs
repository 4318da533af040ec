//! Capability seams over the OS networking stack.
//!
//! The coordinator only ever talks to these traits, so tests can substitute
//! scripted fakes for the NetworkManager-backed implementations in
//! [`crate::net::nm`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::NetResult;
use crate::net::types::{KnownNetwork, NetworkNotification, Transport};
use crate::net::NetworkHandle;

/// Read-only view of the OS's network state.
#[async_trait]
pub trait NetworkObserver: Send + Sync {
    /// The OS's current default network with its capabilities, if any.
    async fn active_network(&self) -> NetResult<Option<KnownNetwork>>;

    /// All currently known networks.
    async fn enumerate_networks(&self) -> NetResult<Vec<KnownNetwork>>;

    /// SSID the wireless radio is currently associated with, if any.
    async fn associated_ssid(&self) -> NetResult<Option<String>>;
}

/// Side-effecting operations: exclusive process binding and enabling target
/// network configurations.
#[async_trait]
pub trait NetworkBinder: Send + Sync {
    /// Route all outbound process traffic through `network`; `None` clears
    /// any existing binding (idempotent — clearing an absent binding is not
    /// an error). Returns `false` when the OS refuses the binding.
    async fn bind_process_to_network(&self, network: Option<&NetworkHandle>) -> NetResult<bool>;

    /// The network the process is currently bound to, as the OS reports it.
    async fn bound_network(&self) -> NetResult<Option<NetworkHandle>>;

    /// Add or enable a configuration for `ssid` so the OS associates with it.
    /// Returns `false` when no wireless device is available.
    async fn enable_network(&self, ssid: &str, password: &str) -> NetResult<bool>;
}

/// Registration for asynchronous availability notifications.
///
/// At most one subscription is live at a time: registering a new one must
/// first cancel the previous one, so two callbacks can never race to resume
/// the same waiting call.
#[async_trait]
pub trait NetworkWatcher: Send + Sync {
    async fn watch_for_availability(&self, transport: Transport) -> NetResult<WatchSubscription>;
}

/// Shared liveness flag for a watch registration. Cancelling it tells the
/// producer side to stop delivering notifications; the first of
/// {match, timeout, cancel} wins and later signals are no-ops.
#[derive(Debug, Clone)]
pub struct WatchToken(Arc<AtomicBool>);

impl WatchToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Whether two tokens belong to the same registration.
    pub fn same_registration(&self, other: &WatchToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for WatchToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a watch registration. Dropping it cancels the
/// registration.
pub struct WatchSubscription {
    rx: mpsc::Receiver<NetworkNotification>,
    token: WatchToken,
}

impl WatchSubscription {
    pub fn new(rx: mpsc::Receiver<NetworkNotification>, token: WatchToken) -> Self {
        Self { rx, token }
    }

    /// Next notification, or `None` once the producer side has stopped.
    pub async fn recv(&mut self) -> Option<NetworkNotification> {
        self.rx.recv().await
    }

    pub fn token(&self) -> WatchToken {
        self.token.clone()
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
