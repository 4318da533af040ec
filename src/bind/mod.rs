pub mod coordinator;

use async_trait::async_trait;

use crate::error::BindError;
use crate::net::NetworkHandle;

pub use coordinator::{BindConfig, WifiConnectionCoordinator};

/// What the orchestrator needs from the binding layer. Lets orchestration
/// tests run against a stub instead of the full coordinator.
#[async_trait]
pub trait WifiConnector: Send + Sync {
    /// Steer all process traffic through the network named `ssid`.
    async fn connect(&self, ssid: &str, password: &str) -> Result<(), BindError>;

    /// Always safe to call; clears any binding and cancels any live watch.
    async fn unbind(&self);

    /// Snapshot of the currently bound network, if any.
    fn bound_network(&self) -> Option<NetworkHandle>;
}
