pub mod capability;
pub mod dbus_proxies;
pub mod nm;
pub mod types;

#[cfg(test)]
pub mod fake;

pub use capability::{NetworkBinder, NetworkObserver, NetworkWatcher, WatchSubscription};
pub use types::{
    CapabilitiesSnapshot, KnownNetwork, NetworkHandle, NetworkNotification, Transport,
};
