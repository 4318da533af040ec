use std::fmt;

/// Opaque identifier for an OS-level network.
///
/// Backed by the NetworkManager active-connection object path in production;
/// tests use synthetic ids. Only valid for the lifetime of the binding that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkHandle(String);

impl NetworkHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport category, used as the watch filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Wifi,
    Cellular,
    Other,
}

/// Point-in-time view of a network's capabilities. Captured at query time and
/// re-queried on demand, never cached across calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilitiesSnapshot {
    pub wifi: bool,
    pub cellular: bool,
    pub internet: bool,
    pub validated: bool,
    pub interface: Option<String>,
}

impl CapabilitiesSnapshot {
    pub fn transport(&self) -> Transport {
        if self.wifi {
            Transport::Wifi
        } else if self.cellular {
            Transport::Cellular
        } else {
            Transport::Other
        }
    }
}

/// A network known to the OS at enumeration time.
#[derive(Debug, Clone)]
pub struct KnownNetwork {
    pub handle: NetworkHandle,
    pub caps: CapabilitiesSnapshot,
}

/// Notifications delivered to a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkNotification {
    Available(NetworkHandle),
    Lost(NetworkHandle),
}

/// Whether an interface name looks like a wireless NIC.
///
/// Covers the legacy `wlan0` scheme and systemd predictable names
/// (`wlp3s0`, `wlx0013ef7b`). A captive-portal network is expected to report
/// no internet capability, so the coordinator selects by interface name
/// instead of by the validated/internet flags.
pub fn is_wireless_interface(name: &str) -> bool {
    name.starts_with("wl")
}
