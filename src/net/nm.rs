//! NetworkManager-backed implementation of the capability traits.
//!
//! Talks to NM over the system D-Bus. Process-level binding on Linux is
//! realized as an `SO_BINDTODEVICE` probe against the target interface plus
//! process-local bookkeeping; the selected interface is what outbound
//! sockets must be pinned to.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::Connection;

use crate::error::{NetError, NetResult};
use crate::net::capability::{
    NetworkBinder, NetworkObserver, NetworkWatcher, WatchSubscription, WatchToken,
};
use crate::net::dbus_proxies::*;
use crate::net::types::{
    CapabilitiesSnapshot, KnownNetwork, NetworkHandle, NetworkNotification, Transport,
};

// NM device type for WiFi
const NM_DEVICE_TYPE_WIFI: u32 = 2;
// NM active connection state "activated"
const NM_ACTIVE_STATE_ACTIVATED: u32 = 2;
// NM connectivity states
const NM_CONNECTIVITY_LIMITED: u32 = 3;
const NM_CONNECTIVITY_FULL: u32 = 4;

const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// High-level facade over NetworkManager's D-Bus API implementing the
/// observer/binder/watcher capabilities.
#[derive(Clone)]
pub struct NmStack {
    connection: Connection,
    bound: Arc<Mutex<Option<BoundNetwork>>>,
    watch_slot: Arc<Mutex<Option<WatchToken>>>,
}

#[derive(Clone)]
struct BoundNetwork {
    handle: NetworkHandle,
    interface: String,
}

impl NmStack {
    /// Connect to the system D-Bus.
    pub async fn new() -> NetResult<Self> {
        let connection = Connection::system().await?;
        Ok(Self {
            connection,
            bound: Arc::new(Mutex::new(None)),
            watch_slot: Arc::new(Mutex::new(None)),
        })
    }

    /// Interface the process is currently pinned to, for diagnostics.
    pub fn bound_interface(&self) -> Option<String> {
        self.bound
            .lock()
            .expect("binding state lock poisoned")
            .as_ref()
            .map(|b| b.interface.clone())
    }

    async fn connectivity(&self) -> NetResult<u32> {
        let proxy = NetworkManagerProxy::new(&self.connection).await?;
        Ok(proxy.connectivity().await?)
    }

    /// Build a KnownNetwork for an active-connection path. The global
    /// connectivity state only applies to the default-route connection.
    async fn known_network(
        &self,
        path: &OwnedObjectPath,
        connectivity: u32,
        is_primary: bool,
    ) -> NetResult<KnownNetwork> {
        let ac_proxy = ActiveConnectionProxy::builder(&self.connection)
            .path(path.clone())?
            .build()
            .await?;

        let conn_type = ac_proxy.connection_type().await.unwrap_or_default();
        let interface = match ac_proxy.devices().await {
            Ok(devices) => match devices.first() {
                Some(dev_path) => {
                    let dev_proxy = DeviceProxy::builder(&self.connection)
                        .path(dev_path.clone())?
                        .build()
                        .await?;
                    dev_proxy.interface().await.ok()
                }
                None => None,
            },
            Err(_) => None,
        };

        let caps = CapabilitiesSnapshot {
            wifi: conn_type == "802-11-wireless",
            cellular: matches!(conn_type.as_str(), "gsm" | "cdma"),
            internet: is_primary && connectivity >= NM_CONNECTIVITY_LIMITED,
            validated: is_primary && connectivity >= NM_CONNECTIVITY_FULL,
            interface,
        };

        Ok(KnownNetwork {
            handle: NetworkHandle::new(path.as_str()),
            caps,
        })
    }

    /// Find the first WiFi device path.
    async fn find_wifi_device(&self) -> NetResult<Option<OwnedObjectPath>> {
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        let devices = nm_proxy.get_devices().await?;

        for path in devices {
            let dev_proxy = DeviceProxy::builder(&self.connection)
                .path(path.clone())?
                .build()
                .await?;

            if dev_proxy.device_type().await.unwrap_or(0) == NM_DEVICE_TYPE_WIFI {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Check if the given SSID has a saved connection profile.
    async fn find_saved_connection_for_ssid(
        &self,
        ssid: &str,
    ) -> NetResult<Option<OwnedObjectPath>> {
        let settings_proxy = SettingsProxy::new(&self.connection).await?;
        let connections = settings_proxy.list_connections().await?;

        for conn_path in connections {
            let conn_proxy = ConnectionSettingsProxy::builder(&self.connection)
                .path(conn_path.clone())?
                .build()
                .await?;

            if let Ok(settings) = conn_proxy.get_settings().await {
                if let Some(conn) = settings.get("connection") {
                    let conn_type = conn.get("type").and_then(ov_to_string);
                    if conn_type.as_deref() != Some("802-11-wireless") {
                        continue;
                    }
                }

                if let Some(wifi) = settings.get("802-11-wireless") {
                    if let Some(ssid_val) = wifi.get("ssid") {
                        if let Some(bytes) = ov_to_bytes(ssid_val) {
                            if String::from_utf8_lossy(&bytes) == ssid {
                                return Ok(Some(conn_path));
                            }
                        }
                    }
                }
            }
        }

        Ok(None)
    }

    /// Find a visible access point advertising `ssid` on the given device.
    async fn find_access_point(
        &self,
        device_path: &OwnedObjectPath,
        ssid: &str,
    ) -> NetResult<Option<OwnedObjectPath>> {
        let proxy = WirelessProxy::builder(&self.connection)
            .path(device_path.clone())?
            .build()
            .await?;

        // A fresh scan may fail without privileges; stale results still work.
        if let Err(e) = proxy.request_scan(HashMap::new()).await {
            debug!("WiFi scan request failed: {}", e);
        }

        for ap_path in proxy.get_all_access_points().await? {
            let ap_proxy = AccessPointProxy::builder(&self.connection)
                .path(ap_path.clone())?
                .build()
                .await?;
            if let Ok(bytes) = ap_proxy.ssid().await {
                if String::from_utf8_lossy(&bytes) == ssid {
                    return Ok(Some(ap_path));
                }
            }
        }

        Ok(None)
    }

    /// Resolve the interface name behind an active-connection handle.
    async fn interface_for_handle(&self, handle: &NetworkHandle) -> NetResult<String> {
        let path: OwnedObjectPath = ObjectPath::try_from(handle.as_str())
            .map_err(|e| NetError::NetworkManager(format!("bad network handle: {e}")))?
            .into();
        let ac_proxy = ActiveConnectionProxy::builder(&self.connection)
            .path(path)?
            .build()
            .await?;
        let devices = ac_proxy.devices().await?;
        let dev_path = devices.first().ok_or_else(|| {
            NetError::NetworkManager(format!("no device behind connection {handle}"))
        })?;
        let dev_proxy = DeviceProxy::builder(&self.connection)
            .path(dev_path.clone())?
            .build()
            .await?;
        Ok(dev_proxy.interface().await?)
    }

    /// Active-connection handles currently in the activated state and
    /// matching the transport filter.
    async fn activated_handles(&self, transport: Transport) -> NetResult<Vec<NetworkHandle>> {
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        let mut out = Vec::new();

        for path in nm_proxy.active_connections().await? {
            let ac_proxy = ActiveConnectionProxy::builder(&self.connection)
                .path(path.clone())?
                .build()
                .await?;

            if ac_proxy.state().await.unwrap_or(0) != NM_ACTIVE_STATE_ACTIVATED {
                continue;
            }

            let conn_type = ac_proxy.connection_type().await.unwrap_or_default();
            let matches = match transport {
                Transport::Wifi => conn_type == "802-11-wireless",
                Transport::Cellular => matches!(conn_type.as_str(), "gsm" | "cdma"),
                Transport::Other => true,
            };
            if matches {
                out.push(NetworkHandle::new(path.as_str()));
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl NetworkObserver for NmStack {
    async fn active_network(&self) -> NetResult<Option<KnownNetwork>> {
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        let primary = nm_proxy.primary_connection().await?;
        if primary.as_str() == "/" {
            return Ok(None);
        }
        let connectivity = self.connectivity().await.unwrap_or(0);
        Ok(Some(self.known_network(&primary, connectivity, true).await?))
    }

    async fn enumerate_networks(&self) -> NetResult<Vec<KnownNetwork>> {
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        let primary = nm_proxy.primary_connection().await.ok();
        let connectivity = self.connectivity().await.unwrap_or(0);

        let mut networks = Vec::new();
        for path in nm_proxy.active_connections().await? {
            let is_primary = primary.as_ref() == Some(&path);
            match self.known_network(&path, connectivity, is_primary).await {
                Ok(net) => networks.push(net),
                Err(e) => warn!("skipping active connection {}: {}", path, e),
            }
        }
        Ok(networks)
    }

    async fn associated_ssid(&self) -> NetResult<Option<String>> {
        let Some(device_path) = self.find_wifi_device().await? else {
            return Ok(None);
        };

        let proxy = WirelessProxy::builder(&self.connection)
            .path(device_path)?
            .build()
            .await?;

        let ap_path = proxy.active_access_point().await?;
        if ap_path.as_str() == "/" {
            return Ok(None);
        }

        let ap_proxy = AccessPointProxy::builder(&self.connection)
            .path(ap_path)?
            .build()
            .await?;
        let bytes = ap_proxy.ssid().await?;
        Ok(Some(String::from_utf8_lossy(&bytes).to_string()))
    }
}

#[async_trait]
impl NetworkBinder for NmStack {
    async fn bind_process_to_network(&self, network: Option<&NetworkHandle>) -> NetResult<bool> {
        let Some(handle) = network else {
            *self.bound.lock().expect("binding state lock poisoned") = None;
            debug!("cleared process network binding");
            return Ok(true);
        };

        let interface = self.interface_for_handle(handle).await?;
        if let Err(e) = probe_bind_to_device(&interface) {
            warn!("SO_BINDTODEVICE probe on {} failed: {}", interface, e);
            return Ok(false);
        }

        *self.bound.lock().expect("binding state lock poisoned") = Some(BoundNetwork {
            handle: handle.clone(),
            interface: interface.clone(),
        });
        debug!("process traffic pinned to {} via {}", handle, interface);
        Ok(true)
    }

    async fn bound_network(&self) -> NetResult<Option<NetworkHandle>> {
        Ok(self
            .bound
            .lock()
            .expect("binding state lock poisoned")
            .as_ref()
            .map(|b| b.handle.clone()))
    }

    async fn enable_network(&self, ssid: &str, password: &str) -> NetResult<bool> {
        let Some(device_path) = self.find_wifi_device().await? else {
            return Ok(false);
        };

        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        let root: OwnedObjectPath = ObjectPath::from_static_str_unchecked("/").into();

        // Prefer a saved profile; otherwise create one against a visible AP.
        if let Some(saved) = self.find_saved_connection_for_ssid(ssid).await? {
            nm_proxy
                .activate_connection(&saved.as_ref(), &device_path.as_ref(), &root.as_ref())
                .await?;
            debug!("activated saved profile for '{}'", ssid);
            return Ok(true);
        }

        let specific = self
            .find_access_point(&device_path, ssid)
            .await?
            .unwrap_or_else(|| root.clone());

        let settings = wifi_connection_settings(ssid, password)?;
        nm_proxy
            .add_and_activate_connection(settings, &device_path.as_ref(), &specific.as_ref())
            .await?;
        debug!("added and activated new profile for '{}'", ssid);
        Ok(true)
    }
}

#[async_trait]
impl NetworkWatcher for NmStack {
    async fn watch_for_availability(&self, transport: Transport) -> NetResult<WatchSubscription> {
        let token = WatchToken::new();

        // Atomically replace any previous registration so two live callbacks
        // can never race to resume the same waiting call.
        {
            let mut slot = self.watch_slot.lock().expect("watch slot lock poisoned");
            if let Some(previous) = slot.take() {
                previous.cancel();
            }
            *slot = Some(token.clone());
        }

        let (tx, rx) = mpsc::channel(16);
        let stack = self.clone();
        let task_token = token.clone();

        // zbus signal matches are awkward to scope per-subscription; periodic
        // polling of ActiveConnections is the simple, reliable approach.
        tokio::spawn(async move {
            let mut known: HashSet<NetworkHandle> = HashSet::new();
            let mut interval = tokio::time::interval(WATCH_POLL_INTERVAL);

            loop {
                interval.tick().await;
                if !task_token.is_live() || tx.is_closed() {
                    break;
                }

                let current: HashSet<NetworkHandle> =
                    match stack.activated_handles(transport).await {
                        Ok(handles) => handles.into_iter().collect(),
                        Err(e) => {
                            debug!("availability poll failed: {}", e);
                            continue;
                        }
                    };

                // The first pass reports every already-activated connection
                // as Available, so an activation that completed before the
                // watch began still wakes the waiter.
                for handle in current.difference(&known) {
                    if tx
                        .send(NetworkNotification::Available(handle.clone()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                for handle in known.difference(&current) {
                    if tx
                        .send(NetworkNotification::Lost(handle.clone()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }

                known = current;
            }
        });

        Ok(WatchSubscription::new(rx, token))
    }
}

/// Probe `SO_BINDTODEVICE` on a scratch UDP socket. Confirms the interface
/// exists and the process is allowed to pin sockets to it.
fn probe_bind_to_device(interface: &str) -> std::io::Result<()> {
    // SAFETY: plain socket/setsockopt/close on a socket we own.
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let ret = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            interface.as_ptr() as *const libc::c_void,
            interface.len() as libc::socklen_t,
        );
        let err = std::io::Error::last_os_error();
        libc::close(fd);
        if ret != 0 {
            return Err(err);
        }
    }
    Ok(())
}

/// Build the NM settings dictionary for a new WiFi profile. Open network
/// when the password is empty (the campus portal SSID is open), WPA-PSK
/// otherwise.
fn wifi_connection_settings(
    ssid: &str,
    password: &str,
) -> NetResult<HashMap<String, HashMap<String, OwnedValue>>> {
    let to_ov = |v: Value<'_>| -> NetResult<OwnedValue> {
        v.try_into()
            .map_err(|e| NetError::NetworkManager(format!("settings value: {e}")))
    };

    let mut connection: HashMap<String, HashMap<String, OwnedValue>> = HashMap::new();

    let mut conn_settings: HashMap<String, OwnedValue> = HashMap::new();
    conn_settings.insert("id".into(), to_ov(Value::from(ssid))?);
    conn_settings.insert("type".into(), to_ov(Value::from("802-11-wireless"))?);
    conn_settings.insert("autoconnect".into(), to_ov(Value::from(true))?);
    connection.insert("connection".into(), conn_settings);

    let mut wifi_settings: HashMap<String, OwnedValue> = HashMap::new();
    wifi_settings.insert("ssid".into(), to_ov(Value::from(ssid.as_bytes().to_vec()))?);
    wifi_settings.insert("mode".into(), to_ov(Value::from("infrastructure"))?);
    connection.insert("802-11-wireless".into(), wifi_settings);

    if !password.is_empty() {
        let mut sec_settings: HashMap<String, OwnedValue> = HashMap::new();
        sec_settings.insert("key-mgmt".into(), to_ov(Value::from("wpa-psk"))?);
        sec_settings.insert("psk".into(), to_ov(Value::from(password))?);
        connection.insert("802-11-wireless-security".into(), sec_settings);

        if let Some(wifi) = connection.get_mut("802-11-wireless") {
            wifi.insert(
                "security".into(),
                to_ov(Value::from("802-11-wireless-security"))?,
            );
        }
    }

    let mut ipv4_settings: HashMap<String, OwnedValue> = HashMap::new();
    ipv4_settings.insert("method".into(), to_ov(Value::from("auto"))?);
    connection.insert("ipv4".into(), ipv4_settings);

    let mut ipv6_settings: HashMap<String, OwnedValue> = HashMap::new();
    ipv6_settings.insert("method".into(), to_ov(Value::from("auto"))?);
    connection.insert("ipv6".into(), ipv6_settings);

    Ok(connection)
}

// ── Safe OwnedValue extraction via pattern matching ───────────────────

fn ov_to_string(v: &OwnedValue) -> Option<String> {
    match &**v {
        Value::Str(s) => Some(s.to_string()),
        _ => None,
    }
}

fn ov_to_bytes(v: &OwnedValue) -> Option<Vec<u8>> {
    match &**v {
        Value::Array(arr) => {
            let mut bytes = Vec::new();
            for item in arr.iter() {
                match item {
                    Value::U8(b) => bytes.push(*b),
                    _ => return None,
                }
            }
            Some(bytes)
        }
        _ => None,
    }
}
