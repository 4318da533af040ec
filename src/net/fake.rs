//! Scripted in-memory capabilities for unit tests.
//!
//! One `FakeNet` plays all three roles (observer, binder, watcher) so a test
//! can describe an OS scenario up front and then inspect what the state
//! machines did to it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{NetError, NetResult};
use crate::net::capability::{
    NetworkBinder, NetworkObserver, NetworkWatcher, WatchSubscription, WatchToken,
};
use crate::net::types::{KnownNetwork, NetworkHandle, NetworkNotification, Transport};

#[derive(Clone, Default)]
pub struct FakeNet {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    active: Option<KnownNetwork>,
    active_queue: VecDeque<Option<KnownNetwork>>,
    networks: Vec<KnownNetwork>,
    associated: Option<String>,
    fail_bind: bool,
    enable_ok: bool,
    enable_error: bool,
    on_enable: Option<NetworkNotification>,
    bound: Option<NetworkHandle>,
    bind_calls: Vec<Option<NetworkHandle>>,
    enable_calls: Vec<(String, String)>,
    producer: Option<Producer>,
    watch_count: usize,
}

struct Producer {
    tx: mpsc::Sender<NetworkNotification>,
    token: WatchToken,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            active: None,
            active_queue: VecDeque::new(),
            networks: Vec::new(),
            associated: None,
            fail_bind: false,
            enable_ok: true,
            enable_error: false,
            on_enable: None,
            bound: None,
            bind_calls: Vec::new(),
            enable_calls: Vec::new(),
            producer: None,
            watch_count: 0,
        }
    }
}

impl FakeNet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake lock poisoned")
    }

    // ── Scenario scripting ────────────────────────────────────────────

    pub fn set_active(&self, net: Option<KnownNetwork>) {
        self.lock().active = net;
    }

    /// Script a one-shot answer for the next `active_network` query; later
    /// queries fall back to the value from [`set_active`].
    pub fn queue_active(&self, net: Option<KnownNetwork>) {
        self.lock().active_queue.push_back(net);
    }

    pub fn set_networks(&self, nets: Vec<KnownNetwork>) {
        self.lock().networks = nets;
    }

    pub fn set_associated(&self, ssid: Option<&str>) {
        self.lock().associated = ssid.map(str::to_owned);
    }

    pub fn set_fail_bind(&self, fail: bool) {
        self.lock().fail_bind = fail;
    }

    pub fn set_enable_ok(&self, ok: bool) {
        self.lock().enable_ok = ok;
    }

    pub fn set_enable_error(&self, fail: bool) {
        self.lock().enable_error = fail;
    }

    /// Script a notification that activation delivers the moment
    /// `enable_network` succeeds, before any waiter runs.
    pub fn notify_on_enable(&self, notification: NetworkNotification) {
        self.lock().on_enable = Some(notification);
    }

    /// Deliver a notification to the live subscription, if any.
    pub fn emit(&self, notification: NetworkNotification) {
        let guard = self.lock();
        if let Some(producer) = guard.producer.as_ref() {
            if producer.token.is_live() {
                let _ = producer.tx.try_send(notification);
            }
        }
    }

    // ── Inspection ────────────────────────────────────────────────────

    pub fn bind_calls(&self) -> Vec<Option<NetworkHandle>> {
        self.lock().bind_calls.clone()
    }

    pub fn enable_calls(&self) -> Vec<(String, String)> {
        self.lock().enable_calls.clone()
    }

    pub fn watch_count(&self) -> usize {
        self.lock().watch_count
    }

    /// Whether the most recent subscription is still live (not cancelled and
    /// its receiving half not dropped).
    pub fn subscription_live(&self) -> bool {
        let guard = self.lock();
        guard
            .producer
            .as_ref()
            .map(|p| p.token.is_live() && !p.tx.is_closed())
            .unwrap_or(false)
    }
}

#[async_trait]
impl NetworkObserver for FakeNet {
    async fn active_network(&self) -> NetResult<Option<KnownNetwork>> {
        let mut guard = self.lock();
        if let Some(next) = guard.active_queue.pop_front() {
            return Ok(next);
        }
        Ok(guard.active.clone())
    }

    async fn enumerate_networks(&self) -> NetResult<Vec<KnownNetwork>> {
        Ok(self.lock().networks.clone())
    }

    async fn associated_ssid(&self) -> NetResult<Option<String>> {
        Ok(self.lock().associated.clone())
    }
}

#[async_trait]
impl NetworkBinder for FakeNet {
    async fn bind_process_to_network(&self, network: Option<&NetworkHandle>) -> NetResult<bool> {
        let mut guard = self.lock();
        guard.bind_calls.push(network.cloned());
        match network {
            Some(handle) => {
                if guard.fail_bind {
                    return Ok(false);
                }
                guard.bound = Some(handle.clone());
            }
            None => guard.bound = None,
        }
        Ok(true)
    }

    async fn bound_network(&self) -> NetResult<Option<NetworkHandle>> {
        Ok(self.lock().bound.clone())
    }

    async fn enable_network(&self, ssid: &str, password: &str) -> NetResult<bool> {
        let mut guard = self.lock();
        guard.enable_calls.push((ssid.to_owned(), password.to_owned()));
        if guard.enable_error {
            return Err(NetError::NetworkManager("activation rejected".into()));
        }
        if !guard.enable_ok {
            // Trait contract: Ok(false) means no wireless device.
            return Ok(false);
        }
        // A successful enable eventually associates the radio.
        guard.associated = Some(ssid.to_owned());
        if let Some(notification) = guard.on_enable.take() {
            if let Some(producer) = guard.producer.as_ref() {
                if producer.token.is_live() {
                    let _ = producer.tx.try_send(notification);
                }
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl NetworkWatcher for FakeNet {
    async fn watch_for_availability(&self, _transport: Transport) -> NetResult<WatchSubscription> {
        let (tx, rx) = mpsc::channel(16);
        let token = WatchToken::new();

        let mut guard = self.lock();
        if let Some(previous) = guard.producer.take() {
            previous.token.cancel();
        }
        guard.producer = Some(Producer {
            tx,
            token: token.clone(),
        });
        guard.watch_count += 1;

        Ok(WatchSubscription::new(rx, token))
    }
}

/// A wifi network on a wireless-looking interface, ready to bind.
pub fn wifi_network(id: &str, interface: &str) -> KnownNetwork {
    KnownNetwork {
        handle: NetworkHandle::new(id),
        caps: crate::net::types::CapabilitiesSnapshot {
            wifi: true,
            interface: Some(interface.to_owned()),
            ..Default::default()
        },
    }
}

/// A cellular default network, the usual culprit stealing the route.
pub fn cellular_network(id: &str) -> KnownNetwork {
    KnownNetwork {
        handle: NetworkHandle::new(id),
        caps: crate::net::types::CapabilitiesSnapshot {
            cellular: true,
            internet: true,
            validated: true,
            interface: Some("wwan0".to_owned()),
            ..Default::default()
        },
    }
}
