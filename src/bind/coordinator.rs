//! The network-binding state machine.
//!
//! Decides whether the device is already associated with the target SSID,
//! whether the default route already favors it, and how to force-bind or
//! wait-and-bind otherwise. Holds the process-wide [`BindingState`] as its
//! single writer; everyone else reads snapshots.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::bind::WifiConnector;
use crate::error::BindError;
use crate::net::capability::{NetworkBinder, NetworkObserver, NetworkWatcher, WatchToken};
use crate::net::types::{is_wireless_interface, NetworkHandle, NetworkNotification, Transport};

/// Pause between unbind and bind, absorbing OS-side route asynchrony.
pub const BIND_SETTLE: Duration = Duration::from_millis(100);
/// Upper bound on waiting for the target network to become available.
pub const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for the binding state machine. Production uses the defaults;
/// tests inject short values.
#[derive(Debug, Clone)]
pub struct BindConfig {
    pub bind_settle: Duration,
    pub availability_timeout: Duration,
    /// Whether the coordinator may associate with the target SSID itself.
    /// When off, an unassociated radio is reported back to the operator
    /// instead of being fixed programmatically.
    pub associate: bool,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            bind_settle: BIND_SETTLE,
            availability_timeout: AVAILABILITY_TIMEOUT,
            associate: true,
        }
    }
}

/// Process-wide binding bookkeeping.
///
/// `bound` only ever holds a handle returned by a successful bind call made
/// in the same coordinator invocation. At most one watch registration is
/// live at a time.
#[derive(Default)]
struct BindingState {
    bound: Option<NetworkHandle>,
    active_watch: Option<WatchToken>,
}

pub struct WifiConnectionCoordinator<O, B, W> {
    observer: O,
    binder: B,
    watcher: W,
    config: BindConfig,
    state: Arc<Mutex<BindingState>>,
}

impl<O, B, W> WifiConnectionCoordinator<O, B, W>
where
    O: NetworkObserver,
    B: NetworkBinder,
    W: NetworkWatcher + Clone + 'static,
{
    pub fn new(observer: O, binder: B, watcher: W) -> Self {
        Self::with_config(observer, binder, watcher, BindConfig::default())
    }

    pub fn with_config(observer: O, binder: B, watcher: W, config: BindConfig) -> Self {
        Self {
            observer,
            binder,
            watcher,
            config,
            state: Arc::new(Mutex::new(BindingState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, BindingState> {
        self.state.lock().expect("binding state lock poisoned")
    }

    /// Select, validate, and exclusively bind process traffic to the network
    /// named `ssid`.
    ///
    /// Single-flight per call: callers must not issue overlapping calls; the
    /// implementation does not defend against misuse beyond this note.
    pub async fn connect(&self, ssid: &str, password: &str) -> Result<(), BindError> {
        let Some(active) = self.observer.active_network().await? else {
            return Err(BindError::DefaultNotWifi(
                "no default network is active; join the target network first".into(),
            ));
        };

        if active.caps.transport() != Transport::Wifi {
            // Common on devices with cellular data enabled: the radio may
            // already sit on the target SSID while the route goes elsewhere.
            let associated = self.observer.associated_ssid().await.unwrap_or_default();
            let detail = if associated.as_deref() == Some(ssid) {
                format!(
                    "already associated with '{ssid}', but the system prefers another \
                     uplink; disable mobile data or other uplinks and retry"
                )
            } else {
                format!("not associated with '{ssid}'; join it and retry")
            };
            return Err(BindError::DefaultNotWifi(detail));
        }

        let associated = self.observer.associated_ssid().await?;
        if associated.as_deref() == Some(ssid) {
            let handle = self.select_bind_target().await?;
            self.rebind(handle, ssid).await
        } else if self.config.associate {
            self.associate_and_bind(ssid, password).await
        } else {
            Err(BindError::NotAssociated(ssid.to_owned()))
        }
    }

    /// Pick the network object to bind while already associated with the
    /// target SSID.
    ///
    /// Validated/internet flags are deliberately ignored: a captive-portal
    /// network reports no internet capability yet is still the right target.
    /// Selection goes by Wi-Fi transport plus a wireless interface name,
    /// falling back to a fresh read of the active network.
    async fn select_bind_target(&self) -> Result<NetworkHandle, BindError> {
        let networks = self.observer.enumerate_networks().await?;
        let by_interface = networks
            .iter()
            .find(|n| {
                n.caps.transport() == Transport::Wifi
                    && n.caps
                        .interface
                        .as_deref()
                        .is_some_and(is_wireless_interface)
            })
            .map(|n| n.handle.clone());

        if let Some(handle) = by_interface {
            return Ok(handle);
        }

        debug!("no network matched a wireless interface name; trying the active network");
        self.observer
            .active_network()
            .await?
            .filter(|n| n.caps.transport() == Transport::Wifi)
            .map(|n| n.handle)
            .ok_or(BindError::NetworkObjectNotFound)
    }

    /// Unbind any prior binding, wait out the settle delay, then bind.
    async fn rebind(&self, handle: NetworkHandle, ssid: &str) -> Result<(), BindError> {
        // Idempotent: absence of a prior binding is not an error.
        self.binder.bind_process_to_network(None).await?;
        sleep(self.config.bind_settle).await;

        if !self.binder.bind_process_to_network(Some(&handle)).await? {
            return Err(BindError::BindFailed(ssid.to_owned()));
        }
        self.state().bound = Some(handle.clone());
        info!("process traffic bound to {handle}");

        // Diagnostic only; a mismatch is logged, never fatal.
        match self.binder.bound_network().await {
            Ok(Some(reported)) if reported != handle => {
                warn!("OS reports bound network {reported}, expected {handle}");
            }
            Ok(_) => {}
            Err(e) => debug!("could not confirm binding: {e}"),
        }

        self.spawn_loss_monitor(handle);
        Ok(())
    }

    /// Watch for the bound network disappearing underneath us. Loss clears
    /// the recorded binding; re-authentication stays the orchestrator's
    /// (or operator's) call.
    fn spawn_loss_monitor(&self, handle: NetworkHandle) {
        let watcher = self.watcher.clone();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut sub = match watcher.watch_for_availability(Transport::Wifi).await {
                Ok(sub) => sub,
                Err(e) => {
                    debug!("loss monitor could not register: {e}");
                    return;
                }
            };
            let token = sub.token();
            {
                let mut guard = state.lock().expect("binding state lock poisoned");
                if let Some(previous) = guard.active_watch.take() {
                    previous.cancel();
                }
                guard.active_watch = Some(token.clone());
            }

            while let Some(event) = sub.recv().await {
                if event == NetworkNotification::Lost(handle.clone()) {
                    let mut guard = state.lock().expect("binding state lock poisoned");
                    if guard.bound.as_ref() == Some(&handle) {
                        guard.bound = None;
                        warn!("bound network {handle} was lost");
                    }
                    break;
                }
            }

            // Release the slot unless a newer registration replaced us.
            let mut guard = state.lock().expect("binding state lock poisoned");
            if guard
                .active_watch
                .as_ref()
                .is_some_and(|t| t.same_registration(&token))
            {
                guard.active_watch = None;
            }
        });
    }

    /// Ask the OS to associate with the target, then wait (bounded) for a
    /// matching network to become available and bind to it.
    async fn associate_and_bind(&self, ssid: &str, password: &str) -> Result<(), BindError> {
        info!("not associated with '{ssid}'; requesting association");

        // Register the watch before triggering association: an activation
        // that completes before the wait begins must still deliver its
        // notification instead of being lost.
        let mut sub = self.watcher.watch_for_availability(Transport::Wifi).await?;
        {
            let mut state = self.state();
            if let Some(previous) = state.active_watch.take() {
                previous.cancel();
            }
            state.active_watch = Some(sub.token());
        }

        let enabled = match self.binder.enable_network(ssid, password).await {
            Ok(enabled) => enabled,
            Err(e) => {
                self.clear_active_watch();
                return Err(BindError::EnableFailed(e.to_string()));
            }
        };
        if !enabled {
            self.clear_active_watch();
            return Err(BindError::EnableFailed(format!(
                "no wireless device available for '{ssid}'"
            )));
        }

        let waited = self.config.availability_timeout;
        let found = timeout(waited, async {
            while let Some(event) = sub.recv().await {
                if let NetworkNotification::Available(handle) = event {
                    let confirmed = matches!(
                        self.observer.associated_ssid().await,
                        Ok(Some(ref current)) if current == ssid
                    );
                    if confirmed {
                        return Some(handle);
                    }
                    debug!("{handle} became available but target SSID not confirmed yet");
                }
            }
            None
        })
        .await;

        // First of {match, timeout, cancel} wins; make sure the registration
        // is dead before moving on.
        self.clear_active_watch();
        drop(sub);

        match found {
            Ok(Some(handle)) => self.rebind(handle, ssid).await,
            _ => Err(BindError::Timeout {
                ssid: ssid.to_owned(),
                waited,
            }),
        }
    }

    fn clear_active_watch(&self) {
        if let Some(token) = self.state().active_watch.take() {
            token.cancel();
        }
    }

    /// Clear any process binding and cancel any live watch. Never fails.
    pub async fn unbind(&self) {
        if let Err(e) = self.binder.bind_process_to_network(None).await {
            warn!("clearing process binding failed: {e}");
        }
        let mut state = self.state();
        if let Some(token) = state.active_watch.take() {
            token.cancel();
        }
        state.bound = None;
    }

    /// Snapshot of the currently bound network, if any.
    pub fn bound_network(&self) -> Option<NetworkHandle> {
        self.state().bound.clone()
    }
}

#[async_trait]
impl<O, B, W> WifiConnector for WifiConnectionCoordinator<O, B, W>
where
    O: NetworkObserver,
    B: NetworkBinder,
    W: NetworkWatcher + Clone + 'static,
{
    async fn connect(&self, ssid: &str, password: &str) -> Result<(), BindError> {
        WifiConnectionCoordinator::connect(self, ssid, password).await
    }

    async fn unbind(&self) {
        WifiConnectionCoordinator::unbind(self).await;
    }

    fn bound_network(&self) -> Option<NetworkHandle> {
        WifiConnectionCoordinator::bound_network(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::fake::{cellular_network, wifi_network, FakeNet};

    const SSID: &str = "SCUNET";

    fn coordinator(fake: &FakeNet) -> WifiConnectionCoordinator<FakeNet, FakeNet, FakeNet> {
        WifiConnectionCoordinator::new(fake.clone(), fake.clone(), fake.clone())
    }

    async fn settle(fake: &FakeNet, pred: impl Fn(&FakeNet) -> bool) {
        for _ in 0..50 {
            if pred(fake) {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cellular_default_while_associated_reports_remediation() {
        // Scenario A: radio sits on the target, route goes out via cellular.
        let fake = FakeNet::new();
        fake.set_active(Some(cellular_network("/ac/cell")));
        fake.set_associated(Some(SSID));

        let err = coordinator(&fake).connect(SSID, "").await.unwrap_err();
        match err {
            BindError::DefaultNotWifi(detail) => {
                assert!(detail.contains("already associated"), "got: {detail}");
            }
            other => panic!("expected DefaultNotWifi, got {other:?}"),
        }
        assert!(fake.bind_calls().is_empty(), "must not touch the binder");
    }

    #[tokio::test(start_paused = true)]
    async fn no_default_network_fails_without_binding() {
        let fake = FakeNet::new();
        let err = coordinator(&fake).connect(SSID, "").await.unwrap_err();
        assert!(matches!(err, BindError::DefaultNotWifi(_)));
        assert!(fake.bind_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn associated_with_wifi_default_binds_by_interface_name() {
        // Scenario B.
        let fake = FakeNet::new();
        let target = wifi_network("/ac/wifi0", "wlp3s0");
        fake.set_active(Some(target.clone()));
        fake.set_associated(Some(SSID));
        fake.set_networks(vec![cellular_network("/ac/cell"), target.clone()]);

        let coord = coordinator(&fake);
        coord.connect(SSID, "").await.unwrap();

        assert_eq!(coord.bound_network(), Some(target.handle.clone()));
        // unbind-then-bind, in that order
        assert_eq!(
            fake.bind_calls(),
            vec![None, Some(target.handle.clone())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn captive_portal_flags_are_ignored_for_selection() {
        // The selected network reports neither internet nor validated.
        let fake = FakeNet::new();
        let target = wifi_network("/ac/portal", "wlan0");
        assert!(!target.caps.internet && !target.caps.validated);
        fake.set_active(Some(target.clone()));
        fake.set_associated(Some(SSID));
        fake.set_networks(vec![target.clone()]);

        let coord = coordinator(&fake);
        coord.connect(SSID, "").await.unwrap();
        assert_eq!(coord.bound_network(), Some(target.handle));
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_active_network_without_interface_match() {
        let fake = FakeNet::new();
        let active = wifi_network("/ac/wifi0", "wlp3s0");
        fake.set_active(Some(active.clone()));
        fake.set_associated(Some(SSID));
        // Enumeration yields a wifi network on a non-wireless-looking name.
        fake.set_networks(vec![wifi_network("/ac/odd", "p2p0")]);

        let coord = coordinator(&fake);
        coord.connect(SSID, "").await.unwrap();
        assert_eq!(coord.bound_network(), Some(active.handle));
    }

    #[tokio::test(start_paused = true)]
    async fn vanishing_active_network_yields_not_found() {
        let fake = FakeNet::new();
        // Passes the default-route check, then disappears before selection
        // falls back to it.
        fake.queue_active(Some(wifi_network("/ac/wifi0", "wlp3s0")));
        fake.set_associated(Some(SSID));

        let err = coordinator(&fake).connect(SSID, "").await.unwrap_err();
        assert!(matches!(err, BindError::NetworkObjectNotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn bind_refusal_is_reported_and_leaves_no_binding() {
        let fake = FakeNet::new();
        let target = wifi_network("/ac/wifi0", "wlan0");
        fake.set_active(Some(target.clone()));
        fake.set_associated(Some(SSID));
        fake.set_networks(vec![target]);
        fake.set_fail_bind(true);

        let coord = coordinator(&fake);
        let err = coord.connect(SSID, "").await.unwrap_err();
        assert!(matches!(err, BindError::BindFailed(ref s) if s == SSID));
        assert_eq!(coord.bound_network(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unassociated_radio_with_association_disabled() {
        let fake = FakeNet::new();
        fake.set_active(Some(wifi_network("/ac/other", "wlan0")));
        fake.set_associated(Some("OtherNet"));

        let coord = WifiConnectionCoordinator::with_config(
            fake.clone(),
            fake.clone(),
            fake.clone(),
            BindConfig {
                associate: false,
                ..Default::default()
            },
        );
        let err = coord.connect(SSID, "").await.unwrap_err();
        assert!(matches!(err, BindError::NotAssociated(ref s) if s == SSID));
    }

    #[tokio::test(start_paused = true)]
    async fn associates_and_binds_when_network_appears() {
        let fake = FakeNet::new();
        fake.set_active(Some(wifi_network("/ac/other", "wlan0")));
        fake.set_associated(Some("OtherNet"));

        let coord = Arc::new(coordinator(&fake));
        let task = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.connect(SSID, "").await })
        };

        settle(&fake, |f| f.watch_count() == 1).await;
        let handle = NetworkHandle::new("/ac/new");
        fake.emit(NetworkNotification::Available(handle.clone()));

        task.await.unwrap().unwrap();
        assert_eq!(coord.bound_network(), Some(handle));
        assert_eq!(fake.enable_calls(), vec![(SSID.to_owned(), String::new())]);
    }

    #[tokio::test(start_paused = true)]
    async fn availability_timeout_cancels_the_watch() {
        // Scenario E: the target never shows up.
        let fake = FakeNet::new();
        fake.set_active(Some(wifi_network("/ac/other", "wlan0")));
        fake.set_associated(Some("OtherNet"));

        let coord = coordinator(&fake);
        let err = coord.connect(SSID, "").await.unwrap_err();

        assert!(matches!(err, BindError::Timeout { ref ssid, .. } if ssid == SSID));
        assert!(!fake.subscription_live(), "watch must not leak");
        assert_eq!(coord.bound_network(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn activation_completing_before_the_wait_still_binds() {
        // The target can reach the activated state while enable_network is
        // still returning; the registration must already be in place so the
        // notification is buffered, not lost.
        let fake = FakeNet::new();
        fake.set_active(Some(wifi_network("/ac/other", "wlan0")));
        fake.set_associated(Some("OtherNet"));
        let handle = NetworkHandle::new("/ac/new");
        fake.notify_on_enable(NetworkNotification::Available(handle.clone()));

        let coord = coordinator(&fake);
        coord.connect(SSID, "").await.unwrap();
        assert_eq!(coord.bound_network(), Some(handle));
    }

    #[tokio::test(start_paused = true)]
    async fn enable_failure_is_terminal() {
        let fake = FakeNet::new();
        fake.set_active(Some(wifi_network("/ac/other", "wlan0")));
        fake.set_associated(Some("OtherNet"));
        fake.set_enable_error(true);

        let err = coordinator(&fake).connect(SSID, "").await.unwrap_err();
        assert!(matches!(err, BindError::EnableFailed(_)));
        assert!(!fake.subscription_live(), "watch must not outlive the call");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_wireless_device_is_terminal() {
        let fake = FakeNet::new();
        fake.set_active(Some(wifi_network("/ac/other", "wlan0")));
        fake.set_associated(Some("OtherNet"));
        fake.set_enable_ok(false);

        let err = coordinator(&fake).connect(SSID, "").await.unwrap_err();
        assert!(
            matches!(err, BindError::EnableFailed(ref s) if s.contains("no wireless device")),
            "got: {err:?}"
        );
        assert!(!fake.subscription_live(), "watch must not outlive the call");
    }

    #[tokio::test(start_paused = true)]
    async fn unbind_is_idempotent() {
        let fake = FakeNet::new();
        let coord = coordinator(&fake);

        // Nothing bound yet: still fine.
        coord.unbind().await;
        assert_eq!(coord.bound_network(), None);

        let target = wifi_network("/ac/wifi0", "wlan0");
        fake.set_active(Some(target.clone()));
        fake.set_associated(Some(SSID));
        fake.set_networks(vec![target]);
        coord.connect(SSID, "").await.unwrap();
        assert!(coord.bound_network().is_some());

        coord.unbind().await;
        coord.unbind().await;
        assert_eq!(coord.bound_network(), None);
        assert_eq!(fake.bind_calls().last(), Some(&None));
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_bound_network_clears_state_without_rebinding() {
        let fake = FakeNet::new();
        let target = wifi_network("/ac/wifi0", "wlan0");
        fake.set_active(Some(target.clone()));
        fake.set_associated(Some(SSID));
        fake.set_networks(vec![target.clone()]);

        let coord = coordinator(&fake);
        coord.connect(SSID, "").await.unwrap();
        settle(&fake, |f| f.watch_count() == 1).await;
        let binds_before = fake.bind_calls().len();

        fake.emit(NetworkNotification::Lost(target.handle.clone()));
        for _ in 0..50 {
            if coord.bound_network().is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(coord.bound_network(), None);
        assert_eq!(fake.bind_calls().len(), binds_before, "no automatic rebind");
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_loss_monitor_leaves_no_registration() {
        let fake = FakeNet::new();
        let target = wifi_network("/ac/wifi0", "wlan0");
        fake.set_active(Some(target.clone()));
        fake.set_associated(Some(SSID));
        fake.set_networks(vec![target.clone()]);

        let coord = coordinator(&fake);
        coord.connect(SSID, "").await.unwrap();
        settle(&fake, |f| f.watch_count() == 1).await;

        fake.emit(NetworkNotification::Lost(target.handle.clone()));
        settle(&fake, |f| !f.subscription_live()).await;
        assert!(!fake.subscription_live(), "monitor must release its watch");

        // The next attempt starts from a clean slot.
        coord.connect(SSID, "").await.unwrap();
        settle(&fake, |f| f.watch_count() == 2).await;
        assert_eq!(fake.watch_count(), 2);
        assert_eq!(coord.bound_network(), Some(target.handle));
    }

    #[tokio::test(start_paused = true)]
    async fn new_connect_replaces_the_previous_watch() {
        let fake = FakeNet::new();
        let target = wifi_network("/ac/wifi0", "wlan0");
        fake.set_active(Some(target.clone()));
        fake.set_associated(Some(SSID));
        fake.set_networks(vec![target]);

        let coord = coordinator(&fake);
        coord.connect(SSID, "").await.unwrap();
        settle(&fake, |f| f.watch_count() == 1).await;

        coord.connect(SSID, "").await.unwrap();
        settle(&fake, |f| f.watch_count() == 2).await;
        assert_eq!(fake.watch_count(), 2);
    }
}
