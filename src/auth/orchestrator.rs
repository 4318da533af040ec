//! End-to-end authentication state machine.
//!
//! Sequences bind network → settle → invoke login → report result, and
//! publishes ordered progress plus a terminal state along the way. Exactly
//! one attempt per call; retrying is the caller's decision.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::auth::backend::{AuthBackend, SUCCESS_MARKER};
use crate::auth::service;
use crate::bind::WifiConnector;
use crate::error::{AuthError, AuthFailure};
use crate::profiles::AccountProfile;
use crate::progress::{ProgressChannel, StateChannel};

/// Pause between a successful bind and the first authentication request,
/// letting OS route propagation converge. A fixed backoff, not a retry loop.
pub const AUTH_SETTLE: Duration = Duration::from_secs(2);

/// Where the current authentication attempt stands. Transitions only move
/// forward along the pipeline, except that any state may fall to `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    ConnectingWifi,
    WifiConnected,
    Authenticating,
    Success { message: String },
    Error { message: String, stage: &'static str },
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub target_ssid: String,
    pub target_password: String,
    pub settle: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            target_ssid: "SCUNET".into(),
            target_password: String::new(),
            settle: AUTH_SETTLE,
        }
    }
}

pub struct AuthOrchestrator<C, A> {
    connector: C,
    backend: Arc<A>,
    config: AuthConfig,
    state: StateChannel<AuthState>,
    progress: ProgressChannel,
    in_flight: AtomicBool,
}

impl<C, A> AuthOrchestrator<C, A>
where
    C: WifiConnector,
    A: AuthBackend,
{
    pub fn new(connector: C, backend: Arc<A>) -> Self {
        Self::with_config(connector, backend, AuthConfig::default())
    }

    pub fn with_config(connector: C, backend: Arc<A>, config: AuthConfig) -> Self {
        Self {
            connector,
            backend,
            config,
            state: StateChannel::new(AuthState::Idle),
            progress: ProgressChannel::new(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &StateChannel<AuthState> {
        &self.state
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    /// Run one full authentication attempt for `profile`.
    ///
    /// Single-flight: a second call while one is in progress is rejected
    /// without disturbing the running attempt's state or progress trail.
    pub async fn authenticate(&self, profile: &AccountProfile) -> Result<String, AuthError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(AuthError::new(AuthFailure::InProgress, Vec::new()));
        }
        let result = self.run(profile).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run(&self, profile: &AccountProfile) -> Result<String, AuthError> {
        self.progress.reset();
        self.progress.push(format!("account: {}", profile.name));
        self.progress.push(format!("username: {}", profile.username));
        self.progress.push(format!("service: {}", profile.service_type));
        self.progress
            .push(format!("connecting to {} ...", self.config.target_ssid));
        self.state.set(AuthState::ConnectingWifi);

        if let Err(e) = self
            .connector
            .connect(&self.config.target_ssid, &self.config.target_password)
            .await
        {
            return Err(self.fail(AuthFailure::Wifi(e)));
        }

        self.progress.push("Wi-Fi connected");
        self.progress.push("waiting for the network to settle ...");
        self.state.set(AuthState::WifiConnected);

        sleep(self.config.settle).await;

        self.progress.push("starting authentication ...");
        self.state.set(AuthState::Authenticating);

        let extra = serde_json::json!({
            "service": service::backend_value_for(&profile.service_type)
        })
        .to_string();

        // Passed along for diagnostics only: the backend is not guaranteed
        // to honor the process-level binding. If authentication stalls,
        // disable other uplinks.
        debug!(
            "invoking backend, bound network: {:?}",
            self.connector.bound_network()
        );

        let backend = Arc::clone(&self.backend);
        let username = profile.username.clone();
        let password = profile.password.clone();
        let response =
            tokio::task::spawn_blocking(move || backend.login(&username, &password, &extra)).await;

        // A failed attempt releases the binding; only a successful login
        // keeps process traffic pinned.
        let response = match response {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                self.connector.unbind().await;
                return Err(self.fail(AuthFailure::Backend(e.to_string())));
            }
            Err(e) => {
                self.connector.unbind().await;
                return Err(self.fail(AuthFailure::Unexpected(format!(
                    "backend task failed: {e}"
                ))));
            }
        };

        // Content inspection is the whole contract: marker present means
        // success, anything else is the error text to show verbatim.
        if response.contains(SUCCESS_MARKER) {
            self.progress.push(response.clone());
            self.state.set(AuthState::Success {
                message: response.clone(),
            });
            Ok(response)
        } else {
            self.connector.unbind().await;
            Err(self.fail(AuthFailure::Backend(response)))
        }
    }

    /// Log the failure, move to `Error`, and package the full trail.
    fn fail(&self, failure: AuthFailure) -> AuthError {
        let message = failure.to_string();
        self.progress.push(message.clone());
        self.state.set(AuthState::Error {
            message,
            stage: failure.stage(),
        });
        AuthError::new(failure, self.progress.snapshot())
    }
}
