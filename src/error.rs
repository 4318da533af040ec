use std::time::Duration;

use thiserror::Error;

/// Failures from the OS capability layer (D-Bus, sockets).
#[derive(Error, Debug)]
pub enum NetError {
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetworkManager error: {0}")]
    NetworkManager(String),
}

pub type NetResult<T> = Result<T, NetError>;

/// Terminal failures of the network-binding state machine. None of these are
/// retried by the coordinator; retrying is the caller's decision.
#[derive(Error, Debug)]
pub enum BindError {
    /// The OS default route points at something other than Wi-Fi. The message
    /// tells the operator whether they still need to join the target network
    /// or merely need to disable a competing uplink.
    #[error("default route is not Wi-Fi: {0}")]
    DefaultNotWifi(String),

    #[error("not associated with '{0}'; join the network first and retry")]
    NotAssociated(String),

    #[error("no bindable network object found for the current Wi-Fi association")]
    NetworkObjectNotFound,

    #[error("binding process traffic to '{0}' failed")]
    BindFailed(String),

    #[error("could not enable a configuration for the target network: {0}")]
    EnableFailed(String),

    #[error("'{ssid}' did not become available within {}s", waited.as_secs())]
    Timeout { ssid: String, waited: Duration },

    #[error(transparent)]
    Net(#[from] NetError),
}

/// Cause of a failed authentication attempt.
#[derive(Error, Debug)]
pub enum AuthFailure {
    #[error("Wi-Fi connection failed: {0}")]
    Wifi(#[from] BindError),

    #[error("authentication rejected: {0}")]
    Backend(String),

    #[error("another authentication attempt is already in progress")]
    InProgress,

    #[error("unexpected fault: {0}")]
    Unexpected(String),
}

impl AuthFailure {
    /// Stage label reported alongside the error, matching the orchestrator's
    /// state machine stages.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Wifi(_) => "wifi_connection",
            Self::Backend(_) => "authentication",
            Self::InProgress => "busy",
            Self::Unexpected(_) => "unknown",
        }
    }
}

/// Failure of one authentication attempt. Carries the full ordered progress
/// trail so callers can render a complete trace even on failure.
#[derive(Error, Debug)]
#[error("{failure}")]
pub struct AuthError {
    pub failure: AuthFailure,
    pub log: Vec<String>,
}

impl AuthError {
    pub fn new(failure: AuthFailure, log: Vec<String>) -> Self {
        Self { failure, log }
    }

    pub fn stage(&self) -> &'static str {
        self.failure.stage()
    }
}

/// Errors from the on-disk account profile store.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed profile store: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no profile named '{0}'")]
    NotFound(String),
}
