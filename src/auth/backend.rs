//! The external authentication backend boundary.
//!
//! The portal login protocol lives in a separately versioned helper; this
//! side only hands over credentials and reads back a line of text. Success
//! detection is a substring match against the marker the helper prints.

use std::io;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

/// Marker the backend includes in a successful response ("登录成功" etc.).
pub const SUCCESS_MARKER: &str = "成功";

/// Narrow boundary to the external authenticator. Synchronous and allowed to
/// block; callers dispatch it off the async runtime.
pub trait AuthBackend: Send + Sync + 'static {
    /// Perform the portal login. `extra_json` carries
    /// `{"service": <backend value>}`. The returned text is the backend's
    /// verbatim response.
    fn login(&self, username: &str, password: &str, extra_json: &str) -> io::Result<String>;
}

/// Runs the packaged helper binary with the credentials as arguments and
/// captures stdout as the response.
pub struct ExecBackend {
    program: PathBuf,
}

impl ExecBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl AuthBackend for ExecBackend {
    fn login(&self, username: &str, password: &str, extra_json: &str) -> io::Result<String> {
        debug!("invoking {} for '{}'", self.program.display(), username);
        let output = Command::new(&self.program)
            .arg(username)
            .arg(password)
            .arg(extra_json)
            .output()?;

        let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            text = String::from_utf8_lossy(&output.stderr).trim().to_string();
        }
        if text.is_empty() {
            text = format!("backend produced no output (status {})", output.status);
        }
        Ok(text)
    }
}
