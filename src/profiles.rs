//! Saved account profiles.
//!
//! An ordered list of accounts plus a "selected" pointer, persisted as JSON.
//! A collaborator of the authentication core, not part of its correctness.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// One saved account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: String,
    pub name: String,
    pub username: String,
    pub password: String,
    /// Display label or backend value; mapped when the request is built.
    pub service_type: String,
}

impl AccountProfile {
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        service_type: impl Into<String>,
    ) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
            username: username.into(),
            password: password.into(),
            service_type: service_type.into(),
        }
    }
}

/// Unique enough for a single on-disk store: wall clock plus a counter.
fn next_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}-{n:x}")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    accounts: Vec<AccountProfile>,
    selected: Option<String>,
}

pub struct ProfileStore {
    path: PathBuf,
    data: StoreFile,
}

impl ProfileStore {
    /// Open the store at `path`; a missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, data })
    }

    pub fn accounts(&self) -> &[AccountProfile] {
        &self.data.accounts
    }

    /// Append an account. The first account ever added becomes the
    /// selection automatically.
    pub fn add(&mut self, profile: AccountProfile) -> Result<(), ProfileError> {
        if self.data.accounts.is_empty() {
            self.data.selected = Some(profile.id.clone());
        }
        self.data.accounts.push(profile);
        self.persist()
    }

    pub fn delete(&mut self, id: &str) -> Result<(), ProfileError> {
        self.data.accounts.retain(|a| a.id != id);
        if self.data.selected.as_deref() == Some(id) {
            self.data.selected = None;
        }
        self.persist()
    }

    pub fn select(&mut self, id: &str) -> Result<(), ProfileError> {
        if !self.data.accounts.iter().any(|a| a.id == id) {
            return Err(ProfileError::NotFound(id.to_owned()));
        }
        self.data.selected = Some(id.to_owned());
        self.persist()
    }

    pub fn selected(&self) -> Option<&AccountProfile> {
        let id = self.data.selected.as_deref()?;
        self.data.accounts.iter().find(|a| a.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&AccountProfile> {
        self.data.accounts.iter().find(|a| a.name == name)
    }

    fn persist(&self) -> Result<(), ProfileError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}
