// Credential persistence. The record holds the OAuth consumer pair plus
// the durable access token and the short-lived session token, stored as
// JSON in a dotfile in the user's home directory. The store is a trait so
// the lifecycle code (and its tests) never touch a fixed path directly.

use std::cell::RefCell;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Session tokens are issued for ~12 hours; anything older is unusable.
pub const SESSION_LIFETIME_SECS: u64 = 12 * 60 * 60;

const CREDENTIAL_FILE: &str = ".rmlst_credentials.json";

/// On-disk OAuth state. All fields optional: the record starts empty and
/// is filled in as the authorization flow progresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token_time: Option<u64>,
}

impl CredentialRecord {
    /// A durable access token pair implies a prior successful
    /// interactive authorization.
    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some() && self.access_token_secret.is_some()
    }

    /// True when a session token exists and is younger than the
    /// service's session lifetime.
    pub fn session_usable(&self) -> bool {
        let present = self.session_token.is_some() && self.session_token_secret.is_some();
        match (present, self.session_token_time) {
            (true, Some(t)) => epoch_secs().saturating_sub(t) < SESSION_LIFETIME_SECS,
            _ => false,
        }
    }

    pub fn clear_session(&mut self) {
        self.session_token = None;
        self.session_token_secret = None;
        self.session_token_time = None;
    }
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub trait CredentialStore {
    fn load(&self) -> Result<CredentialRecord>;
    fn save(&self, record: &CredentialRecord) -> Result<()>;
}

/// File-backed store at `~/.rmlst_credentials.json`. The record holds
/// secrets, so on Unix the file is restricted to the owning user.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        FileStore { path }
    }

    /// Default per-user location in the home directory.
    pub fn default_location() -> Self {
        let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        FileStore::new(dir.join(CREDENTIAL_FILE))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl CredentialStore for FileStore {
    /// A missing file is not an error: it is simply an empty record.
    fn load(&self) -> Result<CredentialRecord> {
        if !self.path.exists() {
            return Ok(CredentialRecord::default());
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credential file {}", self.path.display()))?;
        let record = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse credential file {}", self.path.display()))?;
        Ok(record)
    }

    fn save(&self, record: &CredentialRecord) -> Result<()> {
        let data = serde_json::to_string_pretty(record).context("Failed to encode credentials")?;
        std::fs::write(&self.path, data)
            .with_context(|| format!("Failed to write credential file {}", self.path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)
                .with_context(|| format!("Failed to restrict {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// In-memory store so tests (and any embedding caller) can run the
/// credential lifecycle without touching the filesystem.
#[derive(Default)]
pub struct MemoryStore {
    record: RefCell<CredentialRecord>,
}

impl MemoryStore {
    pub fn with_record(record: CredentialRecord) -> Self {
        MemoryStore {
            record: RefCell::new(record),
        }
    }

    pub fn snapshot(&self) -> CredentialRecord {
        self.record.borrow().clone()
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<CredentialRecord> {
        Ok(self.record.borrow().clone())
    }

    fn save(&self, record: &CredentialRecord) -> Result<()> {
        *self.record.borrow_mut() = record.clone();
        Ok(())
    }
}
