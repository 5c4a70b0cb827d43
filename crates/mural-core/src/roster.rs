//! Agent roster persistence
//!
//! The roster is the list of credentialed identities, persisted between
//! runs so that session credentials acquired once can be reused.

use crate::error::ConfigError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Long-lived session cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Cookie domain
    #[serde(default)]
    pub domain: String,
}

/// One credentialed identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Account name; unique within a roster
    pub username: String,
    /// Login secret, if session setup needs it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Session token acquired on a previous run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Session cookies acquired on a previous run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<StoredCookie>,
}

impl AgentIdentity {
    /// Identity with only a username
    #[inline]
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            access_token: None,
            cookies: Vec::new(),
        }
    }

    /// With password
    #[inline]
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Whether a reusable session credential is stored
    #[inline]
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.access_token.is_some() || !self.cookies.is_empty()
    }
}

/// Roster load/save
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Load every identity
    async fn load(&self) -> Result<Vec<AgentIdentity>, ConfigError>;

    /// Persist the roster
    async fn save(&self, roster: &[AgentIdentity]) -> Result<(), ConfigError>;
}

/// JSON file roster
#[derive(Debug, Clone)]
pub struct JsonRosterStore {
    path: PathBuf,
}

impl JsonRosterStore {
    /// Roster stored at `path`
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RosterStore for JsonRosterStore {
    async fn load(&self) -> Result<Vec<AgentIdentity>, ConfigError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::io(&self.path, e))?;
        if content.trim().is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        let roster: Vec<AgentIdentity> = serde_json::from_str(&content)?;
        tracing::debug!("Loaded {} identities from {}", roster.len(), self.path.display());
        Ok(roster)
    }

    async fn save(&self, roster: &[AgentIdentity]) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(roster)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::io(parent, e))?;
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| ConfigError::io(&self.path, e))
    }
}

/// In-memory roster
#[derive(Debug, Default)]
pub struct MemoryRoster {
    identities: Mutex<Vec<AgentIdentity>>,
}

impl MemoryRoster {
    /// Roster holding `identities`
    #[must_use]
    pub fn new(identities: Vec<AgentIdentity>) -> Self {
        Self {
            identities: Mutex::new(identities),
        }
    }

    /// Current content
    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentIdentity> {
        self.identities.lock().clone()
    }
}

#[async_trait]
impl RosterStore for MemoryRoster {
    async fn load(&self) -> Result<Vec<AgentIdentity>, ConfigError> {
        Ok(self.snapshot())
    }

    async fn save(&self, roster: &[AgentIdentity]) -> Result<(), ConfigError> {
        *self.identities.lock() = roster.to_vec();
        Ok(())
    }
}
