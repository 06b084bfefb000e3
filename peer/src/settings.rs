//! Device settings persisted as a JSON file.
//!
//! The file is written to `<path>.tmp` first and renamed over the original,
//! so a crash mid-write leaves the previous settings intact.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tether_engine::EndpointSet;
use tokio::sync::Mutex;

/// Id given to the endpoint migrated from the legacy single-URL setting.
pub const LEGACY_ENDPOINT_ID: &str = "legacy";

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Endpoint(#[from] tether_engine::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Everything a device persists outside the record store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    /// Configured remotes, at most one active
    pub endpoints: EndpointSet,
    /// Single server URL kept for older installs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_server_url: Option<String>,
    /// Set once the legacy URL has been folded into `endpoints`
    pub legacy_migrated: bool,
    /// Sticky user override suppressing remote calls
    pub offline_mode: bool,
    /// Bearer token of this device's peer server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_token: Option<String>,
    /// Port the peer server last listened on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
}

/// File-backed [`DeviceSettings`] with serialized writes.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<DeviceSettings>,
}

impl SettingsStore {
    /// Load settings from `path`, starting empty when the file is missing.
    ///
    /// A legacy server URL is folded into the endpoint list on the first
    /// load only; the legacy field itself is kept. Later edits or removal of
    /// the migrated endpoint are never undone.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut settings = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<DeviceSettings>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DeviceSettings::default(),
            Err(e) => return Err(e.into()),
        };

        let legacy_url = settings
            .legacy_server_url
            .clone()
            .filter(|url| !url.trim().is_empty());
        if let Some(url) = legacy_url.filter(|_| !settings.legacy_migrated) {
            match settings.endpoints.migrate_legacy(&url, LEGACY_ENDPOINT_ID) {
                Ok(true) => tracing::info!("Migrated legacy server URL into endpoint list"),
                Ok(false) => {}
                Err(e) => tracing::warn!(%url, "Ignoring invalid legacy server URL: {}", e),
            }
            settings.legacy_migrated = true;
            write_atomic(&path, &settings).await?;
        }

        Ok(Self {
            path,
            current: Mutex::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the current settings.
    pub async fn snapshot(&self) -> DeviceSettings {
        self.current.lock().await.clone()
    }

    /// Apply `change` and persist the result.
    ///
    /// The in-memory settings only change once the file is written; a
    /// failing `change` or write leaves both untouched.
    pub async fn update<T>(
        &self,
        change: impl FnOnce(&mut DeviceSettings) -> Result<T>,
    ) -> Result<(T, DeviceSettings)> {
        let mut current = self.current.lock().await;
        let mut next = current.clone();
        let value = change(&mut next)?;

        if next != *current {
            write_atomic(&self.path, &next).await?;
            *current = next.clone();
        }
        Ok((value, next))
    }
}

async fn write_atomic(path: &Path, settings: &DeviceSettings) -> Result<()> {
    let json = serde_json::to_vec_pretty(settings)?;
    let tmp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
