//! Traits for the collaborators the coordinator talks to but does not own:
//! the browser's tab/window API, the bookmark tree, the settings document and
//! the pull-request lookup.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::path::PathBuf;
use tabdeck_core::{BookmarkNode, CreateTab, HostTab, HostWindow, PullRequest, Settings, TabInfo};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("host unavailable: {0}")]
    Unavailable(String),
    #[error("host connection dropped")]
    Disconnected,
    #[error("host rejected {op}: {message}")]
    Rejected { op: String, message: String },
    #[error("host reply for {op} could not be decoded: {message}")]
    Decode { op: String, message: String },
}

#[async_trait]
pub trait TabHost: Send + Sync {
    async fn windows(&self) -> Result<Vec<HostWindow>, HostError>;
    async fn tabs_in_window(&self, window_id: i64) -> Result<Vec<HostTab>, HostError>;
    /// Tabs of the window the host considers current.
    async fn current_window_tabs(&self) -> Result<Vec<HostTab>, HostError>;
    async fn create_tab(&self, request: CreateTab) -> Result<HostTab, HostError>;
    async fn activate_tab(&self, tab_id: i64) -> Result<(), HostError>;
    async fn remove_tab(&self, tab_id: i64) -> Result<(), HostError>;
    async fn duplicate_tab(&self, tab_id: i64) -> Result<(), HostError>;
    async fn move_tab(&self, tab_id: i64, index: i64) -> Result<(), HostError>;
}

#[async_trait]
pub trait BookmarkProvider: Send + Sync {
    async fn bookmark_tree(&self) -> Result<Vec<BookmarkNode>, HostError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("lookup tool unavailable: {0}")]
    Unavailable(String),
    #[error("lookup failed: {0}")]
    Failed(String),
    #[error("lookup returned malformed data: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait PrLookup: Send + Sync {
    async fn open_pull_requests(&self, username: &str) -> Result<Vec<PullRequest>, LookupError>;
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self) -> Result<Settings, SettingsError>;
}

/// Settings document on disk, re-read on every call so edits made by the UI
/// are picked up without a restart.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self) -> Result<Settings, SettingsError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Settings::default());
        }
        serde_json::from_slice(&raw).map_err(|source| SettingsError::Parse {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Fresh snapshot of every open tab across all windows, straight from the
/// host rather than the registry cache. Windows whose tabs cannot be listed
/// are skipped.
pub async fn load_current_tabs(host: &dyn TabHost) -> Result<Vec<TabInfo>, HostError> {
    let windows = host.windows().await?;
    let focused = windows.iter().find(|window| window.focused).map(|w| w.id);
    let per_window = join_all(windows.iter().map(|window| host.tabs_in_window(window.id))).await;

    let mut tabs = Vec::new();
    for (window, result) in windows.iter().zip(per_window) {
        match result {
            Ok(window_tabs) => tabs.extend(
                window_tabs
                    .iter()
                    .filter_map(|tab| tab.to_tab_info(Some(tab.window_id) == focused)),
            ),
            Err(err) => {
                warn!(event = "window_tabs_error", window_id = window.id, error = %err);
            }
        }
    }
    Ok(tabs)
}
