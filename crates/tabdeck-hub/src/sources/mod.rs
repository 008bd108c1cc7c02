//! Independent producers of palette commands. Each source owns no state and
//! recomputes its list on every call.

mod bookmarks;
mod closed_tabs;
mod favicon;
mod open_tabs;
mod pull_requests;
mod quick_links;

pub use bookmarks::{bookmarks_to_commands, BookmarkSource};
pub use closed_tabs::ClosedTabSource;
pub use favicon::FaviconRules;
pub use open_tabs::{current_tab_commands, OpenTabSource};
pub use pull_requests::{pull_request_commands, PrSource};
pub use quick_links::{quick_link_commands, QuickLinkSource};

use crate::host::{HostError, LookupError, SettingsError};
use crate::registry::RegistryError;
use async_trait::async_trait;
use tabdeck_core::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

#[async_trait]
pub trait CommandSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self) -> Result<Vec<Command>, SourceError>;
}
