use super::{CommandSource, SourceError};
use crate::host::TabHost;
use async_trait::async_trait;
use std::sync::Arc;
use tabdeck_core::{Command, CommandType, HostTab, DEFAULT_FAVICON_URL};

/// Tabs of the current window, ranked by their position in the strip.
pub struct OpenTabSource {
    host: Arc<dyn TabHost>,
}

impl OpenTabSource {
    pub fn new(host: Arc<dyn TabHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl CommandSource for OpenTabSource {
    fn name(&self) -> &'static str {
        "open_tabs"
    }

    async fn load(&self) -> Result<Vec<Command>, SourceError> {
        let tabs = self.host.current_window_tabs().await?;
        Ok(current_tab_commands(&tabs))
    }
}

pub fn current_tab_commands(tabs: &[HostTab]) -> Vec<Command> {
    tabs.iter()
        .enumerate()
        .filter_map(|(position, tab)| {
            let id = tab.id?;
            Some(Command {
                kind: CommandType::OpenTab,
                id: CommandType::OpenTab.command_id(&id.to_string()),
                icon: tab
                    .fav_icon_url
                    .clone()
                    .filter(|icon| !icon.is_empty())
                    .unwrap_or_else(|| DEFAULT_FAVICON_URL.to_string()),
                url: tab.url.clone().unwrap_or_default(),
                title: tab.title.clone().unwrap_or_default(),
                sort_date: position as i64,
                is_search_url: None,
                match_indices: None,
            })
        })
        .collect()
}
