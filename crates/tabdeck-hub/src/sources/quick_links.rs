use super::{CommandSource, FaviconRules, SourceError};
use crate::host::SettingsStore;
use async_trait::async_trait;
use std::sync::Arc;
use tabdeck_core::{Command, CommandType, QuickLink};

/// User-configured links from the settings document.
pub struct QuickLinkSource {
    settings: Arc<dyn SettingsStore>,
    favicons: Arc<FaviconRules>,
}

impl QuickLinkSource {
    pub fn new(settings: Arc<dyn SettingsStore>, favicons: Arc<FaviconRules>) -> Self {
        Self { settings, favicons }
    }
}

#[async_trait]
impl CommandSource for QuickLinkSource {
    fn name(&self) -> &'static str {
        "quick_links"
    }

    async fn load(&self) -> Result<Vec<Command>, SourceError> {
        let settings = self.settings.get().await?;
        Ok(quick_link_commands(&settings.quick_links, &self.favicons))
    }
}

pub fn quick_link_commands(links: &[QuickLink], favicons: &FaviconRules) -> Vec<Command> {
    links
        .iter()
        .enumerate()
        .filter(|(_, link)| !link.url.trim().is_empty())
        .map(|(position, link)| Command {
            kind: CommandType::QuickLink,
            id: CommandType::QuickLink.command_id(&position.to_string()),
            icon: link
                .icon
                .clone()
                .filter(|icon| !icon.is_empty())
                .unwrap_or_else(|| favicons.icon_for(&link.url)),
            url: link.url.clone(),
            title: link.title.clone(),
            sort_date: position as i64,
            is_search_url: None,
            match_indices: None,
        })
        .collect()
}
