//! Fan-out/fan-in over the command sources behind `loadAllCommands`.

use crate::host::PrLookup;
use crate::sources::{CommandSource, PrSource};
use std::collections::HashSet;
use std::sync::Arc;
use tabdeck_core::messages::AggregatedCommandResponse;
use tabdeck_core::{Command, Settings};
use tracing::{debug, warn};

pub struct CommandAggregator {
    open_tabs: Box<dyn CommandSource>,
    bookmarks: Box<dyn CommandSource>,
    closed_tabs: Box<dyn CommandSource>,
    pr_lookup: Arc<dyn PrLookup>,
}

impl CommandAggregator {
    pub fn new(
        open_tabs: Box<dyn CommandSource>,
        bookmarks: Box<dyn CommandSource>,
        closed_tabs: Box<dyn CommandSource>,
        pr_lookup: Arc<dyn PrLookup>,
    ) -> Self {
        Self {
            open_tabs,
            bookmarks,
            closed_tabs,
            pr_lookup,
        }
    }

    /// Runs every source concurrently and waits for all of them. A failing
    /// source contributes an empty list; it never fails the whole response.
    /// Ids are unique across the four lists of the result.
    pub async fn load_all(&self, settings: &Settings) -> AggregatedCommandResponse {
        let prs = PrSource::new(Arc::clone(&self.pr_lookup), settings.github_username());
        let (bookmark_commands, current_tab_commands, closed_tab_commands, pr_commands) = tokio::join!(
            settle(self.bookmarks.as_ref()),
            settle(self.open_tabs.as_ref()),
            settle(self.closed_tabs.as_ref()),
            settle(&prs),
        );

        let mut response = AggregatedCommandResponse {
            bookmark_commands,
            current_tab_commands,
            closed_tab_commands,
            pr_commands,
        };
        dedupe_ids(&mut response);
        response
    }
}

async fn settle(source: &dyn CommandSource) -> Vec<Command> {
    match source.load().await {
        Ok(commands) => commands,
        Err(err) => {
            warn!(
                event = "command_source_failed",
                source = source.name(),
                error = %err
            );
            Vec::new()
        }
    }
}

fn dedupe_ids(response: &mut AggregatedCommandResponse) {
    let mut seen = HashSet::new();
    for list in [
        &mut response.bookmark_commands,
        &mut response.current_tab_commands,
        &mut response.closed_tab_commands,
        &mut response.pr_commands,
    ] {
        list.retain(|command| {
            if seen.insert(command.id.clone()) {
                return true;
            }
            debug!(event = "duplicate_command_dropped", id = %command.id);
            false
        });
    }
}
