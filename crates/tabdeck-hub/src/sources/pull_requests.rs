use super::{CommandSource, SourceError};
use crate::host::PrLookup;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tabdeck_core::{Command, CommandType, PullRequest, GITHUB_FAVICON_URL};

/// Open pull requests authored by the configured user. Without a username
/// there is nothing to look up and the source is empty.
pub struct PrSource {
    lookup: Arc<dyn PrLookup>,
    username: Option<String>,
}

impl PrSource {
    pub fn new(lookup: Arc<dyn PrLookup>, username: Option<&str>) -> Self {
        Self {
            lookup,
            username: username
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }
}

#[async_trait]
impl CommandSource for PrSource {
    fn name(&self) -> &'static str {
        "pull_requests"
    }

    async fn load(&self) -> Result<Vec<Command>, SourceError> {
        let Some(username) = self.username.as_deref() else {
            return Ok(Vec::new());
        };
        let prs = self.lookup.open_pull_requests(username).await?;
        Ok(pull_request_commands(&prs))
    }
}

pub fn pull_request_commands(prs: &[PullRequest]) -> Vec<Command> {
    let mut seen = HashSet::new();
    prs.iter()
        .filter_map(|pr| {
            let source_id = format!("{}#{}", pr.repository, pr.number);
            if !seen.insert(source_id.clone()) {
                return None;
            }
            Some(Command {
                kind: CommandType::Pr,
                id: CommandType::Pr.command_id(&source_id),
                icon: GITHUB_FAVICON_URL.to_string(),
                url: pr.url.clone(),
                title: format!("{source_id} {}", pr.title),
                sort_date: pr
                    .updated_at
                    .map(|updated| updated.timestamp_millis())
                    .unwrap_or_default(),
                is_search_url: None,
                match_indices: None,
            })
        })
        .collect()
}
