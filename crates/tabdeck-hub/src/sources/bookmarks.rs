use super::{CommandSource, FaviconRules, SourceError};
use crate::host::BookmarkProvider;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tabdeck_core::{BookmarkNode, Command, CommandType};

const BOOKMARKS_BAR_TITLE: &str = "Bookmarks Bar";
const BREADCRUMB_SEPARATOR: &str = " > ";

pub struct BookmarkSource {
    provider: Arc<dyn BookmarkProvider>,
    favicons: Arc<FaviconRules>,
}

impl BookmarkSource {
    pub fn new(provider: Arc<dyn BookmarkProvider>, favicons: Arc<FaviconRules>) -> Self {
        Self { provider, favicons }
    }
}

#[async_trait]
impl CommandSource for BookmarkSource {
    fn name(&self) -> &'static str {
        "bookmarks"
    }

    async fn load(&self) -> Result<Vec<Command>, SourceError> {
        let tree = self.provider.bookmark_tree().await?;
        Ok(bookmarks_to_commands(&tree, &self.favicons))
    }
}

struct FlatBookmark<'a> {
    node: &'a BookmarkNode,
    parent_id: Option<&'a str>,
}

/// Flattens the bookmark bar into leaf commands titled with their folder
/// breadcrumb (`Work > Infra > Grafana`).
pub fn bookmarks_to_commands(roots: &[BookmarkNode], favicons: &FaviconRules) -> Vec<Command> {
    let top_level = bookmark_bar_children(roots);

    let mut flattened = Vec::new();
    for node in top_level {
        flatten_into(node, None, &mut flattened);
    }
    // Folders are created before their contents, so ordering by id puts every
    // parent ahead of its children.
    flattened.sort_by(|a, b| compare_ids(&a.node.id, &b.node.id));

    let mut full_titles: HashMap<&str, String> = HashMap::with_capacity(flattened.len());
    for bookmark in &flattened {
        let full_title = match bookmark.parent_id.and_then(|id| full_titles.get(id)) {
            Some(parent) => format!("{parent}{BREADCRUMB_SEPARATOR}{}", bookmark.node.title),
            None => bookmark.node.title.clone(),
        };
        full_titles.insert(bookmark.node.id.as_str(), full_title);
    }

    flattened
        .iter()
        .filter_map(|bookmark| {
            let node = bookmark.node;
            let url = node.url.as_deref().filter(|url| !url.is_empty())?;
            let sort_date = node.date_last_used.or(node.date_added).unwrap_or_default() as i64;
            Some(Command {
                kind: CommandType::Bookmark,
                id: CommandType::Bookmark.command_id(&node.id),
                icon: favicons.icon_for(url),
                url: url.to_string(),
                title: full_titles
                    .get(node.id.as_str())
                    .cloned()
                    .unwrap_or_else(|| node.title.clone()),
                sort_date,
                is_search_url: None,
                match_indices: None,
            })
        })
        .collect()
}

fn bookmark_bar_children(roots: &[BookmarkNode]) -> Vec<&BookmarkNode> {
    let Some(root) = roots.first() else {
        return Vec::new();
    };
    match root
        .children
        .iter()
        .find(|node| node.title == BOOKMARKS_BAR_TITLE)
    {
        Some(bar) => bar.children.iter().collect(),
        None => root.children.iter().collect(),
    }
}

fn flatten_into<'a>(
    node: &'a BookmarkNode,
    tree_parent: Option<&'a str>,
    out: &mut Vec<FlatBookmark<'a>>,
) {
    out.push(FlatBookmark {
        node,
        parent_id: node.parent_id.as_deref().or(tree_parent),
    });
    for child in &node.children {
        flatten_into(child, Some(node.id.as_str()), out);
    }
}

fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
