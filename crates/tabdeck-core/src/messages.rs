//! Request/response contract between page-level scripts and the coordinator.
//!
//! Pages send loose JSON objects where exactly one discriminating field is
//! present (`{"directive": "loadAllCommands"}`, `{"openTabUrl": "..."}`, ...).
//! [`Request::classify`] turns that shape into a closed sum type once, at the
//! boundary; everything past it matches exhaustively on [`Request`].

use crate::{Command, PullRequest, TabInfo};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Index handed to the host when the real tab count is unknown. Hosts clamp
/// out-of-range indices to the end of the strip.
pub const FAR_RIGHT_FALLBACK_INDEX: i64 = 123_231_123;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Directive {
    OpenExtensions,
    CloseCurrentTab,
    DuplicateTab,
    LoadAllCommands,
    LoadCurrentTabs,
    LoadClosedTabCommands,
    LoadQuickLinks,
}

impl Directive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::OpenExtensions => "openExtensions",
            Directive::CloseCurrentTab => "closeCurrentTab",
            Directive::DuplicateTab => "duplicateTab",
            Directive::LoadAllCommands => "loadAllCommands",
            Directive::LoadCurrentTabs => "loadCurrentTabs",
            Directive::LoadClosedTabCommands => "loadClosedTabCommands",
            Directive::LoadQuickLinks => "loadQuickLinks",
        }
    }

    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            Directive::LoadAllCommands
                | Directive::LoadCurrentTabs
                | Directive::LoadClosedTabCommands
                | Directive::LoadQuickLinks
        )
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Directive {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "openExtensions" => Ok(Directive::OpenExtensions),
            "closeCurrentTab" => Ok(Directive::CloseCurrentTab),
            "duplicateTab" => Ok(Directive::DuplicateTab),
            "loadAllCommands" => Ok(Directive::LoadAllCommands),
            "loadCurrentTabs" => Ok(Directive::LoadCurrentTabs),
            "loadClosedTabCommands" => Ok(Directive::LoadClosedTabCommands),
            "loadQuickLinks" => Ok(Directive::LoadQuickLinks),
            other => Err(format!("Unknown directive: {other}")),
        }
    }
}

/// How far to move the sender's tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOffset {
    /// Signed offset from the sender's current index.
    Relative(i64),
    /// The `"0"` sentinel: move to index 0.
    First,
    /// Any other string sentinel: move to the far right.
    Last,
}

impl MoveOffset {
    /// Resolves the target index. `window_tab_count` is only consulted for
    /// [`MoveOffset::Last`]; without it the far-right fallback index is used.
    pub fn target_index(&self, sender_index: i64, window_tab_count: Option<usize>) -> i64 {
        match self {
            MoveOffset::Relative(offset) => sender_index.saturating_add(*offset).max(0),
            MoveOffset::First => 0,
            MoveOffset::Last => window_tab_count
                .and_then(|count| i64::try_from(count).ok())
                .unwrap_or(FAR_RIGHT_FALLBACK_INDEX),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Directive(Directive),
    OpenTabUrl(String),
    SwitchToTab(i64),
    RemoveTab(i64),
    ReopenTab(Box<TabInfo>),
    MoveTab(MoveOffset),
    LoadPrs(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(default)]
    directive: Option<Value>,
    #[serde(default)]
    open_tab_url: Option<Value>,
    #[serde(default)]
    switch_to_tab_id: Option<Value>,
    #[serde(default)]
    remove_tab_id: Option<Value>,
    #[serde(default)]
    reopen_tab: Option<Value>,
    #[serde(default)]
    move_tab_offset: Option<Value>,
    #[serde(default, rename = "loadPRsForGithubUsername")]
    load_prs_for_github_username: Option<Value>,
}

impl Request {
    /// Classifies a loose message shape. Returns `None` for anything that is
    /// not understood so callers can ignore it without failing.
    ///
    /// Fields are checked in a fixed precedence order; the first one present
    /// decides the variant.
    pub fn classify(message: &Value) -> Option<Request> {
        if !message.is_object() {
            return None;
        }
        let raw = RawMessage::deserialize(message).ok()?;

        if let Some(directive) = raw.directive.as_ref().and_then(Value::as_str) {
            if !directive.is_empty() {
                return directive.parse().ok().map(Request::Directive);
            }
        }
        if let Some(url) = raw.open_tab_url {
            return url.as_str().map(|url| Request::OpenTabUrl(url.to_string()));
        }
        if let Some(tab_id) = raw.switch_to_tab_id {
            return tab_id_from_value(&tab_id).map(Request::SwitchToTab);
        }
        if let Some(tab_id) = raw.remove_tab_id {
            return tab_id_from_value(&tab_id).map(Request::RemoveTab);
        }
        if let Some(descriptor) = raw.reopen_tab {
            return serde_json::from_value::<TabInfo>(descriptor)
                .ok()
                .map(|tab| Request::ReopenTab(Box::new(tab)));
        }
        if let Some(offset) = raw.move_tab_offset {
            return move_offset_from_value(&offset).map(Request::MoveTab);
        }
        if let Some(username) = raw.load_prs_for_github_username {
            return username
                .as_str()
                .filter(|name| !name.is_empty())
                .map(|name| Request::LoadPrs(name.to_string()));
        }
        None
    }

    /// Inverse of [`Request::classify`], used by clients building messages.
    pub fn to_message(&self) -> Value {
        match self {
            Request::Directive(directive) => json!({ "directive": directive.as_str() }),
            Request::OpenTabUrl(url) => json!({ "openTabUrl": url }),
            Request::SwitchToTab(tab_id) => json!({ "switchToTabId": tab_id }),
            Request::RemoveTab(tab_id) => json!({ "removeTabId": tab_id }),
            Request::ReopenTab(tab) => json!({ "reopenTab": tab }),
            Request::MoveTab(MoveOffset::Relative(offset)) => json!({ "moveTabOffset": offset }),
            Request::MoveTab(MoveOffset::First) => json!({ "moveTabOffset": "0" }),
            Request::MoveTab(MoveOffset::Last) => json!({ "moveTabOffset": "end" }),
            Request::LoadPrs(username) => json!({ "loadPRsForGithubUsername": username }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Directive(directive) => directive.as_str(),
            Request::OpenTabUrl(_) => "openTabUrl",
            Request::SwitchToTab(_) => "switchToTabId",
            Request::RemoveTab(_) => "removeTabId",
            Request::ReopenTab(_) => "reopenTab",
            Request::MoveTab(_) => "moveTabOffset",
            Request::LoadPrs(_) => "loadPRsForGithubUsername",
        }
    }

    pub fn expects_response(&self) -> bool {
        match self {
            Request::Directive(directive) => directive.expects_response(),
            Request::ReopenTab(_) | Request::LoadPrs(_) => true,
            Request::OpenTabUrl(_)
            | Request::SwitchToTab(_)
            | Request::RemoveTab(_)
            | Request::MoveTab(_) => false,
        }
    }
}

fn tab_id_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn move_offset_from_value(value: &Value) -> Option<MoveOffset> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(MoveOffset::Relative),
        Value::String(s) if s == "0" => Some(MoveOffset::First),
        Value::String(_) => Some(MoveOffset::Last),
        _ => None,
    }
}

/// The tab a request came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SenderTab {
    pub id: i64,
    pub index: i64,
    #[serde(default)]
    pub window_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedCommandResponse {
    pub bookmark_commands: Vec<Command>,
    pub current_tab_commands: Vec<Command>,
    pub closed_tab_commands: Vec<Command>,
    pub pr_commands: Vec<Command>,
}

impl AggregatedCommandResponse {
    pub fn all_commands(&self) -> impl Iterator<Item = &Command> {
        self.bookmark_commands
            .iter()
            .chain(self.current_tab_commands.iter())
            .chain(self.closed_tab_commands.iter())
            .chain(self.pr_commands.iter())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTabsResponse {
    pub current_tabs: Vec<TabInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTabCommandsResponse {
    pub closed_tab_commands: Vec<Command>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuickLinksResponse {
    pub quick_links: Vec<Command>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrsResponse {
    pub prs: Vec<PullRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Response {
    AllCommands(AggregatedCommandResponse),
    CurrentTabs(CurrentTabsResponse),
    ClosedTabCommands(ClosedTabCommandsResponse),
    QuickLinks(QuickLinksResponse),
    Prs(PrsResponse),
}

impl Response {
    /// Same response shape with every list cleared.
    pub fn emptied(&self) -> Response {
        match self {
            Response::AllCommands(_) => Response::AllCommands(AggregatedCommandResponse::default()),
            Response::CurrentTabs(_) => Response::CurrentTabs(CurrentTabsResponse::default()),
            Response::ClosedTabCommands(_) => {
                Response::ClosedTabCommands(ClosedTabCommandsResponse::default())
            }
            Response::QuickLinks(_) => Response::QuickLinks(QuickLinksResponse::default()),
            Response::Prs(_) => Response::Prs(PrsResponse::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_every_directive() {
        for directive in [
            Directive::OpenExtensions,
            Directive::CloseCurrentTab,
            Directive::DuplicateTab,
            Directive::LoadAllCommands,
            Directive::LoadCurrentTabs,
            Directive::LoadClosedTabCommands,
            Directive::LoadQuickLinks,
        ] {
            let message = json!({ "directive": directive.as_str() });
            assert_eq!(
                Request::classify(&message),
                Some(Request::Directive(directive))
            );
        }
    }

    #[test]
    fn unknown_or_malformed_shapes_are_not_classified() {
        assert_eq!(Request::classify(&json!({ "directive": "selfDestruct" })), None);
        assert_eq!(Request::classify(&json!({ "somethingNew": true })), None);
        assert_eq!(Request::classify(&json!("loadAllCommands")), None);
        assert_eq!(Request::classify(&json!({ "switchToTabId": "abc" })), None);
        assert_eq!(Request::classify(&json!({ "openTabUrl": 7 })), None);
        assert_eq!(Request::classify(&json!({ "reopenTab": { "url": "x" } })), None);
        assert_eq!(Request::classify(&json!({ "loadPRsForGithubUsername": "" })), None);
        assert_eq!(Request::classify(&json!({ "moveTabOffset": [1] })), None);
    }

    #[test]
    fn directive_takes_precedence_over_data_fields() {
        let message = json!({ "directive": "duplicateTab", "openTabUrl": "https://x.com" });
        assert_eq!(
            Request::classify(&message),
            Some(Request::Directive(Directive::DuplicateTab))
        );
        let message = json!({ "directive": "", "removeTabId": 4 });
        assert_eq!(Request::classify(&message), Some(Request::RemoveTab(4)));
    }

    #[test]
    fn move_offset_sentinels() {
        assert_eq!(
            Request::classify(&json!({ "moveTabOffset": -2 })),
            Some(Request::MoveTab(MoveOffset::Relative(-2)))
        );
        assert_eq!(
            Request::classify(&json!({ "moveTabOffset": "0" })),
            Some(Request::MoveTab(MoveOffset::First))
        );
        assert_eq!(
            Request::classify(&json!({ "moveTabOffset": "end" })),
            Some(Request::MoveTab(MoveOffset::Last))
        );
    }

    #[test]
    fn move_offset_target_index() {
        assert_eq!(MoveOffset::First.target_index(17, Some(20)), 0);
        assert_eq!(MoveOffset::Relative(1).target_index(3, None), 4);
        assert_eq!(MoveOffset::Relative(-5).target_index(3, None), 0);
        assert_eq!(MoveOffset::Last.target_index(0, Some(12)), 12);
        assert!(MoveOffset::Last.target_index(0, None) >= 10_000);
    }

    #[test]
    fn reopen_tab_descriptor_round_trips_through_message() {
        let tab = TabInfo {
            id: "9".to_string(),
            url: "https://x.com".to_string(),
            title: "X".to_string(),
            fav_icon_url: String::new(),
            index: 2,
            window_id: 1,
            pinned: false,
            in_current_window: true,
            sort_date: 2,
            close_date: 1_707_335_222_222,
        };
        let request = Request::ReopenTab(Box::new(tab));
        assert_eq!(Request::classify(&request.to_message()), Some(request));
    }

    #[test]
    fn emptied_response_keeps_its_shape() {
        let response = Response::CurrentTabs(CurrentTabsResponse {
            current_tabs: vec![TabInfo {
                id: "1".to_string(),
                url: "https://x.com".to_string(),
                title: "X".to_string(),
                fav_icon_url: String::new(),
                index: 0,
                window_id: 1,
                pinned: false,
                in_current_window: true,
                sort_date: 0,
                close_date: 0,
            }],
        });
        assert_eq!(
            serde_json::to_value(response.emptied()).expect("serialize"),
            json!({ "currentTabs": [] })
        );
    }

    #[test]
    fn response_serializes_without_variant_tag() {
        let response = Response::ClosedTabCommands(ClosedTabCommandsResponse::default());
        assert_eq!(
            serde_json::to_value(&response).expect("serialize"),
            json!({ "closedTabCommands": [] })
        );
        let response = Response::AllCommands(AggregatedCommandResponse::default());
        let value = serde_json::to_value(&response).expect("serialize");
        for field in [
            "bookmarkCommands",
            "currentTabCommands",
            "closedTabCommands",
            "prCommands",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }
}
