use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub mod bridge_ipc;
pub mod messages;

pub const DEFAULT_FAVICON_URL: &str = "https://iterm2.com/favicon.ico";
pub const GITHUB_FAVICON_URL: &str = "https://github.com/favicon.ico";

/// One open or recently closed browser tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fav_icon_url: String,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub index: i64,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub window_id: i64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub in_current_window: bool,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub sort_date: i64,
    /// Epoch millis at which the tab was closed; 0 while open.
    #[serde(default, deserialize_with = "deserialize_number")]
    pub close_date: i64,
}

impl TabInfo {
    pub fn is_closed(&self) -> bool {
        self.close_date > 0
    }

    pub fn to_command(&self, kind: CommandType, source_id: &str, sort_date: i64) -> Command {
        Command {
            kind,
            id: kind.command_id(source_id),
            icon: self.fav_icon_url.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
            sort_date,
            is_search_url: None,
            match_indices: None,
        }
    }
}

/// A tab as reported by the host runtime. Every field may be missing on
/// partially loaded or internal tabs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostTab {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub window_id: i64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub status: Option<String>,
}

impl HostTab {
    /// Live-tab projection. Tabs without an id cannot be addressed later and
    /// are dropped.
    pub fn to_tab_info(&self, in_current_window: bool) -> Option<TabInfo> {
        let id = self.id?;
        Some(TabInfo {
            id: id.to_string(),
            url: self.url.clone().unwrap_or_default(),
            title: self.title.clone().unwrap_or_default(),
            fav_icon_url: self
                .fav_icon_url
                .clone()
                .filter(|icon| !icon.is_empty())
                .unwrap_or_else(|| DEFAULT_FAVICON_URL.to_string()),
            index: self.index,
            window_id: self.window_id,
            pinned: self.pinned,
            in_current_window,
            sort_date: self.index,
            close_date: 0,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostWindow {
    pub id: i64,
    #[serde(default)]
    pub focused: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTab {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i64>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CommandType {
    OpenTab,
    Bookmark,
    ClosedTab,
    Pr,
    QuickLink,
    ExactMatch,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::OpenTab => "open-tab",
            CommandType::Bookmark => "bookmark",
            CommandType::ClosedTab => "closed-tab",
            CommandType::Pr => "pr",
            CommandType::QuickLink => "quick-link",
            CommandType::ExactMatch => "exact-match",
        }
    }

    /// Namespaces a source-local id so ids from different sources never collide.
    pub fn command_id(&self, source_id: &str) -> String {
        format!("{}-{}", self.as_str(), source_id)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A palette suggestion tagged with the source that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub id: String,
    pub icon: String,
    pub url: String,
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub sort_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_search_url: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_indices: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub date_added: Option<f64>,
    #[serde(default)]
    pub date_last_used: Option<f64>,
    #[serde(default)]
    pub children: Vec<BookmarkNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuickLink {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub repository: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The slice of user settings the coordinator reads. Unknown keys are kept
/// so the UI can store whatever else it needs in the same document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub github_username: Option<String>,
    pub quick_links: Vec<QuickLink>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Settings {
    pub fn github_username(&self) -> Option<&str> {
        self.github_username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Deserialize an ID that can be either a string or a number into a String
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

/// Browser timestamps arrive as floating point millis; truncate to i64.
fn deserialize_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom("number out of range")),
        Value::String(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom),
        Value::Null => Ok(0),
        _ => Err(serde::de::Error::custom("expected a number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_are_namespaced_by_type() {
        assert_eq!(CommandType::ClosedTab.command_id("1"), "closed-tab-1");
        assert_eq!(CommandType::OpenTab.command_id("1"), "open-tab-1");
        assert_ne!(
            CommandType::Bookmark.command_id("7"),
            CommandType::QuickLink.command_id("7")
        );
    }

    #[test]
    fn tab_info_accepts_numeric_ids_and_float_dates() {
        let tab: TabInfo = serde_json::from_str(
            r#"{
                "id": 42,
                "url": "https://x.com",
                "title": "X",
                "favIconUrl": "https://x.com/favicon.ico",
                "index": 3,
                "windowId": 9,
                "pinned": true,
                "sortDate": 1707335222222.5,
                "matchIndices": [1, 2]
            }"#,
        )
        .expect("parse tab");
        assert_eq!(tab.id, "42");
        assert_eq!(tab.sort_date, 1_707_335_222_222);
        assert_eq!(tab.close_date, 0);
        assert!(!tab.is_closed());
    }

    #[test]
    fn command_serializes_type_discriminator_and_skips_empty_optionals() {
        let command = Command {
            kind: CommandType::ClosedTab,
            id: "closed-tab-1".to_string(),
            icon: DEFAULT_FAVICON_URL.to_string(),
            url: "https://x.com".to_string(),
            title: "X".to_string(),
            sort_date: 10,
            is_search_url: None,
            match_indices: None,
        };
        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value["type"], "closed-tab");
        assert_eq!(value["sortDate"], 10);
        assert!(value.get("isSearchUrl").is_none());
        assert!(value.get("matchIndices").is_none());
    }

    #[test]
    fn blank_github_username_is_absent() {
        let settings: Settings =
            serde_json::from_str(r#"{"githubUsername": "  ", "theme": "dark"}"#).expect("parse");
        assert_eq!(settings.github_username(), None);
        assert_eq!(settings.extra.get("theme"), Some(&Value::from("dark")));

        let settings: Settings =
            serde_json::from_str(r#"{"githubUsername": "octocat"}"#).expect("parse");
        assert_eq!(settings.github_username(), Some("octocat"));
        assert!(settings.quick_links.is_empty());
    }
}
