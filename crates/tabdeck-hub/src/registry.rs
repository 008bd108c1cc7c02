//! Open-tab map and bounded closed-tab history.
//!
//! [`TabRegistry`] is plain state with the eviction policy; [`RegistryActor`]
//! owns one inside a single task so host lifecycle events are applied one at
//! a time in arrival order. Everything else talks to it through a
//! [`RegistryHandle`].

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tabdeck_core::{Command, CommandType, HostTab, TabInfo, DEFAULT_FAVICON_URL};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

pub const DEFAULT_CLOSED_TAB_CAPACITY: usize = 50;
const REGISTRY_QUEUE_CAPACITY: usize = 256;
const STATUS_COMPLETE: &str = "complete";

#[cfg(test)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub open_tabs: Vec<TabInfo>,
    pub closed_tabs: Vec<TabInfo>,
}

#[derive(Debug)]
pub struct TabRegistry {
    open_tabs: HashMap<String, TabInfo>,
    /// Newest first.
    closed_tabs: VecDeque<TabInfo>,
    capacity: usize,
}

impl Default for TabRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CLOSED_TAB_CAPACITY)
    }
}

impl TabRegistry {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            open_tabs: HashMap::new(),
            closed_tabs: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Tracks a tab once it has finished loading on a secure origin.
    /// Returns whether the registry changed.
    pub fn on_tab_updated(&mut self, tab_id: i64, status: Option<&str>, tab: &HostTab) -> bool {
        if status != Some(STATUS_COMPLETE) {
            return false;
        }
        let Some(url) = tab.url.as_deref() else {
            return false;
        };
        if tab.id.is_none() || !is_secure_url(url) {
            return false;
        }

        let id = tab_id.to_string();
        let info = TabInfo {
            id: id.clone(),
            url: url.to_string(),
            title: tab.title.clone().unwrap_or_default(),
            fav_icon_url: tab
                .fav_icon_url
                .clone()
                .filter(|icon| !icon.is_empty())
                .unwrap_or_else(|| DEFAULT_FAVICON_URL.to_string()),
            index: tab.index,
            window_id: tab.window_id,
            pinned: tab.pinned,
            in_current_window: false,
            sort_date: tab.index,
            close_date: 0,
        };
        self.open_tabs.insert(id, info);
        true
    }

    /// Moves a tracked tab into the closed history. Untracked ids are ignored.
    pub fn on_tab_removed(&mut self, tab_id: i64, now_ms: i64) -> Option<&TabInfo> {
        let mut tab = self.open_tabs.remove(&tab_id.to_string())?;
        // Keep the history newest-first even if the wall clock steps back.
        let newest = self.closed_tabs.front().map_or(0, |latest| latest.close_date);
        tab.close_date = now_ms.max(newest).max(1);
        self.closed_tabs.push_front(tab);
        self.closed_tabs.truncate(self.capacity);
        self.closed_tabs.front()
    }

    pub fn closed_tab_commands(&self) -> Vec<Command> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        self.closed_tabs
            .iter()
            .map(|tab| {
                let count = seen.entry(tab.id.as_str()).or_insert(0);
                let source_id = if *count == 0 {
                    tab.id.clone()
                } else {
                    format!("{}-{}", tab.id, count)
                };
                *count += 1;
                tab.to_command(CommandType::ClosedTab, &source_id, tab.close_date)
            })
            .collect()
    }

    pub fn open_tab(&self, tab_id: &str) -> Option<&TabInfo> {
        self.open_tabs.get(tab_id)
    }

    pub fn open_len(&self) -> usize {
        self.open_tabs.len()
    }

    pub fn closed_tabs(&self) -> impl Iterator<Item = &TabInfo> {
        self.closed_tabs.iter()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut open_tabs = self.open_tabs.values().cloned().collect::<Vec<_>>();
        open_tabs.sort_by(|a, b| (a.window_id, a.index, &a.id).cmp(&(b.window_id, b.index, &b.id)));
        RegistrySnapshot {
            open_tabs,
            closed_tabs: self.closed_tabs.iter().cloned().collect(),
        }
    }
}

fn is_secure_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|url| url.scheme() == "https")
        .unwrap_or(false)
}

#[derive(Debug)]
pub enum RegistryCommand {
    TabUpdated {
        tab_id: i64,
        status: Option<String>,
        tab: HostTab,
    },
    TabRemoved {
        tab_id: i64,
    },
    ClosedTabCommands {
        reply: oneshot::Sender<Vec<Command>>,
    },
    #[cfg(test)]
    Snapshot {
        reply: oneshot::Sender<RegistrySnapshot>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("tab registry has stopped")]
    Stopped,
}

pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    registry: TabRegistry,
    clock: fn() -> i64,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, registry: TabRegistry) -> Self {
        Self {
            receiver,
            registry,
            clock: now_ms,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Processes commands until every handle has been dropped.
    pub async fn run(mut self) {
        info!(event = "registry_start", capacity = self.registry.capacity());
        while let Some(command) = self.receiver.recv().await {
            self.handle_command(command);
        }
        info!(event = "registry_stop");
    }

    fn handle_command(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::TabUpdated {
                tab_id,
                status,
                tab,
            } => {
                if self.registry.on_tab_updated(tab_id, status.as_deref(), &tab) {
                    debug!(
                        event = "tab_tracked",
                        tab_id,
                        open = self.registry.open_len()
                    );
                }
            }
            RegistryCommand::TabRemoved { tab_id } => {
                let now = (self.clock)();
                if self.registry.on_tab_removed(tab_id, now).is_some() {
                    debug!(
                        event = "tab_closed",
                        tab_id,
                        closed = self.registry.closed_tabs.len()
                    );
                }
            }
            RegistryCommand::ClosedTabCommands { reply } => {
                let _ = reply.send(self.registry.closed_tab_commands());
            }
            #[cfg(test)]
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Starts a registry actor on the current runtime.
    pub fn spawn(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_QUEUE_CAPACITY);
        tokio::spawn(RegistryActor::new(receiver, TabRegistry::new(capacity)).run());
        Self { sender }
    }

    pub fn from_sender(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    pub async fn tab_updated(
        &self,
        tab_id: i64,
        status: Option<String>,
        tab: HostTab,
    ) -> Result<(), RegistryError> {
        self.send(RegistryCommand::TabUpdated {
            tab_id,
            status,
            tab,
        })
        .await
    }

    pub async fn tab_removed(&self, tab_id: i64) -> Result<(), RegistryError> {
        self.send(RegistryCommand::TabRemoved { tab_id }).await
    }

    pub async fn closed_tab_commands(&self) -> Result<Vec<Command>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::ClosedTabCommands { reply }).await?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| RegistryError::Stopped)
    }

    async fn send(&self, command: RegistryCommand) -> Result<(), RegistryError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| RegistryError::Stopped)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::host_tab;

    fn track(registry: &mut TabRegistry, id: i64, index: i64, url: &str) {
        let tab = host_tab(id, 1, index, url);
        assert!(registry.on_tab_updated(id, Some("complete"), &tab));
    }

    #[test]
    fn removed_tab_moves_to_closed_history_as_command() {
        let mut registry = TabRegistry::default();
        track(&mut registry, 1, 0, "https://x.com");
        assert!(registry.open_tab("1").is_some());

        let closed = registry
            .on_tab_removed(1, 1_707_335_222_222)
            .cloned()
            .expect("closed entry");
        assert_eq!(registry.open_len(), 0);
        assert!(closed.close_date > 0);

        let commands = registry.closed_tab_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, CommandType::ClosedTab);
        assert_eq!(commands[0].id, "closed-tab-1");
        assert_eq!(commands[0].sort_date, closed.close_date);
        assert_eq!(commands[0].url, "https://x.com");
    }

    #[test]
    fn history_is_capped_and_evicts_oldest() {
        let mut registry = TabRegistry::default();
        for id in 1..=51 {
            track(&mut registry, id, 0, &format!("https://site{id}.com"));
            registry.on_tab_removed(id, 1_000 + id);
            assert!(registry.closed_tabs().count() <= DEFAULT_CLOSED_TAB_CAPACITY);
        }

        let ids = registry
            .closed_tabs()
            .map(|tab| tab.id.clone())
            .collect::<Vec<_>>();
        assert_eq!(ids.len(), 50);
        assert_eq!(ids.first().map(String::as_str), Some("51"));
        assert!(!ids.contains(&"1".to_string()));
        assert!(ids.contains(&"2".to_string()));

        let dates = registry
            .closed_tabs()
            .map(|tab| tab.close_date)
            .collect::<Vec<_>>();
        assert!(dates.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn removing_untracked_tab_changes_nothing() {
        let mut registry = TabRegistry::default();
        track(&mut registry, 1, 0, "https://x.com");
        assert!(registry.on_tab_removed(99, 5).is_none());
        assert_eq!(registry.open_len(), 1);
        assert_eq!(registry.closed_tabs().count(), 0);
    }

    #[test]
    fn repeated_update_replaces_entry() {
        let mut registry = TabRegistry::default();
        track(&mut registry, 7, 0, "https://x.com");
        track(&mut registry, 7, 3, "https://y.com");
        assert_eq!(registry.open_len(), 1);
        let tab = registry.open_tab("7").expect("tab");
        assert_eq!(tab.url, "https://y.com");
        assert_eq!(tab.sort_date, 3);
        assert!(!tab.in_current_window);
    }

    #[test]
    fn ignores_loading_insecure_and_partial_tabs() {
        let mut registry = TabRegistry::default();
        let tab = host_tab(1, 1, 0, "https://x.com");
        assert!(!registry.on_tab_updated(1, Some("loading"), &tab));
        assert!(!registry.on_tab_updated(1, None, &tab));

        let insecure = host_tab(2, 1, 0, "http://x.com");
        assert!(!registry.on_tab_updated(2, Some("complete"), &insecure));
        let internal = host_tab(3, 1, 0, "chrome://extensions");
        assert!(!registry.on_tab_updated(3, Some("complete"), &internal));

        let no_url = HostTab {
            url: None,
            ..host_tab(4, 1, 0, "https://x.com")
        };
        assert!(!registry.on_tab_updated(4, Some("complete"), &no_url));
        let no_id = HostTab {
            id: None,
            ..host_tab(5, 1, 0, "https://x.com")
        };
        assert!(!registry.on_tab_updated(5, Some("complete"), &no_id));

        assert_eq!(registry.open_len(), 0);
    }

    #[test]
    fn close_dates_never_go_backwards() {
        let mut registry = TabRegistry::default();
        track(&mut registry, 1, 0, "https://a.com");
        track(&mut registry, 2, 1, "https://b.com");
        registry.on_tab_removed(1, 5_000);
        registry.on_tab_removed(2, 4_000);
        let dates = registry
            .closed_tabs()
            .map(|tab| tab.close_date)
            .collect::<Vec<_>>();
        assert_eq!(dates, vec![5_000, 5_000]);
    }

    #[test]
    fn reused_tab_ids_get_distinct_command_ids() {
        let mut registry = TabRegistry::default();
        track(&mut registry, 4, 0, "https://old.com");
        registry.on_tab_removed(4, 10);
        track(&mut registry, 4, 0, "https://new.com");
        registry.on_tab_removed(4, 20);

        let commands = registry.closed_tab_commands();
        let ids = commands.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["closed-tab-4", "closed-tab-4-1"]);
        assert_eq!(commands[0].url, "https://new.com");
    }

    #[tokio::test]
    async fn actor_applies_events_in_order() {
        let (sender, receiver) = mpsc::channel(8);
        tokio::spawn(
            RegistryActor::new(receiver, TabRegistry::default())
                .with_clock(|| 42)
                .run(),
        );
        let handle = RegistryHandle::from_sender(sender);

        handle
            .tab_updated(1, Some("complete".to_string()), host_tab(1, 1, 0, "https://x.com"))
            .await
            .expect("update");
        handle.tab_removed(1).await.expect("remove");
        handle.tab_removed(1).await.expect("stale remove");

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert!(snapshot.open_tabs.is_empty());
        assert_eq!(snapshot.closed_tabs.len(), 1);
        assert_eq!(snapshot.closed_tabs[0].close_date, 42);

        let commands = handle.closed_tab_commands().await.expect("commands");
        assert_eq!(commands[0].id, "closed-tab-1");
        assert_eq!(commands[0].sort_date, 42);
    }
}
