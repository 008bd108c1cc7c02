//! In-memory stand-ins for the host collaborators.

use crate::host::{
    BookmarkProvider, HostError, LookupError, PrLookup, SettingsError, SettingsStore, TabHost,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Mutex;
use tabdeck_core::bridge_ipc::HostCall;
use tabdeck_core::{BookmarkNode, CreateTab, HostTab, HostWindow, PullRequest, Settings};

pub fn host_tab(id: i64, window_id: i64, index: i64, url: &str) -> HostTab {
    HostTab {
        id: Some(id),
        url: Some(url.to_string()),
        title: Some(format!("Tab {id}")),
        fav_icon_url: Some(format!("{url}/favicon.ico")),
        index,
        window_id,
        pinned: false,
        status: Some("complete".to_string()),
    }
}

pub fn pull_request(repository: &str, number: u64, title: &str) -> PullRequest {
    PullRequest {
        number,
        title: title.to_string(),
        url: format!("https://github.com/{repository}/pull/{number}"),
        repository: repository.to_string(),
        updated_at: Utc.with_ymd_and_hms(2026, 2, 7, 21, 0, 0).single(),
    }
}

#[derive(Default)]
struct FakeHostState {
    windows: Vec<(HostWindow, Vec<HostTab>)>,
    calls: Vec<HostCall>,
    failing: HashSet<&'static str>,
    next_tab_id: i64,
}

/// Tab host backed by plain vectors. Mutating calls keep `index` fields in
/// step with positions the way a browser does.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<FakeHostState>,
}

impl FakeHost {
    pub fn add_window(&self, id: i64, focused: bool, tabs: Vec<HostTab>) {
        let mut state = self.state.lock().expect("fake host lock");
        state.windows.push((HostWindow { id, focused }, tabs));
    }

    /// Makes every later call of `op` (as named by [`HostCall::op`]) fail.
    pub fn fail(&self, op: &'static str) {
        self.state.lock().expect("fake host lock").failing.insert(op);
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.state.lock().expect("fake host lock").calls.clone()
    }

    pub fn tabs(&self, window_id: i64) -> Vec<HostTab> {
        let state = self.state.lock().expect("fake host lock");
        state
            .windows
            .iter()
            .find(|(window, _)| window.id == window_id)
            .map(|(_, tabs)| tabs.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: HostCall) -> Result<std::sync::MutexGuard<'_, FakeHostState>, HostError> {
        let mut state = self.state.lock().expect("fake host lock");
        let op = call.op();
        state.calls.push(call);
        if state.failing.contains(op) {
            return Err(HostError::Rejected {
                op: op.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

impl FakeHostState {
    fn window_of(&mut self, tab_id: i64) -> Option<&mut Vec<HostTab>> {
        self.windows
            .iter_mut()
            .map(|(_, tabs)| tabs)
            .find(|tabs| tabs.iter().any(|tab| tab.id == Some(tab_id)))
    }

    fn missing(op: &str, tab_id: i64) -> HostError {
        HostError::Rejected {
            op: op.to_string(),
            message: format!("No tab with id: {tab_id}"),
        }
    }
}

fn reindex(tabs: &mut [HostTab]) {
    for (position, tab) in tabs.iter_mut().enumerate() {
        tab.index = position as i64;
    }
}

fn clamp_index(index: i64, len: usize) -> usize {
    usize::try_from(index).map(|i| i.min(len)).unwrap_or(len)
}

#[async_trait]
impl TabHost for FakeHost {
    async fn windows(&self) -> Result<Vec<HostWindow>, HostError> {
        let state = self.record(HostCall::Windows)?;
        Ok(state.windows.iter().map(|(window, _)| *window).collect())
    }

    async fn tabs_in_window(&self, window_id: i64) -> Result<Vec<HostTab>, HostError> {
        let state = self.record(HostCall::TabsInWindow { window_id })?;
        Ok(state
            .windows
            .iter()
            .find(|(window, _)| window.id == window_id)
            .map(|(_, tabs)| tabs.clone())
            .unwrap_or_default())
    }

    async fn current_window_tabs(&self) -> Result<Vec<HostTab>, HostError> {
        let state = self.record(HostCall::CurrentWindowTabs)?;
        Ok(state
            .windows
            .iter()
            .find(|(window, _)| window.focused)
            .map(|(_, tabs)| tabs.clone())
            .unwrap_or_default())
    }

    async fn create_tab(&self, request: CreateTab) -> Result<HostTab, HostError> {
        let mut state = self.record(HostCall::CreateTab(request.clone()))?;
        state.next_tab_id = state.next_tab_id.max(1000) + 1;
        let id = state.next_tab_id;
        let window_id = match request.window_id {
            Some(window_id) => window_id,
            None => state
                .windows
                .iter()
                .find(|(window, _)| window.focused)
                .map(|(window, _)| window.id)
                .ok_or_else(|| HostError::Unavailable("no focused window".to_string()))?,
        };
        let tabs = state
            .windows
            .iter_mut()
            .find(|(window, _)| window.id == window_id)
            .map(|(_, tabs)| tabs)
            .ok_or_else(|| HostError::Rejected {
                op: "create_tab".to_string(),
                message: format!("No window with id: {window_id}"),
            })?;
        let position = clamp_index(request.index.unwrap_or(i64::MAX), tabs.len());
        let mut tab = host_tab(id, window_id, 0, &request.url);
        tab.fav_icon_url = None;
        tab.status = Some("loading".to_string());
        tabs.insert(position, tab);
        reindex(tabs);
        Ok(tabs[position].clone())
    }

    async fn activate_tab(&self, tab_id: i64) -> Result<(), HostError> {
        let mut state = self.record(HostCall::ActivateTab { tab_id })?;
        state
            .window_of(tab_id)
            .map(|_| ())
            .ok_or_else(|| FakeHostState::missing("activate_tab", tab_id))
    }

    async fn remove_tab(&self, tab_id: i64) -> Result<(), HostError> {
        let mut state = self.record(HostCall::RemoveTab { tab_id })?;
        let tabs = state
            .window_of(tab_id)
            .ok_or_else(|| FakeHostState::missing("remove_tab", tab_id))?;
        tabs.retain(|tab| tab.id != Some(tab_id));
        reindex(tabs);
        Ok(())
    }

    async fn duplicate_tab(&self, tab_id: i64) -> Result<(), HostError> {
        let mut state = self.record(HostCall::DuplicateTab { tab_id })?;
        state.next_tab_id = state.next_tab_id.max(1000) + 1;
        let id = state.next_tab_id;
        let tabs = state
            .window_of(tab_id)
            .ok_or_else(|| FakeHostState::missing("duplicate_tab", tab_id))?;
        if let Some(position) = tabs.iter().position(|tab| tab.id == Some(tab_id)) {
            let copy = HostTab {
                id: Some(id),
                ..tabs[position].clone()
            };
            tabs.insert(position + 1, copy);
            reindex(tabs);
        }
        Ok(())
    }

    async fn move_tab(&self, tab_id: i64, index: i64) -> Result<(), HostError> {
        let mut state = self.record(HostCall::MoveTab { tab_id, index })?;
        let tabs = state
            .window_of(tab_id)
            .ok_or_else(|| FakeHostState::missing("move_tab", tab_id))?;
        if let Some(position) = tabs.iter().position(|tab| tab.id == Some(tab_id)) {
            let tab = tabs.remove(position);
            let target = clamp_index(index, tabs.len());
            tabs.insert(target, tab);
            reindex(tabs);
        }
        Ok(())
    }
}

pub struct StaticSettings(pub Settings);

#[async_trait]
impl SettingsStore for StaticSettings {
    async fn get(&self) -> Result<Settings, SettingsError> {
        Ok(self.0.clone())
    }
}

pub struct BrokenSettings;

#[async_trait]
impl SettingsStore for BrokenSettings {
    async fn get(&self) -> Result<Settings, SettingsError> {
        Err(SettingsError::Read {
            path: "/nonexistent/settings.json".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        })
    }
}

pub enum FakeBookmarks {
    Tree(Vec<BookmarkNode>),
    Failing(HostError),
    /// Never resolves.
    Hung,
}

impl FakeBookmarks {
    pub fn returning(tree: Vec<BookmarkNode>) -> Self {
        Self::Tree(tree)
    }

    pub fn failing(error: HostError) -> Self {
        Self::Failing(error)
    }
}

#[async_trait]
impl BookmarkProvider for FakeBookmarks {
    async fn bookmark_tree(&self) -> Result<Vec<BookmarkNode>, HostError> {
        match self {
            FakeBookmarks::Tree(tree) => Ok(tree.clone()),
            FakeBookmarks::Failing(error) => Err(error.clone()),
            FakeBookmarks::Hung => std::future::pending().await,
        }
    }
}

pub struct FakePrLookup {
    result: Result<Vec<PullRequest>, LookupError>,
    queried: Mutex<Vec<String>>,
}

impl FakePrLookup {
    pub fn returning(prs: Vec<PullRequest>) -> Self {
        Self {
            result: Ok(prs),
            queried: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: LookupError) -> Self {
        Self {
            result: Err(error),
            queried: Mutex::new(Vec::new()),
        }
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().expect("lookup lock").clone()
    }
}

#[async_trait]
impl PrLookup for FakePrLookup {
    async fn open_pull_requests(&self, username: &str) -> Result<Vec<PullRequest>, LookupError> {
        self.queried
            .lock()
            .expect("lookup lock")
            .push(username.to_string());
        self.result.clone()
    }
}
