//! Single entry point for page-level requests.
//!
//! [`MessageRouter::handle`] classifies a request, spawns its handler and
//! returns immediately, so a slow or hung handler never holds up the next
//! request. Payload-bearing requests hand back a [`ResponseHandle`]; the
//! handler side holds the matching [`Responder`], which can be consumed
//! exactly once.

use crate::aggregator::CommandAggregator;
use crate::host::{
    load_current_tabs, BookmarkProvider, HostError, PrLookup, SettingsStore, TabHost,
};
use crate::registry::RegistryHandle;
use crate::sources::{
    BookmarkSource, ClosedTabSource, CommandSource, FaviconRules, OpenTabSource, QuickLinkSource,
};
use serde_json::Value;
use std::sync::Arc;
use tabdeck_core::messages::{
    AggregatedCommandResponse, ClosedTabCommandsResponse, CurrentTabsResponse, Directive,
    MoveOffset, PrsResponse, QuickLinksResponse, Request, Response, SenderTab,
};
use tabdeck_core::{Command, CreateTab, PullRequest, Settings, TabInfo};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_EXTENSIONS_URL: &str = "chrome://extensions";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub extensions_url: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            extensions_url: DEFAULT_EXTENSIONS_URL.to_string(),
        }
    }
}

/// Collaborators the router drives.
pub struct RouterDeps {
    pub host: Arc<dyn TabHost>,
    pub bookmarks: Arc<dyn BookmarkProvider>,
    pub settings: Arc<dyn SettingsStore>,
    pub pr_lookup: Arc<dyn PrLookup>,
    pub registry: RegistryHandle,
    pub favicons: Arc<FaviconRules>,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: Option<SenderTab>,
    pub message: Value,
}

#[derive(Debug)]
pub enum ResponseOutcome {
    Responded(Response),
    /// The handler finished without anything to send back.
    Declined,
    /// The handler went away without responding or declining.
    Abandoned,
}

/// Handler half of a respond-once channel.
pub struct Responder {
    request: &'static str,
    reply: Option<oneshot::Sender<Option<Response>>>,
}

impl Responder {
    pub fn respond(mut self, response: Response) {
        if let Some(reply) = self.reply.take() {
            if reply.send(Some(response)).is_err() {
                debug!(event = "response_receiver_gone", request = self.request);
            }
        }
    }

    pub fn decline(mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(None);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.reply.is_some() {
            warn!(event = "response_abandoned", request = self.request);
        }
    }
}

/// Caller half of a respond-once channel.
#[derive(Debug)]
pub struct ResponseHandle {
    receiver: oneshot::Receiver<Option<Response>>,
}

impl ResponseHandle {
    pub async fn recv(self) -> ResponseOutcome {
        match self.receiver.await {
            Ok(Some(response)) => ResponseOutcome::Responded(response),
            Ok(None) => ResponseOutcome::Declined,
            Err(_) => ResponseOutcome::Abandoned,
        }
    }
}

pub fn response_channel(request: &'static str) -> (Responder, ResponseHandle) {
    let (sender, receiver) = oneshot::channel();
    (
        Responder {
            request,
            reply: Some(sender),
        },
        ResponseHandle { receiver },
    )
}

#[derive(Debug)]
pub enum Dispatch {
    /// Dropped: no sender tab or an unrecognised shape. Nothing will be sent.
    Ignored,
    /// Fire-and-forget request; the task performs the side effect.
    Accepted(JoinHandle<()>),
    /// A response will arrive on the handle.
    Pending(ResponseHandle),
}

#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    host: Arc<dyn TabHost>,
    settings: Arc<dyn SettingsStore>,
    pr_lookup: Arc<dyn PrLookup>,
    registry: RegistryHandle,
    aggregator: CommandAggregator,
    quick_links: QuickLinkSource,
    config: RouterConfig,
}

impl MessageRouter {
    pub fn new(deps: RouterDeps, config: RouterConfig) -> Self {
        let aggregator = CommandAggregator::new(
            Box::new(OpenTabSource::new(Arc::clone(&deps.host))),
            Box::new(BookmarkSource::new(deps.bookmarks, Arc::clone(&deps.favicons))),
            Box::new(ClosedTabSource::new(deps.registry.clone())),
            Arc::clone(&deps.pr_lookup),
        );
        let quick_links = QuickLinkSource::new(Arc::clone(&deps.settings), deps.favicons);
        Self {
            inner: Arc::new(RouterInner {
                host: deps.host,
                settings: deps.settings,
                pr_lookup: deps.pr_lookup,
                registry: deps.registry,
                aggregator,
                quick_links,
                config,
            }),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn handle(&self, inbound: InboundMessage) -> Dispatch {
        let Some(sender) = inbound.sender else {
            warn!(event = "message_without_sender", payload = %inbound.message);
            return Dispatch::Ignored;
        };
        let Some(request) = Request::classify(&inbound.message) else {
            debug!(
                event = "message_unrecognised",
                tab_id = sender.id,
                payload = %inbound.message
            );
            return Dispatch::Ignored;
        };
        debug!(event = "message_routed", request = request.kind(), tab_id = sender.id);

        let inner = Arc::clone(&self.inner);
        if request.expects_response() {
            let (responder, handle) = response_channel(request.kind());
            tokio::spawn(async move { inner.dispatch(request, sender, Some(responder)).await });
            Dispatch::Pending(handle)
        } else {
            Dispatch::Accepted(tokio::spawn(async move {
                inner.dispatch(request, sender, None).await
            }))
        }
    }
}

fn reply(responder: Option<Responder>, response: Response) {
    if let Some(responder) = responder {
        responder.respond(response);
    }
}

fn log_failure(request: &'static str, result: Result<(), HostError>) {
    if let Err(err) = result {
        warn!(event = "request_failed", request, error = %err);
    }
}

impl RouterInner {
    async fn dispatch(&self, request: Request, sender: SenderTab, responder: Option<Responder>) {
        let kind = request.kind();
        match request {
            Request::Directive(Directive::OpenExtensions) => {
                log_failure(kind, self.open_extensions().await)
            }
            Request::Directive(Directive::CloseCurrentTab) => {
                log_failure(kind, self.host.remove_tab(sender.id).await)
            }
            Request::Directive(Directive::DuplicateTab) => {
                log_failure(kind, self.host.duplicate_tab(sender.id).await)
            }
            Request::Directive(Directive::LoadAllCommands) => {
                reply(responder, Response::AllCommands(self.load_all_commands().await))
            }
            Request::Directive(Directive::LoadCurrentTabs) => reply(
                responder,
                Response::CurrentTabs(CurrentTabsResponse {
                    current_tabs: self.current_tabs().await,
                }),
            ),
            Request::Directive(Directive::LoadClosedTabCommands) => reply(
                responder,
                Response::ClosedTabCommands(ClosedTabCommandsResponse {
                    closed_tab_commands: self.closed_tab_commands().await,
                }),
            ),
            Request::Directive(Directive::LoadQuickLinks) => reply(
                responder,
                Response::QuickLinks(QuickLinksResponse {
                    quick_links: self.quick_links().await,
                }),
            ),
            Request::OpenTabUrl(url) => log_failure(kind, self.open_tab_url(url, sender).await),
            Request::SwitchToTab(tab_id) => {
                log_failure(kind, self.host.activate_tab(tab_id).await)
            }
            Request::RemoveTab(tab_id) => log_failure(kind, self.host.remove_tab(tab_id).await),
            Request::ReopenTab(descriptor) => match self.reopen_tab(*descriptor).await {
                Ok(current_tabs) => reply(
                    responder,
                    Response::CurrentTabs(CurrentTabsResponse { current_tabs }),
                ),
                Err(err) => {
                    warn!(event = "request_failed", request = kind, error = %err);
                    if let Some(responder) = responder {
                        responder.decline();
                    }
                }
            },
            Request::MoveTab(offset) => log_failure(kind, self.move_tab(offset, sender).await),
            Request::LoadPrs(username) => reply(
                responder,
                Response::Prs(PrsResponse {
                    prs: self.pull_requests(&username).await,
                }),
            ),
        }
    }

    async fn open_extensions(&self) -> Result<(), HostError> {
        self.host
            .create_tab(CreateTab {
                url: self.config.extensions_url.clone(),
                index: None,
                window_id: None,
                active: true,
            })
            .await
            .map(|_| ())
    }

    async fn open_tab_url(&self, url: String, sender: SenderTab) -> Result<(), HostError> {
        self.host
            .create_tab(CreateTab {
                url,
                index: Some(sender.index.saturating_add(1)),
                window_id: sender.window_id,
                active: true,
            })
            .await
            .map(|_| ())
    }

    async fn move_tab(&self, offset: MoveOffset, sender: SenderTab) -> Result<(), HostError> {
        let tab_count = match offset {
            MoveOffset::Last => self.window_tab_count(sender).await,
            MoveOffset::First | MoveOffset::Relative(_) => None,
        };
        let index = offset.target_index(sender.index, tab_count);
        self.host.move_tab(sender.id, index).await
    }

    async fn window_tab_count(&self, sender: SenderTab) -> Option<usize> {
        let window_id = sender.window_id?;
        match self.host.tabs_in_window(window_id).await {
            Ok(tabs) => Some(tabs.len()),
            Err(err) => {
                warn!(event = "window_tab_count_error", window_id, error = %err);
                None
            }
        }
    }

    /// Recreates a closed tab in the background, then answers with the full
    /// live tab list in which the new tab carries the saved descriptor.
    async fn reopen_tab(&self, descriptor: TabInfo) -> Result<Vec<TabInfo>, HostError> {
        let created = self
            .host
            .create_tab(CreateTab {
                url: descriptor.url.clone(),
                index: Some(descriptor.index),
                window_id: Some(descriptor.window_id).filter(|id| *id > 0),
                active: false,
            })
            .await?;
        let fresh_id = created
            .id
            .ok_or_else(|| HostError::Decode {
                op: "create_tab".to_string(),
                message: "created tab has no id".to_string(),
            })?
            .to_string();

        let mut current_tabs = load_current_tabs(self.host.as_ref()).await?;
        match current_tabs.iter().position(|tab| tab.id == fresh_id) {
            Some(position) => {
                info!(
                    event = "tab_reopened",
                    closed_id = %descriptor.id,
                    tab_id = %fresh_id
                );
                current_tabs[position] = TabInfo {
                    id: fresh_id,
                    ..descriptor
                };
            }
            None => {
                warn!(event = "reopened_tab_missing", tab_id = %fresh_id);
            }
        }
        Ok(current_tabs)
    }

    async fn load_all_commands(&self) -> AggregatedCommandResponse {
        let settings = match self.settings.get().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(event = "settings_read_failed", error = %err);
                Settings::default()
            }
        };
        self.aggregator.load_all(&settings).await
    }

    async fn current_tabs(&self) -> Vec<TabInfo> {
        load_current_tabs(self.host.as_ref())
            .await
            .unwrap_or_else(|err| {
                warn!(event = "current_tabs_failed", error = %err);
                Vec::new()
            })
    }

    async fn closed_tab_commands(&self) -> Vec<Command> {
        self.registry
            .closed_tab_commands()
            .await
            .unwrap_or_else(|err| {
                warn!(event = "closed_tabs_failed", error = %err);
                Vec::new()
            })
    }

    async fn quick_links(&self) -> Vec<Command> {
        self.quick_links.load().await.unwrap_or_else(|err| {
            warn!(event = "quick_links_failed", error = %err);
            Vec::new()
        })
    }

    async fn pull_requests(&self, username: &str) -> Vec<PullRequest> {
        self.pr_lookup
            .open_pull_requests(username)
            .await
            .unwrap_or_else(|err| {
                warn!(event = "pr_lookup_failed", username, error = %err);
                Vec::new()
            })
    }
}
