//! Pull-request lookup through the GitHub CLI.

use crate::host::{LookupError, PrLookup};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tabdeck_core::PullRequest;
use tracing::debug;

pub const DEFAULT_GH_BIN: &str = "gh";
const SEARCH_LIMIT: &str = "100";
const ERROR_SNIPPET_CHARS: usize = 240;

pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<std::process::Output> {
        Command::new(program).args(args).output()
    }
}

pub struct GhCliPrLookup<R: CommandRunner> {
    runner: Arc<R>,
    binary: PathBuf,
}

impl<R: CommandRunner + 'static> GhCliPrLookup<R> {
    pub fn new(runner: R, binary: impl Into<PathBuf>) -> Result<Self, LookupError> {
        let binary = binary.into();
        if binary.as_os_str().is_empty() {
            return Err(LookupError::Unavailable(
                "gh binary path is empty; provide a valid path or unset it".to_string(),
            ));
        }
        Ok(Self {
            runner: Arc::new(runner),
            binary,
        })
    }

    pub fn search_args(username: &str) -> Vec<OsString> {
        vec![
            OsString::from("search"),
            OsString::from("prs"),
            OsString::from("--author"),
            OsString::from(username),
            OsString::from("--state"),
            OsString::from("open"),
            OsString::from("--json"),
            OsString::from("number,title,url,repository,updatedAt"),
            OsString::from("--limit"),
            OsString::from(SEARCH_LIMIT),
        ]
    }

    fn run_gh(&self, args: &[OsString]) -> Result<std::process::Output, LookupError> {
        let program = self
            .binary
            .to_str()
            .ok_or_else(|| LookupError::Unavailable("invalid gh binary path".to_string()))?;
        let output = self
            .runner
            .run(program, args)
            .map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => LookupError::Unavailable(format!(
                    "GitHub CLI `{}` was not found; install gh and run `gh auth login`",
                    self.binary.display()
                )),
                _ => LookupError::Unavailable(format!(
                    "failed to execute GitHub CLI `{}`: {error}",
                    self.binary.display()
                )),
            })?;
        if output.status.success() {
            return Ok(output);
        }
        Err(LookupError::Failed(format!(
            "`{} {}`: {}",
            self.binary.display(),
            render_args(args),
            output_detail(&output)
        )))
    }
}

#[async_trait]
impl<R: CommandRunner + 'static> PrLookup for GhCliPrLookup<R> {
    async fn open_pull_requests(&self, username: &str) -> Result<Vec<PullRequest>, LookupError> {
        let args = Self::search_args(username);
        let lookup = Self {
            runner: Arc::clone(&self.runner),
            binary: self.binary.clone(),
        };
        let output = tokio::task::spawn_blocking(move || lookup.run_gh(&args))
            .await
            .map_err(|err| LookupError::Failed(format!("gh task failed: {err}")))??;
        let prs = parse_search_output(&output.stdout)?;
        debug!(event = "pr_lookup_ok", username, count = prs.len());
        Ok(prs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhSearchPullRequest {
    number: u64,
    title: String,
    url: String,
    #[serde(default)]
    repository: Option<GhRepository>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRepository {
    #[serde(default)]
    name_with_owner: Option<String>,
}

fn parse_search_output(stdout: &[u8]) -> Result<Vec<PullRequest>, LookupError> {
    let items: Vec<GhSearchPullRequest> = serde_json::from_slice(stdout).map_err(|error| {
        LookupError::Malformed(format!(
            "failed to parse `gh search prs` output: {error}. Output: {}",
            truncate(&String::from_utf8_lossy(stdout))
        ))
    })?;
    Ok(items
        .into_iter()
        .map(|item| {
            let repository = item
                .repository
                .and_then(|repository| repository.name_with_owner)
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .or_else(|| repository_from_url(&item.url))
                .unwrap_or_else(|| "unknown/unknown".to_string());
            PullRequest {
                number: item.number,
                title: item.title,
                url: item.url,
                repository,
                updated_at: item.updated_at,
            }
        })
        .collect())
}

fn repository_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    let owner = segments.next()?.trim();
    let repository = segments.next()?.trim();
    if owner.is_empty() || repository.is_empty() {
        return None;
    }
    Some(format!("{owner}/{repository}"))
}

fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn output_detail(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    format!("exit status {}", output.status)
}

fn truncate(body: &str) -> String {
    let mut snippet = body.chars().take(ERROR_SNIPPET_CHARS).collect::<String>();
    if body.chars().count() > ERROR_SNIPPET_CHARS {
        snippet.push_str("...");
    }
    snippet
}
