//! GitHub adapter - lists, archives and deletes a user's repositories.
//!
//! [`GithubClient`] implements the three remote capabilities the pipeline
//! needs against the GitHub REST API:
//! - listing through [`GithubClient::inventory`] (`GET /users/{login}/repos`, paged)
//! - [`ContentFetcher`] streaming `GET /repos/{owner}/{repo}/zipball[/{ref}]`
//! - [`RemoteDeleter`] issuing `DELETE /repos/{owner}/{repo}`
//!
//! HTTP statuses are mapped onto [`TransferError`] so the pipeline can tell
//! per-repository failures from fatal ones (see [`classify_status`]).

use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::Deserialize;

use crate::config::GithubConfig;
use crate::error::{Error, Result, TransferError};
use crate::inventory::{Page, PageCursor, PageFetcher, PagedInventory};
use crate::remote::{ByteStream, ContentFetcher, RemoteDeleter};
use crate::types::ResourceDescriptor;


/// Media type GitHub documents for the v3 REST API
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

/// Header GitHub uses to report the remaining request quota
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Repository as returned by the listing endpoint (only the fields we use)
#[derive(Clone, Debug, Deserialize)]
pub struct RepoSummary {
    /// API URL of the repository
    #[serde(default)]
    pub url: String,
    /// Browser URL of the repository
    #[serde(default)]
    pub html_url: String,
    /// Repository name without owner
    pub name: String,
    /// `owner/name`
    pub full_name: String,
}

impl RepoSummary {
    /// Map to a pipeline descriptor; the archive is stored as `{name}.zip`
    pub fn into_descriptor(self) -> ResourceDescriptor {
        ResourceDescriptor::new(
            self.full_name.clone(),
            self.full_name.clone(),
            &format!("{}.zip", self.name),
            self.full_name,
        )
    }
}

/// Error body GitHub sends with non-success responses
#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

/// Map a non-success HTTP status to a transfer error
///
/// | Status | Error |
/// |--------|-------|
/// | 401 | `Auth` |
/// | 403 with `x-ratelimit-remaining: 0`, 429 | `RateLimited` |
/// | other 403 | `Forbidden` |
/// | 404 | `NotFound` |
/// | anything else | `Transport` |
pub fn classify_status(status: StatusCode, headers: &HeaderMap, message: String) -> TransferError {
    let rate_limit_exhausted = headers
        .get(RATE_LIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    match status {
        StatusCode::UNAUTHORIZED => TransferError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => TransferError::RateLimited(message),
        StatusCode::FORBIDDEN if rate_limit_exhausted => TransferError::RateLimited(message),
        StatusCode::FORBIDDEN => TransferError::Forbidden(message),
        StatusCode::NOT_FOUND => TransferError::NotFound(message),
        other => TransferError::Transport(format!("HTTP {}: {}", other, message)),
    }
}

/// Pass a successful response through; turn anything else into an error
async fn check_status(response: Response, what: &str) -> std::result::Result<Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiMessage>(&body)
        .map(|m| m.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    let message = if detail.is_empty() {
        what.to_string()
    } else {
        format!("{what}: {detail}")
    };

    Err(classify_status(status, &headers, message))
}

/// Percent-encode each `/`-separated segment of a repository path
fn encode_path(full_name: &str) -> String {
    full_name
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// GitHub REST client (cloneable - the HTTP connection pool is shared)
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    login: String,
    per_page: u32,
    archive_ref: Option<String>,
}

impl GithubClient {
    /// Build a client from validated account settings
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid config or a token that
    /// is not a legal header value, and a network error if the HTTP client
    /// cannot be built.
    pub fn new(config: &GithubConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT));
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("token {token}"))
                .map_err(|e| Error::config("github.token", format!("invalid token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        // No overall timeout: archives can take arbitrarily long to stream.
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            login: config.login.clone(),
            per_page: config.per_page,
            archive_ref: config.archive_ref.clone(),
        })
    }

    /// Lazy inventory over every repository of the configured login
    pub fn inventory(&self) -> PagedInventory<GithubRepoPages> {
        PagedInventory::new(GithubRepoPages {
            client: self.clone(),
        })
    }

    fn repos_url(&self, page: u32) -> String {
        format!(
            "{}/users/{}/repos?per_page={}&page={}",
            self.api_base,
            urlencoding::encode(&self.login),
            self.per_page,
            page
        )
    }

    fn archive_url(&self, full_name: &str) -> String {
        match &self.archive_ref {
            Some(git_ref) => format!(
                "{}/repos/{}/zipball/{}",
                self.api_base,
                encode_path(full_name),
                encode_path(git_ref)
            ),
            None => format!("{}/repos/{}/zipball", self.api_base, encode_path(full_name)),
        }
    }

    fn repo_url(&self, full_name: &str) -> String {
        format!("{}/repos/{}", self.api_base, encode_path(full_name))
    }

    /// Fetch one page of the repository listing (1-based)
    pub async fn list_repos(&self, page: u32) -> std::result::Result<Vec<RepoSummary>, TransferError> {
        let url = self.repos_url(page);
        tracing::debug!(login = %self.login, page, "Listing repositories");

        let response = self.http.get(&url).send().await?;
        let response = check_status(response, &format!("listing repositories of {}", self.login)).await?;
        response
            .json::<Vec<RepoSummary>>()
            .await
            .map_err(|e| TransferError::Transport(format!("malformed repository listing: {e}")))
    }
}

#[async_trait::async_trait]
impl ContentFetcher for GithubClient {
    async fn fetch(&self, descriptor: &ResourceDescriptor) -> std::result::Result<ByteStream, TransferError> {
        let full_name = descriptor.remote_ref().as_str();
        let response = self.http.get(self.archive_url(full_name)).send().await?;
        let response = check_status(response, &format!("archiving {full_name}")).await?;

        tracing::debug!(
            repo = full_name,
            content_length = ?response.content_length(),
            "Archive stream opened"
        );
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransferError::from))
            .boxed())
    }
}

#[async_trait::async_trait]
impl RemoteDeleter for GithubClient {
    async fn delete(&self, descriptor: &ResourceDescriptor) -> std::result::Result<(), TransferError> {
        let full_name = descriptor.remote_ref().as_str();
        let response = self.http.delete(self.repo_url(full_name)).send().await?;
        check_status(response, &format!("deleting {full_name}")).await?;
        Ok(())
    }
}

/// Page-number cursor over `GET /users/{login}/repos`
pub struct GithubRepoPages {
    client: GithubClient,
}

#[async_trait::async_trait]
impl PageFetcher for GithubRepoPages {
    async fn fetch_page(&self, cursor: Option<&PageCursor>) -> std::result::Result<Page, TransferError> {
        let page = match cursor {
            Some(cursor) => cursor.0.parse::<u32>().map_err(|_| {
                TransferError::Transport(format!("invalid page cursor '{}'", cursor.0))
            })?,
            None => 1,
        };

        let repos = self.client.list_repos(page).await?;
        // A short page is the last one; GitHub never pads pages.
        let next = (repos.len() >= self.client.per_page as usize)
            .then(|| PageCursor((page + 1).to_string()));

        Ok(Page {
            items: repos.into_iter().map(RepoSummary::into_descriptor).collect(),
            next,
        })
    }
}
