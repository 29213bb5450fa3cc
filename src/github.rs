//! GitHub REST API client: owner lookup and paginated repository listing
//!
//! The client owns the transport concerns the rest of the crate must not see:
//! authentication, rate-limit header parsing, bounded retry of transient
//! network failures, and the page cursor. Callers get back typed records and
//! the `ApiError` taxonomy; nothing above this module touches HTTP.

use std::env;
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ApiError;
use crate::ratelimit::{RateLimitStatus, RateLimiter};

const USER_AGENT: &str = concat!("repolens/", env!("CARGO_PKG_VERSION"));
const STATUS_URL: &str = "https://www.githubstatus.com/api/v2/status.json";

/// One fetched repository's display metadata. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RepoRecord {
    pub name: String,
    /// `owner/name`, the unique key within a session.
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, rename = "stargazers_count")]
    pub star_count: u32,
    #[serde(default, rename = "forks_count")]
    pub fork_count: u32,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub clone_url: Option<String>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
}

/// Opaque continuation token for paginated retrieval.
///
/// Wraps the list endpoint's page number today; callers only ever pass it
/// back unmodified, so a Link-header cursor could replace the representation
/// without touching them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor(pub(crate) u32);

impl PageCursor {
    /// Cursor for the first page of a listing.
    pub fn first() -> Self {
        PageCursor(1)
    }

    fn next(self) -> Self {
        PageCursor(self.0 + 1)
    }
}

/// One fetched page: records in API order plus the continuation cursor.
/// `next_cursor == None` means the listing is exhausted.
#[derive(Debug, Clone)]
pub struct RepoPage {
    pub records: Vec<RepoRecord>,
    pub next_cursor: Option<PageCursor>,
}

/// Account type, which selects the repos listing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    User,
    Organization,
}

impl std::fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerKind::User => write!(f, "user"),
            OwnerKind::Organization => write!(f, "organization"),
        }
    }
}

/// Resolved profile of the queried account.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerProfile {
    pub login: String,
    pub kind: OwnerKind,
    pub html_url: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    login: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

/// Capability consumed by the background runner; mocked in its tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepoLister: Send + Sync {
    /// Resolve an account login to its profile. `NotFound` here aborts a
    /// session before any page is requested.
    async fn lookup_owner(&self, login: &str) -> Result<OwnerProfile, ApiError>;

    /// Fetch one page of the owner's repositories. Idempotent per
    /// `(owner, cursor)`; records keep the API's native ordering.
    async fn fetch_page(
        &self,
        owner: &OwnerProfile,
        cursor: PageCursor,
    ) -> Result<RepoPage, ApiError>;
}

/// GitHub authentication strategies
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
    /// Unauthenticated, lower-quota access
    Anonymous,
}

/// GitHub client wrapper with authentication management
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    page_size: u8,
    max_retries: u32,
    backoff_base: Duration,
    limiter: RateLimiter,
}

impl GitHubClient {
    /// Create a client from configuration, sharing the given rate limiter
    /// with status readers.
    pub fn new(config: &Config, limiter: RateLimiter) -> Result<Self> {
        let (strategy, token) = Self::detect_authentication(config)?;
        match strategy {
            AuthStrategy::Anonymous => {
                warn!("No GitHub credentials found, continuing unauthenticated (60 requests/hour)")
            }
            ref s => debug!("Using authentication strategy: {:?}", s),
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            api_base: config.github.api_base.trim_end_matches('/').to_string(),
            token,
            page_size: config.page_size(),
            max_retries: config.fetch.max_retries,
            backoff_base: Duration::from_millis(config.fetch.backoff_base_ms),
            limiter,
        })
    }

    /// Detect and obtain GitHub authentication. Absence of credentials is not
    /// an error; it degrades to anonymous access.
    fn detect_authentication(config: &Config) -> Result<(AuthStrategy, Option<String>)> {
        match config.github.auth_method.as_str() {
            "auto" => {
                if let Ok(token) = Self::try_environment_token() {
                    Ok((AuthStrategy::EnvironmentToken, Some(token)))
                } else if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCLI, Some(token)))
                } else {
                    Ok((AuthStrategy::Anonymous, None))
                }
            }
            "gh_cli" => {
                let token = Self::try_github_cli()
                    .context("GitHub CLI authentication failed. Run: gh auth login")?;
                Ok((AuthStrategy::GitHubCLI, Some(token)))
            }
            "token" => {
                let token = Self::try_environment_token()
                    .context("GITHUB_TOKEN environment variable not found or invalid")?;
                Ok((AuthStrategy::EnvironmentToken, Some(token)))
            }
            "none" => Ok((AuthStrategy::Anonymous, None)),
            other => Err(anyhow!("Unknown auth method: {}", other)),
        }
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("GitHub CLI (gh) is not installed")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "GitHub CLI is not authenticated. Run: gh auth login"
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        debug!("Successfully obtained token from GitHub CLI");
        Ok(token)
    }

    /// Try to get token from environment variable
    fn try_environment_token() -> Result<String> {
        debug!("Attempting environment variable authentication");

        let token =
            env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

        if token.is_empty() {
            return Err(anyhow!("GITHUB_TOKEN is empty"));
        }

        if !token.starts_with("ghp_") && !token.starts_with("gho_") && !token.starts_with("ghs_") {
            warn!("GITHUB_TOKEN doesn't look like a valid GitHub token (should start with ghp_, gho_, or ghs_)");
        }

        Ok(token)
    }

    /// Shared rate limiter handle for status display.
    pub fn limiter(&self) -> RateLimiter {
        self.limiter.clone()
    }

    /// Refresh the quota snapshot from the dedicated rate-limit endpoint,
    /// which does not itself consume quota.
    pub async fn probe_rate_limit(&self) -> Result<RateLimitStatus, ApiError> {
        let url = format!("{}/rate_limit", self.api_base);
        let response = self.get_with_retry(&url).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, "rate_limit").await);
        }

        self.limiter
            .status()
            .ok_or_else(|| ApiError::Malformed("rate-limit headers missing".to_string()))
    }

    /// Best-effort GitHub service status probe. Never fatal; a degraded
    /// indicator is surfaced as a warning by callers.
    pub async fn service_status(&self) -> (bool, String) {
        #[derive(Deserialize)]
        struct StatusBody {
            status: StatusInner,
        }
        #[derive(Deserialize)]
        struct StatusInner {
            #[serde(default)]
            indicator: String,
            #[serde(default)]
            description: String,
        }

        let request = self.http.get(STATUS_URL).timeout(Duration::from_secs(5));
        match request.send().await {
            Ok(response) => match response.json::<StatusBody>().await {
                Ok(body) => (body.status.indicator == "none", body.status.description),
                Err(e) => (false, format!("Could not parse GitHub status: {e}")),
            },
            Err(e) => (false, format!("Could not verify GitHub status: {e}")),
        }
    }

    /// Issue one GET with auth headers, recording rate-limit headers from the
    /// response regardless of status.
    async fn get(&self, url: &str) -> Result<reqwest::Response, ApiError> {
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        self.record_rate_limit(response.headers());
        Ok(response)
    }

    /// As `get`, but retries transient failures - transport errors and 5xx
    /// responses - with exponential backoff. Safe because the list endpoints
    /// are idempotent GETs. A still-failing 5xx after the last attempt is
    /// returned as-is for `error_for` to map.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, ApiError> {
        let mut attempt = 0u32;
        loop {
            let reason = match self.get(url).await {
                Ok(response)
                    if response.status().is_server_error() && attempt < self.max_retries =>
                {
                    format!("server error {}", response.status())
                }
                Err(err) if err.is_transient() && attempt < self.max_retries => err.to_string(),
                other => return other,
            };

            let delay = self.backoff_base * 2u32.saturating_pow(attempt);
            warn!(
                "Transient failure fetching {} (attempt {}/{}), retrying in {:?}: {}",
                url,
                attempt + 1,
                self.max_retries,
                delay,
                reason
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn record_rate_limit(&self, headers: &HeaderMap) {
        let limit = parse_header(headers, "x-ratelimit-limit");
        let remaining = parse_header(headers, "x-ratelimit-remaining");
        let reset = parse_header(headers, "x-ratelimit-reset");

        if let (Some(limit), Some(remaining), Some(reset)) = (limit, remaining, reset) {
            self.limiter.update(limit, remaining, reset);
        }
    }

    /// Map a non-success response to the error taxonomy. 403 is ambiguous on
    /// GitHub: rate-limit exhaustion and missing scopes share the status, so
    /// the remaining-quota header disambiguates.
    async fn error_for(&self, response: reqwest::Response, subject: &str) -> ApiError {
        let status = response.status();
        let remaining: Option<u32> = parse_header(response.headers(), "x-ratelimit-remaining");
        let reset: Option<u64> = parse_header(response.headers(), "x-ratelimit-reset");
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::NOT_FOUND => ApiError::NotFound(subject.to_string()),
            StatusCode::UNAUTHORIZED => {
                ApiError::Unauthorized("Invalid or missing GitHub token".to_string())
            }
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                if remaining == Some(0) || status == StatusCode::TOO_MANY_REQUESTS {
                    ApiError::RateLimited {
                        reset_epoch: reset.unwrap_or_else(default_reset_epoch),
                    }
                } else {
                    ApiError::Unauthorized(format!("Access forbidden: {}", truncate(&body)))
                }
            }
            s if s.is_server_error() => {
                ApiError::Network(format!("server error {s}: {}", truncate(&body)))
            }
            s => ApiError::Malformed(format!("unexpected status {s}: {}", truncate(&body))),
        }
    }
}

#[async_trait]
impl RepoLister for GitHubClient {
    async fn lookup_owner(&self, login: &str) -> Result<OwnerProfile, ApiError> {
        let url = format!("{}/users/{}", self.api_base, login);
        debug!("Resolving owner profile: {}", login);

        let response = self.get_with_retry(&url).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, login).await);
        }

        let raw: RawOwner = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;

        let kind = match raw.kind.as_deref() {
            Some("Organization") => OwnerKind::Organization,
            _ => OwnerKind::User,
        };

        Ok(OwnerProfile {
            login: raw.login,
            kind,
            html_url: raw.html_url,
            avatar_url: raw.avatar_url,
        })
    }

    async fn fetch_page(
        &self,
        owner: &OwnerProfile,
        cursor: PageCursor,
    ) -> Result<RepoPage, ApiError> {
        let base_path = match owner.kind {
            OwnerKind::User => "users",
            OwnerKind::Organization => "orgs",
        };
        let url = format!(
            "{}/{}/{}/repos?per_page={}&page={}&sort=pushed",
            self.api_base, base_path, owner.login, self.page_size, cursor.0
        );

        debug!("Fetching repositories page {} for {}", cursor.0, owner.login);

        let response = self.get_with_retry(&url).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, &owner.login).await);
        }

        let records: Vec<RepoRecord> = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;

        // A short page means the listing is exhausted; a full page may have a
        // successor (possibly empty, which the next fetch reports as done).
        let next_cursor = if records.len() == self.page_size as usize {
            Some(cursor.next())
        } else {
            None
        };

        Ok(RepoPage {
            records,
            next_cursor,
        })
    }
}

fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Fallback when a rate-limited response carries no reset header: the
/// documented window is one hour.
fn default_reset_epoch() -> u64 {
    (Utc::now().timestamp().max(0) as u64) + 3600
}

fn truncate(body: &str) -> &str {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_cursor_advances() {
        let first = PageCursor::first();
        assert_eq!(first, PageCursor(1));
        assert_eq!(first.next(), PageCursor(2));
    }

    #[test]
    fn test_repo_record_parsing() {
        let json = r#"{
            "name": "Hello-World",
            "full_name": "octocat/Hello-World",
            "description": "My first repository",
            "language": "Rust",
            "stargazers_count": 1420,
            "forks_count": 9,
            "default_branch": "main",
            "html_url": "https://github.com/octocat/Hello-World",
            "clone_url": "https://github.com/octocat/Hello-World.git",
            "pushed_at": "2024-03-01T12:00:00Z",
            "some_future_field": {"ignored": true}
        }"#;

        let record: RepoRecord = serde_json::from_str(json).expect("Failed to parse record");
        assert_eq!(record.full_name, "octocat/Hello-World");
        assert_eq!(record.star_count, 1420);
        assert_eq!(record.fork_count, 9);
        assert_eq!(record.language.as_deref(), Some("Rust"));
        assert!(record.pushed_at.is_some());
    }

    #[test]
    fn test_repo_record_tolerates_nulls() {
        let json = r#"{
            "name": "bare",
            "full_name": "octocat/bare",
            "description": null,
            "language": null,
            "pushed_at": null
        }"#;

        let record: RepoRecord = serde_json::from_str(json).expect("Failed to parse record");
        assert_eq!(record.description, None);
        assert_eq!(record.star_count, 0);
        assert_eq!(record.pushed_at, None);
    }

    #[test]
    fn test_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("42"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));

        assert_eq!(
            parse_header::<u32>(&headers, "x-ratelimit-remaining"),
            Some(42)
        );
        assert_eq!(
            parse_header::<u64>(&headers, "x-ratelimit-reset"),
            Some(1_700_000_000)
        );
        assert_eq!(parse_header::<u32>(&headers, "x-ratelimit-limit"), None);
    }

    #[test]
    #[serial_test::serial]
    fn test_environment_token_detection() {
        let saved = env::var("GITHUB_TOKEN").ok();

        env::set_var("GITHUB_TOKEN", "ghp_testtoken1234");
        let mut config = Config::default();
        config.github.auth_method = "token".to_string();
        let (strategy, token) = GitHubClient::detect_authentication(&config).unwrap();
        assert!(matches!(strategy, AuthStrategy::EnvironmentToken));
        assert_eq!(token.as_deref(), Some("ghp_testtoken1234"));

        env::remove_var("GITHUB_TOKEN");
        assert!(GitHubClient::detect_authentication(&config).is_err());

        match saved {
            Some(value) => env::set_var("GITHUB_TOKEN", value),
            None => env::remove_var("GITHUB_TOKEN"),
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_anonymous_auth_skips_credential_probes() {
        let mut config = Config::default();
        config.github.auth_method = "none".to_string();
        let (strategy, token) = GitHubClient::detect_authentication(&config).unwrap();
        assert!(matches!(strategy, AuthStrategy::Anonymous));
        assert_eq!(token, None);

        config.github.auth_method = "carrier-pigeon".to_string();
        assert!(GitHubClient::detect_authentication(&config).is_err());
    }

    #[test]
    fn test_owner_kind_selects_path() {
        let raw = r#"{"login": "octo-org", "type": "Organization"}"#;
        let owner: RawOwner = serde_json::from_str(raw).unwrap();
        assert_eq!(owner.kind.as_deref(), Some("Organization"));

        let raw = r#"{"login": "octocat"}"#;
        let owner: RawOwner = serde_json::from_str(raw).unwrap();
        assert_eq!(owner.kind, None);
    }
}
