//! Shared fixtures for the API integration tests: a wiremock-backed GitHub
//! with canned owners, paginated repo listings, and rate-limit headers.

use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use repolens::Config;

/// Config pointing at the mock server: anonymous auth, near-zero retry
/// backoff so failure paths don't slow the suite down.
pub fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.github.auth_method = "none".to_string();
    config.github.api_base = server.uri();
    config.fetch.backoff_base_ms = 1;
    config
}

/// JSON body for one repository, in the API's listing shape.
pub fn repo_json(owner: &str, index: usize) -> Value {
    let name = format!("repo-{index:03}");
    json!({
        "name": name,
        "full_name": format!("{owner}/{name}"),
        "description": format!("Repository number {index}"),
        "language": "Rust",
        "stargazers_count": index,
        "forks_count": index / 2,
        "default_branch": "main",
        "html_url": format!("https://github.com/{owner}/{name}"),
        "clone_url": format!("https://github.com/{owner}/{name}.git"),
        "pushed_at": "2024-06-01T12:00:00Z"
    })
}

/// One listing page: `count` repositories starting at `start`.
pub fn page_json(owner: &str, start: usize, count: usize) -> Value {
    Value::Array((start..start + count).map(|i| repo_json(owner, i)).collect())
}

/// Rate-limit headers every real API response carries.
pub fn with_rate_limit(template: ResponseTemplate, remaining: u32, reset_epoch: u64) -> ResponseTemplate {
    template
        .insert_header("x-ratelimit-limit", "60")
        .insert_header("x-ratelimit-remaining", remaining.to_string().as_str())
        .insert_header("x-ratelimit-reset", reset_epoch.to_string().as_str())
}

/// Mount the owner-profile endpoint for a user account.
pub async fn mount_user(server: &MockServer, login: &str) {
    mount_owner(server, login, "User").await;
}

/// Mount the owner-profile endpoint for an organization account.
pub async fn mount_org(server: &MockServer, login: &str) {
    mount_owner(server, login, "Organization").await;
}

async fn mount_owner(server: &MockServer, login: &str, kind: &str) {
    let body = json!({
        "login": login,
        "type": kind,
        "html_url": format!("https://github.com/{login}"),
        "avatar_url": format!("https://avatars.githubusercontent.com/u/1?v=4")
    });
    Mock::given(method("GET"))
        .and(path(format!("/users/{login}")))
        .respond_with(with_rate_limit(
            ResponseTemplate::new(200).set_body_json(body),
            59,
            far_future_epoch(),
        ))
        .mount(server)
        .await;
}

/// Mount one page of a user's repository listing.
pub async fn mount_user_page(server: &MockServer, login: &str, page: u32, body: Value) {
    mount_page(server, &format!("/users/{login}/repos"), page, body).await;
}

/// Mount one page of an organization's repository listing.
pub async fn mount_org_page(server: &MockServer, login: &str, page: u32, body: Value) {
    mount_page(server, &format!("/orgs/{login}/repos"), page, body).await;
}

async fn mount_page(server: &MockServer, repos_path: &str, page: u32, body: Value) {
    Mock::given(method("GET"))
        .and(path(repos_path))
        .and(query_param("page", page.to_string().as_str()))
        .respond_with(with_rate_limit(
            ResponseTemplate::new(200).set_body_json(body),
            58,
            far_future_epoch(),
        ))
        .mount(server)
        .await;
}

/// A reset epoch comfortably in the future, so quota headers never trip the
/// budget gate unless a test arranges exhaustion explicitly.
pub fn far_future_epoch() -> u64 {
    (chrono::Utc::now().timestamp().max(0) as u64) + 3600
}

/// A reset epoch in the past: an exhausted window that refills immediately.
pub fn past_epoch() -> u64 {
    (chrono::Utc::now().timestamp().max(0) as u64).saturating_sub(60)
}
