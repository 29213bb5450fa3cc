//! RepoLens - GitHub Repository Fetch and Clone Engine
//!
//! RepoLens lists every repository of a GitHub user or organization through
//! paginated API traversal and clones selected repositories with git, while
//! respecting the API's rate-limit windows.
//!
//! ## Core Features
//!
//! - **Paginated Fetching**: Cursor-driven traversal that streams pages as
//!   they arrive instead of blocking on the full listing
//! - **Rate-Limit Awareness**: Quota tracking from response headers with
//!   automatic pause and resume across window resets
//! - **Background Sessions**: Fetches run off the interactive surface with
//!   ordered event streams and cooperative cancellation
//! - **Clone Orchestration**: git subprocess clones with wall-clock timeouts
//!   and uniform failure classification
//! - **Authentication**: GitHub CLI and token-based authentication support
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`github`]: GitHub API integration and authentication
//! - [`ratelimit`]: Rate-limit window tracking and request gating
//! - [`classify`]: Terminal clone-outcome classification
//! - [`clone`]: git subprocess clone orchestration
//! - [`runner`]: Background fetch sessions and clone jobs

pub mod classify;
pub mod clone;
pub mod config;
pub mod error;
pub mod github;
pub mod ratelimit;
pub mod runner;

pub use classify::{classify, Classification};
pub use clone::CloneOrchestrator;
pub use config::Config;
pub use error::{ApiError, CloneError, CloneFailureKind};
pub use github::{GitHubClient, OwnerProfile, PageCursor, RepoLister, RepoRecord};
pub use ratelimit::{Budget, RateLimitStatus, RateLimiter};
pub use runner::{FetchHandle, SessionEvent, SessionState, TaskRunner};
