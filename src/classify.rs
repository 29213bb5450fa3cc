//! Clone outcome classification
//!
//! Pure, total mapping from a subprocess outcome (exit code, stderr text,
//! optional HTTP status) to an actionable category. Free-text matching over
//! git diagnostics is inherently fragile, so every recognized string lives in
//! the `RULES` table below and nowhere else; orchestration never inspects
//! stderr itself.
//!
//! Any unmatched nonzero outcome becomes `Unknown` carrying the raw text -
//! information is never discarded, and malformed or empty input never fails.

use crate::error::CloneFailureKind;

/// Result of classifying a clone subprocess outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Exit 0 with no degenerate-output markers.
    Success,
    /// Everything else, with the human-readable reason preserved.
    Failure {
        kind: CloneFailureKind,
        detail: String,
    },
}

/// Takedown / access policy explanation attached to AccessDenied outcomes.
pub const ACCESS_POLICY_URL: &str =
    "https://docs.github.com/site-policy/content-removal-policies/dmca-takedown-policy";

/// Recognized stderr fragments, matched case-insensitively in order.
/// First match wins; fragments earlier in the table are more specific.
const RULES: &[(&str, CloneFailureKind)] = &[
    ("rate limit", CloneFailureKind::RateLimited),
    ("too many requests", CloneFailureKind::RateLimited),
    ("empty repository", CloneFailureKind::EmptyRepository),
    // Takedown notices read "Repository unavailable due to ..." with exit 128.
    ("unavailable", CloneFailureKind::AccessDenied),
    ("access denied", CloneFailureKind::AccessDenied),
    ("permission denied", CloneFailureKind::AccessDenied),
    ("authentication failed", CloneFailureKind::AccessDenied),
    ("could not read username", CloneFailureKind::AccessDenied),
    ("403", CloneFailureKind::AccessDenied),
    ("repository not found", CloneFailureKind::RepoNotFound),
    ("not found", CloneFailureKind::RepoNotFound),
    ("could not resolve host", CloneFailureKind::NetworkError),
    ("connection timed out", CloneFailureKind::NetworkError),
    ("operation timed out", CloneFailureKind::NetworkError),
    ("connection refused", CloneFailureKind::NetworkError),
    ("network is unreachable", CloneFailureKind::NetworkError),
    ("early eof", CloneFailureKind::NetworkError),
    ("unable to access", CloneFailureKind::NetworkError),
];

/// Classify a clone subprocess outcome.
///
/// `exit_code` is `None` when the process was killed (e.g. by the timeout
/// enforcer); `http_status` is supplied when the failure came from an HTTP
/// transport rather than the subprocess.
pub fn classify(exit_code: Option<i32>, stderr: &str, http_status: Option<u16>) -> Classification {
    let lowered = stderr.to_lowercase();

    if exit_code == Some(0) {
        // git clone of a repository with no commits exits 0 but warns on
        // stderr; surface that as a distinct category.
        if lowered.contains("empty repository") {
            return failure(CloneFailureKind::EmptyRepository, stderr, exit_code);
        }
        return Classification::Success;
    }

    if let Some(status) = http_status {
        match status {
            404 | 410 => return failure(CloneFailureKind::RepoNotFound, stderr, exit_code),
            429 => return failure(CloneFailureKind::RateLimited, stderr, exit_code),
            401 | 403 => {
                let kind = if lowered.contains("rate limit") {
                    CloneFailureKind::RateLimited
                } else {
                    CloneFailureKind::AccessDenied
                };
                return failure(kind, stderr, exit_code);
            }
            s if s >= 500 => return failure(CloneFailureKind::NetworkError, stderr, exit_code),
            _ => {}
        }
    }

    for (fragment, kind) in RULES {
        if lowered.contains(fragment) {
            return failure(*kind, stderr, exit_code);
        }
    }

    failure(CloneFailureKind::Unknown, stderr, exit_code)
}

fn failure(kind: CloneFailureKind, stderr: &str, exit_code: Option<i32>) -> Classification {
    let trimmed = stderr.trim();
    let detail = if trimmed.is_empty() {
        match exit_code {
            Some(code) => format!("git exited with code {code} and no diagnostic output"),
            None => "git was terminated before producing diagnostic output".to_string(),
        }
    } else {
        trimmed.to_string()
    };

    let detail = if kind == CloneFailureKind::AccessDenied {
        format!("{detail} (see {ACCESS_POLICY_URL})")
    } else {
        detail
    };

    Classification::Failure { kind, detail }
}
