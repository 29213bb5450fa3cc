//! Clone orchestration via the external git client
//!
//! The orchestrator treats git purely as a capability: spawn, collect exit
//! status and stderr, hand both to the classifier. It enforces a wall-clock
//! timeout (expiry kills the child and classifies as a network failure) and
//! refuses destinations that already hold content. Partially cloned
//! directories are left as-is for the caller to inspect - automatic rollback
//! is deliberately out of scope.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::classify::{classify, Classification};
use crate::config::Config;
use crate::error::{CloneError, CloneFailureKind};

/// Spawns and supervises `git clone` subprocesses.
#[derive(Debug, Clone)]
pub struct CloneOrchestrator {
    timeout: Duration,
}

impl CloneOrchestrator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.clone_timeout())
    }

    /// Destination directory for a repository under the configured base.
    pub fn destination_for(base: &Path, repo_name: &str) -> PathBuf {
        base.join(repo_name)
    }

    /// Clone `clone_url` into `destination`.
    ///
    /// An existing non-empty destination is rejected before the subprocess is
    /// invoked. The parent directory is created if absent; an existing empty
    /// directory is acceptable (git clones into it).
    pub async fn clone_repo(&self, clone_url: &str, destination: &Path) -> Result<(), CloneError> {
        if destination_occupied(destination) {
            warn!(
                "Refusing clone into occupied path: {}",
                destination.display()
            );
            return Err(CloneError::ConflictingDestination(
                destination.to_path_buf(),
            ));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CloneError::classified(
                    CloneFailureKind::Unknown,
                    format!("failed to create parent directory {}: {e}", parent.display()),
                )
            })?;
        }

        info!("Cloning {} -> {}", clone_url, destination.display());

        let child = AsyncCommand::new("git")
            .arg("clone")
            .arg("--")
            .arg(clone_url)
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CloneError::classified(
                    CloneFailureKind::Unknown,
                    format!("failed to launch git: {e}"),
                )
            })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CloneError::classified(
                    CloneFailureKind::Unknown,
                    format!("failed to collect git output: {e}"),
                ));
            }
            // Dropping the timed-out future kills the child (kill_on_drop).
            Err(_) => {
                warn!(
                    "Clone of {} exceeded {:?}, terminating",
                    clone_url, self.timeout
                );
                return Err(CloneError::classified(
                    CloneFailureKind::NetworkError,
                    format!(
                        "clone did not complete within {:?} and was terminated",
                        self.timeout
                    ),
                ));
            }
        };

        if !output.stdout.is_empty() {
            debug!(
                "git clone stdout: {}",
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        match classify(output.status.code(), &stderr, None) {
            Classification::Success => {
                info!("Successfully cloned {}", clone_url);
                Ok(())
            }
            Classification::Failure { kind, detail } => Err(CloneError::Classified { kind, detail }),
        }
    }
}

/// A destination conflicts when it exists and is anything but an empty
/// directory.
fn destination_occupied(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        // Exists but is a file, or unreadable - treat as occupied.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(args: &[&str], dir: &Path) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("failed to run git");
        assert!(status.success(), "git {:?} failed", args);
    }

    /// Build a tiny local repository to clone from, avoiding the network.
    fn make_source_repo(dir: &Path) {
        git(&["init", "--quiet", "."], dir);
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        git(&["add", "README.md"], dir);
        git(
            &[
                "-c",
                "user.email=test@example.com",
                "-c",
                "user.name=Test",
                "commit",
                "--quiet",
                "-m",
                "initial",
            ],
            dir,
        );
    }

    #[test]
    fn test_destination_occupancy() {
        let temp = TempDir::new().unwrap();

        let missing = temp.path().join("missing");
        assert!(!destination_occupied(&missing));

        let empty = temp.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        assert!(!destination_occupied(&empty));

        let full = temp.path().join("full");
        std::fs::create_dir(&full).unwrap();
        std::fs::write(full.join("file"), "x").unwrap();
        assert!(destination_occupied(&full));

        let file = temp.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(destination_occupied(&file));
    }

    #[tokio::test]
    async fn test_conflicting_destination_skips_subprocess() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("taken");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("existing"), "content").unwrap();

        let orchestrator = CloneOrchestrator::new(Duration::from_secs(5));
        // A URL that would fail instantly if the subprocess were invoked;
        // the conflict must win first.
        let result = orchestrator.clone_repo("not-a-real-url", &dest).await;

        assert_matches!(result, Err(CloneError::ConflictingDestination(path)) if path == dest);
        // Existing content untouched.
        assert!(dest.join("existing").exists());
    }

    #[tokio::test]
    async fn test_clone_local_repository() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        std::fs::create_dir(&source).unwrap();
        make_source_repo(&source);

        let dest = temp.path().join("nested").join("dest");
        let orchestrator = CloneOrchestrator::new(Duration::from_secs(60));

        let result = orchestrator.clone_repo(source.to_str().unwrap(), &dest).await;

        assert_matches!(result, Ok(()));
        // Parent directory was created and the work tree is present.
        assert!(dest.join(".git").exists());
        assert!(dest.join("README.md").exists());
    }

    #[tokio::test]
    async fn test_clone_missing_source_is_classified() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dest");

        let orchestrator = CloneOrchestrator::new(Duration::from_secs(30));
        let missing = temp.path().join("does-not-exist");
        let result = orchestrator.clone_repo(missing.to_str().unwrap(), &dest).await;

        // git reports a nonzero exit; the exact kind depends on the
        // diagnostic text, but it must be a classified failure, never a
        // conflict or a panic.
        assert_matches!(result, Err(CloneError::Classified { .. }));
    }

    #[tokio::test]
    async fn test_clone_empty_repository_detected() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("empty-source");
        std::fs::create_dir(&source).unwrap();
        git(&["init", "--quiet", "."], &source);

        let dest = temp.path().join("dest");
        let orchestrator = CloneOrchestrator::new(Duration::from_secs(60));
        let result = orchestrator.clone_repo(source.to_str().unwrap(), &dest).await;

        assert_matches!(
            result,
            Err(CloneError::Classified {
                kind: CloneFailureKind::EmptyRepository,
                ..
            })
        );
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_timeout_kills_hung_clone() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dest");

        // The ext transport runs an arbitrary command as the remote; one that
        // never produces protocol data leaves git blocked on its stdout, so
        // only the wall-clock deadline can end the clone.
        std::env::set_var("GIT_ALLOW_PROTOCOL", "ext");
        let orchestrator = CloneOrchestrator::new(Duration::from_millis(300));
        let result = orchestrator.clone_repo("ext::sleep 30", &dest).await;
        std::env::remove_var("GIT_ALLOW_PROTOCOL");

        assert_matches!(
            result,
            Err(CloneError::Classified {
                kind: CloneFailureKind::NetworkError,
                detail,
            }) if detail.contains("did not complete")
        );
    }

    #[test]
    fn test_destination_for() {
        let base = Path::new("/tmp/repos");
        assert_eq!(
            CloneOrchestrator::destination_for(base, "Hello-World"),
            PathBuf::from("/tmp/repos/Hello-World")
        );
    }
}
