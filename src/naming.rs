//! Container, volume, and file names derived from a workspace.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::errors::ValidationError;

/// Combined ceiling for `len(repo) + len(branch)` in a generated name.
pub const MAX_COMPONENTS_LEN: usize = 23;

/// Ceiling for a generated container name, suffix included.
pub const MAX_CONTAINER_NAME_LEN: usize = MAX_COMPONENTS_LEN + 1;

/// Candidates tried (base name included) before giving up on collisions.
pub const MAX_NAME_ATTEMPTS: u32 = 99;

/// Branch component when the workspace is not a git work tree.
pub const NO_GIT_BRANCH: &str = "nogit";

/// Branch component when HEAD is detached.
pub const DETACHED_BRANCH: &str = "detached";

static VOLUME_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,254}$").unwrap());

static CONTAINER_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap());

/// Lowercase, map everything outside `[a-z0-9]` to `-`, collapse dash runs, trim edge dashes.
pub fn sanitize_component(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Compose `{repo}-{branch}`.
///
/// Only the last `/` segment of the branch is used. Empty components fall back to
/// `repo` / `branch`. When the pair is longer than [`MAX_COMPONENTS_LEN`] the longer
/// component is trimmed first.
pub fn compose(repo: &str, branch: &str) -> String {
    let branch_leaf = branch.rsplit('/').next().unwrap_or(branch);

    let mut repo = sanitize_component(repo);
    let mut branch = sanitize_component(branch_leaf);
    if repo.is_empty() {
        repo = "repo".to_string();
    }
    if branch.is_empty() {
        branch = "branch".to_string();
    }

    while repo.len() + branch.len() > MAX_COMPONENTS_LEN {
        if repo.len() >= branch.len() {
            repo.pop();
        } else {
            branch.pop();
        }
    }

    let repo = repo.trim_end_matches('-');
    let branch = branch.trim_end_matches('-');
    format!(
        "{}-{}",
        if repo.is_empty() { "repo" } else { repo },
        if branch.is_empty() { "branch" } else { branch }
    )
}

/// The `attempt`-th candidate for `base`: attempt 1 is the base itself, then `-2`, `-3`, ...
///
/// The base is trimmed so the result stays within [`MAX_CONTAINER_NAME_LEN`].
pub fn candidate(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        return truncate_name(base, MAX_CONTAINER_NAME_LEN);
    }
    let suffix = format!("-{}", attempt);
    let room = MAX_CONTAINER_NAME_LEN.saturating_sub(suffix.len());
    format!("{}{}", truncate_name(base, room), suffix)
}

fn truncate_name(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    name[..name.floor_char_boundary(max_len)]
        .trim_end_matches('-')
        .to_string()
}

/// Repository component: the workspace's last path segment.
pub fn repo_name(workspace: &Path) -> String {
    workspace
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Filesystem-safe, collision-proof identifier for a workspace path.
///
/// The readable part is the sanitized last segment; the hash keeps two
/// same-named directories apart.
pub fn workspace_safe_name(workspace: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workspace.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    let mut readable = sanitize_component(&repo_name(workspace));
    if readable.is_empty() {
        readable = "workspace".to_string();
    }
    format!("{}-{}", truncate_name(&readable, 40), &digest[..12])
}

/// Name for a fresh data volume generated by `shell --reset`.
pub fn reset_volume_name(workspace: &Path, now: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "{}-{}",
        workspace_safe_name(workspace),
        now.format("%Y%m%d%H%M%S")
    )
}

/// Validate a data volume name coming from `source_name`.
pub fn validate_volume_name(name: &str, source_name: &str) -> Result<(), ValidationError> {
    if VOLUME_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidVolumeName {
            name: name.to_string(),
            source_name: source_name.to_string(),
        })
    }
}

pub fn validate_container_name(name: &str) -> Result<(), ValidationError> {
    if CONTAINER_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidContainerName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_compose_uses_branch_leaf() {
        assert_eq!(compose("myrepo", "feature/x"), "myrepo-x");
        assert_eq!(compose("app", "main"), "app-main");
    }

    #[test]
    fn test_compose_sanitizes() {
        assert_eq!(compose("My_Repo!!", "Fix--Bug__42"), "my-repo-fix-bug-42");
        assert_eq!(compose("--app--", "-main-"), "app-main");
    }

    #[test]
    fn test_compose_empty_components_fall_back() {
        assert_eq!(compose("", ""), "repo-branch");
        assert_eq!(compose("___", "feature/"), "repo-branch");
        assert_eq!(compose("app", "!!!"), "app-branch");
    }

    #[test]
    fn test_compose_trims_longer_component_first() {
        let name = compose("a-really-long-repository-name", "main");
        let (repo, branch) = name.rsplit_once('-').unwrap();
        assert_eq!(branch, "main");
        assert!(repo.len() + branch.len() <= MAX_COMPONENTS_LEN);
        assert!(repo.starts_with("a-really-long"));

        let name = compose("app", "an-extremely-long-feature-branch-name");
        assert!(name.starts_with("app-"));
        assert!(name.len() <= MAX_COMPONENTS_LEN + 1);
    }

    #[test]
    fn test_compose_length_bound() {
        for (repo, branch) in [
            ("x".repeat(100), "y".repeat(100)),
            ("short".to_string(), "z".repeat(60)),
            ("q".repeat(60), "b".to_string()),
        ] {
            let name = compose(&repo, &branch);
            assert!(name.len() <= MAX_COMPONENTS_LEN + 1, "{} too long", name);
            assert!(!name.ends_with('-'));
        }
    }

    #[test]
    fn test_candidate_suffixes() {
        assert_eq!(candidate("app-x", 1), "app-x");
        assert_eq!(candidate("app-x", 2), "app-x-2");
        assert_eq!(candidate("app-x", 3), "app-x-3");
        assert_eq!(candidate("app-x", 99), "app-x-99");
    }

    #[test]
    fn test_candidate_trims_base_to_ceiling() {
        let base = compose(&"r".repeat(30), &"b".repeat(30));
        assert_eq!(base.len(), MAX_CONTAINER_NAME_LEN);
        let c = candidate(&base, 42);
        assert!(c.len() <= MAX_CONTAINER_NAME_LEN);
        assert!(c.ends_with("-42"));
        assert!(!c.contains("--"));
    }

    #[test]
    fn test_volume_name_validation() {
        assert!(validate_volume_name("containai-data", "cli").is_ok());
        assert!(validate_volume_name("A.b_c-1", "cli").is_ok());
        assert!(validate_volume_name("-leading", "cli").is_err());
        assert!(validate_volume_name("has space", "cli").is_err());
        assert!(validate_volume_name("", "cli").is_err());
        assert!(validate_volume_name(&"v".repeat(255), "cli").is_ok());
        assert!(validate_volume_name(&"v".repeat(256), "cli").is_err());
    }

    #[test]
    fn test_container_name_validation() {
        assert!(validate_container_name("app-main").is_ok());
        assert!(validate_container_name("_x").is_err());
        assert!(validate_container_name("a/b").is_err());
    }

    #[test]
    fn test_workspace_safe_name_distinguishes_paths() {
        let a = workspace_safe_name(Path::new("/home/me/one/app"));
        let b = workspace_safe_name(Path::new("/home/me/two/app"));
        assert!(a.starts_with("app-"));
        assert!(b.starts_with("app-"));
        assert_ne!(a, b);
        assert_eq!(a, workspace_safe_name(Path::new("/home/me/one/app")));
    }

    #[test]
    fn test_reset_volume_name_is_valid() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let name = reset_volume_name(Path::new("/src/App"), now);
        assert!(name.starts_with("app-"));
        assert!(name.ends_with("-20260102030405"));
        assert!(validate_volume_name(&name, "reset").is_ok());
    }
}
