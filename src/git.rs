//! Branch discovery for container naming.

use std::path::Path;

use git2::Repository;

use crate::naming::{DETACHED_BRANCH, NO_GIT_BRANCH};

/// Abbreviated HEAD name for the work tree containing `workspace`.
///
/// Returns [`NO_GIT_BRANCH`] outside a work tree (bare repositories included) and
/// [`DETACHED_BRANCH`] when HEAD is detached. An unborn branch reports the name
/// HEAD points at.
pub fn branch_name(workspace: &Path) -> String {
    let repo = match Repository::discover(workspace) {
        Ok(repo) if !repo.is_bare() => repo,
        _ => return NO_GIT_BRANCH.to_string(),
    };

    if repo.head_detached().unwrap_or(false) {
        return DETACHED_BRANCH.to_string();
    }

    if let Ok(head) = repo.head()
        && let Some(name) = head.shorthand()
    {
        return name.to_string();
    }

    // Unborn branch: HEAD is a symbolic ref to a branch with no commits yet
    repo.find_reference("HEAD")
        .ok()
        .and_then(|head| head.symbolic_target().map(str::to_string))
        .map(|target| {
            target
                .strip_prefix("refs/heads/")
                .unwrap_or(&target)
                .to_string()
        })
        .unwrap_or_else(|| NO_GIT_BRANCH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn commit_file(repo: &Repository, dir: &Path) -> git2::Oid {
        std::fs::write(dir.join("README.md"), "hello").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@localhost").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap()
    }

    #[test]
    fn test_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(branch_name(dir.path()), NO_GIT_BRANCH);
    }

    #[test]
    fn test_unborn_branch_reports_head_target() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.set_head("refs/heads/trunk").unwrap();
        assert_eq!(branch_name(dir.path()), "trunk");
    }

    #[test]
    fn test_branch_and_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.set_head("refs/heads/feature/login").unwrap();
        commit_file(&repo, dir.path());

        assert_eq!(branch_name(dir.path()), "feature/login");

        let nested = dir.path().join("src");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(branch_name(&nested), "feature/login");
    }

    #[test]
    fn test_detached_head() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let oid = commit_file(&repo, dir.path());
        repo.set_head_detached(oid).unwrap();
        assert_eq!(branch_name(dir.path()), DETACHED_BRANCH);
    }
}
