//! Git worktree plumbing for spawn isolation. Non-read-only spawns get
//! a worktree on a fresh `adaf/spawn-<id>` branch cut from the parent
//! turn's commit; merge/reject finalize it.

use std::path::Path;

use tokio::process::Command;

use adaf_domain::{Error, Result};

/// Run a git command in `dir`, returning trimmed stdout.
async fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| Error::Worktree(format!("running git {}: {e}", args.join(" "))))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Worktree(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// The commit a spawn's worktree is cut from.
pub async fn rev_parse_head(dir: &Path) -> Result<String> {
    git(dir, &["rev-parse", "HEAD"]).await
}

/// `git worktree add -b <branch> <target> <commit>`.
pub async fn add_worktree(
    project_dir: &Path,
    branch: &str,
    target: &Path,
    commit: &str,
) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let target_str = target.to_string_lossy().to_string();
    git(
        project_dir,
        &["worktree", "add", "-b", branch, &target_str, commit],
    )
    .await?;
    tracing::debug!(branch, target = %target.display(), "worktree created");
    Ok(())
}

/// Diff stat of the worktree against its base commit.
pub async fn diff_stat(worktree_dir: &Path, base: &str) -> Result<String> {
    git(worktree_dir, &["diff", "--stat", base]).await
}

/// Commits made on the spawn branch since its base.
pub async fn commit_count(worktree_dir: &Path, base: &str) -> Result<u32> {
    let range = format!("{base}..HEAD");
    let out = git(worktree_dir, &["rev-list", "--count", &range]).await?;
    out.parse()
        .map_err(|_| Error::Worktree(format!("unexpected rev-list output: {out}")))
}

/// Merge a finished spawn's branch into the project working copy, then
/// prune the worktree. Both paths leave the project at a committed
/// state: `--squash` only stages the diff, so it is committed here.
pub async fn merge_spawn(
    project_dir: &Path,
    worktree_dir: &Path,
    branch: &str,
    squash: bool,
) -> Result<()> {
    if squash {
        git(project_dir, &["merge", "--squash", branch]).await?;
        // `diff --cached --quiet` exits non-zero when anything is
        // staged; a no-op squash has nothing to commit.
        if git(project_dir, &["diff", "--cached", "--quiet"]).await.is_err() {
            let message = format!("squash merge of {branch}");
            git(project_dir, &["commit", "-m", &message]).await?;
        }
    } else {
        git(project_dir, &["merge", "--no-edit", branch]).await?;
    }
    remove_worktree(project_dir, worktree_dir, branch).await
}

/// Discard a spawn's worktree and branch.
pub async fn remove_worktree(project_dir: &Path, worktree_dir: &Path, branch: &str) -> Result<()> {
    let dir_str = worktree_dir.to_string_lossy().to_string();
    if worktree_dir.exists() {
        git(project_dir, &["worktree", "remove", "--force", &dir_str]).await?;
    }
    // The branch may be checked out nowhere by now; deletion failures
    // after a squash merge are expected and logged only.
    if let Err(e) = git(project_dir, &["branch", "-D", branch]).await {
        tracing::debug!(branch, error = %e, "spawn branch not deleted");
    }
    Ok(())
}
