//! Read-only git queries used by the completion detector.
//!
//! The engine never commits; it only asks git which files changed so the
//! detector can skip revalidating untouched feature records.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path relative to the repository root.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// True if `workdir` is inside a git work tree.
    ///
    /// A missing `git` binary counts as "not a repository".
    pub fn is_repo(&self) -> bool {
        Command::new("git")
            .args(["rev-parse", "--is-inside-work-tree"])
            .current_dir(&self.workdir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    /// Absolute path of the repository root.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Full HEAD sha, `None` before the first commit.
    pub fn head_sha(&self) -> Option<String> {
        self.run_capture(&["rev-parse", "--verify", "--quiet", "HEAD"])
            .ok()
            .map(|out| out.trim().to_string())
            .filter(|sha| !sha.is_empty())
    }

    /// Whether `path` is excluded by a gitignore rule. Status and diff
    /// never report ignored paths.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.run(&["check-ignore", "--quiet", &path])
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Paths (relative to the root) touched between two commits.
    pub fn diff_names(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let range = format!("{from}..{to}");
        let out = self.run_capture(&["diff", "--name-only", &range])?;
        Ok(out
            .lines()
            .map(|line| unquote(line.trim()))
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Absolute paths under `dir` that differ from the working tree state
    /// seen at `since` (a commit sha): uncommitted, untracked, or committed
    /// after `since`.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn changed_paths_under(&self, dir: &Path, since: Option<&str>) -> Result<Vec<PathBuf>> {
        let root = canonical(&self.toplevel()?);
        let dir = canonical(dir);
        let mut relative: Vec<String> = self
            .status_porcelain()?
            .into_iter()
            .map(|entry| entry.path)
            .collect();
        if let (Some(since), Some(head)) = (since, self.head_sha())
            && since != head
        {
            relative.extend(self.diff_names(since, &head)?);
        }
        let changed: Vec<PathBuf> = relative
            .into_iter()
            .map(|path| root.join(path))
            .filter(|path| path.starts_with(&dir))
            .collect();
        debug!(count = changed.len(), "changed paths");
        Ok(changed)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Canonicalize when possible so symlinked temp dirs compare equal.
pub(crate) fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: unquote(path.trim()),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim();
    if let Some((_, new)) = path.split_once(" -> ") {
        path = new.trim();
    }
    Ok(StatusEntry {
        code,
        path: unquote(path),
    })
}

fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? meta/features/feature-a/feature.json").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "meta/features/feature-a/feature.json".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/main.rs").expect("parse");
        assert_eq!(e.code, " M");
        assert_eq!(e.path, "src/main.rs");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn strips_quotes_from_special_paths() {
        let e = parse_status_line("?? \"dir with space/a.json\"").expect("parse");
        assert_eq!(e.path, "dir with space/a.json");
    }

    #[test]
    fn short_line_is_rejected() {
        assert!(parse_status_line("M").is_err());
    }

    #[test]
    fn plain_directory_is_not_a_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(!Git::new(temp.path()).is_repo());
    }
}
