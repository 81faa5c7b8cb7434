// Git operations inside the workspace container

use serde::{Deserialize, Serialize};

use crate::process::ExecOutput;
use crate::shell::ShellCommand;
use crate::ssh::Transport;
use crate::workspace::GitConfig;

pub const GIT_USER_NAME: &str = "codecell";
pub const GIT_USER_EMAIL: &str = "codecell@localhost";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_COMMIT_MESSAGE: &str = "Changes by codecell";

const LOG_FORMAT: &str = "--pretty=format:%H|%s|%aI|%an <%ae>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author: String,
    /// ISO-8601 author date.
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitStatus {
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
}

impl GitStatus {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.modified.is_empty() && self.untracked.is_empty()
    }
}

/// Per-workspace git state. Lives as long as the container does.
#[derive(Debug, Clone)]
pub struct GitCoordinator {
    work_dir: String,
    config: GitConfig,
    initialized: bool,
}

impl GitCoordinator {
    pub fn new(work_dir: &str, config: GitConfig) -> Self {
        Self {
            work_dir: work_dir.to_string(),
            config,
            initialized: false,
        }
    }

    pub fn work_dir(&self) -> &str {
        &self.work_dir
    }

    /// Bind to a live transport for a sequence of operations.
    pub fn with<'a>(&'a mut self, transport: &'a dyn Transport) -> Git<'a> {
        Git {
            coordinator: self,
            transport,
        }
    }
}

/// Git repository in the container work directory, driven over a transport.
///
/// Remote failures come back as `None`, `false` or empty values.
pub struct Git<'a> {
    coordinator: &'a mut GitCoordinator,
    transport: &'a dyn Transport,
}

impl Git<'_> {
    fn run(&self, command: ShellCommand) -> ExecOutput {
        let rendered = command.render();
        let output = self
            .transport
            .execute(&rendered, Some(&self.coordinator.work_dir), &[], None);
        if !output.success() {
            tracing::debug!(
                "`{}` exited {}: {}",
                rendered,
                output.exit_code,
                output.stderr.trim()
            );
        }
        output
    }

    fn git<I, S>(args: I) -> ShellCommand
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ShellCommand::new("git").args(args)
    }

    pub fn work_dir(&self) -> &str {
        &self.coordinator.work_dir
    }

    pub fn is_initialized(&mut self) -> bool {
        if self.coordinator.initialized {
            return true;
        }
        let git_dir = format!("{}/.git", self.coordinator.work_dir.trim_end_matches('/'));
        let found = self
            .run(ShellCommand::new("test").args(["-d", &git_dir]))
            .success();
        self.coordinator.initialized = found;
        found
    }

    /// Create the repository. Returns false if it already existed or setup failed.
    pub fn init(&mut self) -> bool {
        if self.is_initialized() {
            return false;
        }
        self.create_repo()
    }

    pub fn ensure_initialized(&mut self) -> bool {
        self.is_initialized() || self.create_repo()
    }

    fn create_repo(&mut self) -> bool {
        tracing::info!("Initializing git repository in {}", self.coordinator.work_dir);
        let setup = Self::git(["init", "-q"])
            .and_then(Self::git(["symbolic-ref", "HEAD"]).arg(format!("refs/heads/{}", DEFAULT_BRANCH)))
            .and_then(Self::git(["config", "user.email", GIT_USER_EMAIL]))
            .and_then(Self::git(["config", "user.name", GIT_USER_NAME]));
        if !self.run(setup).success() {
            tracing::warn!("git init failed in {}", self.coordinator.work_dir);
            return false;
        }
        self.coordinator.initialized = true;

        if !self.coordinator.config.default_gitignore.is_empty() {
            let write = ShellCommand::new("printf")
                .arg("%s\\n")
                .args(&self.coordinator.config.default_gitignore)
                .raw(">")
                .arg(".gitignore");
            let gitignore = ShellCommand::new("test").args(["-f", ".gitignore"]).or_else(write);
            if !self.run(gitignore).success() {
                tracing::warn!("Could not write default .gitignore");
            }
        }

        if self.coordinator.config.auto_commit {
            let initial = Self::git(["add", "-A"])
                .and_then(Self::git(["commit", "-q", "--allow-empty", "-m", "Initial commit"]));
            if !self.run(initial).success() {
                tracing::warn!("Initial commit failed");
            }
        }

        true
    }

    /// Stage everything and commit. `None` when there is nothing to commit.
    pub fn commit_all(&mut self, message: &str) -> Option<String> {
        if !self.ensure_initialized() {
            return None;
        }

        if !self.run(Self::git(["add", "-A"])).success() {
            return None;
        }

        let status = self.run(Self::git(["status", "--porcelain"]));
        if !status.success() || status.stdout.trim().is_empty() {
            return None;
        }

        if !self.run(Self::git(["commit", "-q", "-m", message])).success() {
            return None;
        }

        self.rev_parse("HEAD")
    }

    fn rev_parse(&self, reference: &str) -> Option<String> {
        let output = self.run(Self::git(["rev-parse", "--verify", "-q", reference]));
        let hash = output.stdout.trim();
        (output.success() && !hash.is_empty()).then(|| hash.to_string())
    }

    /// `reset --hard` or `reset --mixed` to `reference`.
    pub fn rollback(&mut self, reference: &str, hard: bool) -> bool {
        let mode = if hard { "--hard" } else { "--mixed" };
        self.run(Self::git(["reset", "-q", mode, reference])).success()
    }

    pub fn list_commits(&mut self, max_count: usize) -> Vec<CommitInfo> {
        let count = max_count.to_string();
        let output = self.run(Self::git(["log", "-n", &count, LOG_FORMAT]));
        if !output.success() {
            return Vec::new();
        }
        parse_log(&output.stdout)
    }

    pub fn current_commit(&mut self) -> Option<CommitInfo> {
        self.get_commit("HEAD")
    }

    pub fn get_commit(&mut self, reference: &str) -> Option<CommitInfo> {
        let output = self.run(Self::git(["log", "-1", LOG_FORMAT, reference, "--"]));
        if !output.success() {
            return None;
        }
        parse_log(&output.stdout).into_iter().next()
    }

    pub fn status(&mut self) -> GitStatus {
        let output = self.run(Self::git(["status", "--porcelain"]));
        if !output.success() {
            return GitStatus::default();
        }
        parse_status(&output.stdout)
    }

    /// Working tree diff, or against `reference` when given.
    pub fn diff(&mut self, reference: Option<&str>) -> String {
        let mut command = Self::git(["--no-pager", "diff"]);
        if let Some(reference) = reference {
            command = command.arg(reference);
        }
        let output = self.run(command);
        if output.success() {
            output.stdout
        } else {
            String::new()
        }
    }

    pub fn create_branch(&mut self, name: &str, checkout: bool) -> bool {
        let command = if checkout {
            Self::git(["checkout", "-q", "-b", name])
        } else {
            Self::git(["branch", name])
        };
        self.run(command).success()
    }

    pub fn checkout(&mut self, reference: &str) -> bool {
        self.run(Self::git(["checkout", "-q", reference])).success()
    }

    /// `None` on a detached HEAD.
    pub fn current_branch(&mut self) -> Option<String> {
        let output = self.run(Self::git(["symbolic-ref", "--short", "-q", "HEAD"]));
        let branch = output.stdout.trim();
        (output.success() && !branch.is_empty()).then(|| branch.to_string())
    }

    pub fn stash(&mut self, message: Option<&str>) -> bool {
        let mut command = Self::git(["stash", "push", "-u"]);
        if let Some(message) = message {
            command = command.args(["-m", message]);
        }
        self.run(command).success()
    }

    pub fn stash_pop(&mut self) -> bool {
        self.run(Self::git(["stash", "pop"])).success()
    }
}

/// Parse `hash|subject|date|author` lines. The subject may itself contain
/// `|`; lines missing delimiters are skipped.
pub fn parse_log(output: &str) -> Vec<CommitInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (hash, rest) = line.split_once('|')?;
            let mut tail = rest.rsplitn(3, '|');
            let author = tail.next()?;
            let timestamp = tail.next()?;
            let message = tail.next()?;
            if hash.is_empty() {
                return None;
            }
            Some(CommitInfo {
                hash: hash.to_string(),
                short_hash: hash.chars().take(7).collect(),
                message: message.trim().to_string(),
                author: author.trim().to_string(),
                timestamp: timestamp.trim().to_string(),
            })
        })
        .collect()
}

pub fn parse_status(output: &str) -> GitStatus {
    let mut status = GitStatus::default();
    for line in output.lines() {
        if line.len() < 4 {
            continue;
        }
        let mut codes = line.chars();
        let (x, y) = match (codes.next(), codes.next()) {
            (Some(x), Some(y)) => (x, y),
            _ => continue,
        };
        let path = line[3..].trim();
        // Renames report `old -> new`.
        let path = path.rsplit(" -> ").next().unwrap_or(path).to_string();

        if x == '?' && y == '?' {
            status.untracked.push(path);
            continue;
        }
        if x != ' ' {
            status.staged.push(path.clone());
        }
        if y != ' ' {
            status.modified.push(path);
        }
    }
    status
}
