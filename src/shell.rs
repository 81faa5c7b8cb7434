//! Remote shell command construction.
//!
//! Everything that crosses the SSH or `docker exec` boundary is an opaque
//! command line for a POSIX shell. Arguments are single-quoted here so prompts,
//! commit messages and filenames containing metacharacters reach the remote
//! program verbatim.

use std::fmt;

/// Quote `value` for a POSIX shell. Plain words are left untouched.
pub fn quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value.chars().all(is_plain) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@' | '%' | '+' | ',' | '=')
}

/// Valid environment variable names: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone)]
struct Segment {
    connector: Option<Connector>,
    tokens: Vec<String>,
}

/// Builder for a remote command line.
///
/// ```
/// use codecell::shell::ShellCommand;
///
/// let cmd = ShellCommand::new("git")
///     .args(["commit", "-m", "it's done"])
///     .and_then(ShellCommand::new("git").args(["rev-parse", "HEAD"]));
/// assert_eq!(cmd.render(), "git commit -m 'it'\\''s done' && git rev-parse HEAD");
/// ```
#[derive(Debug, Clone)]
pub struct ShellCommand {
    segments: Vec<Segment>,
}

impl ShellCommand {
    pub fn new(program: &str) -> Self {
        Self {
            segments: vec![Segment {
                connector: None,
                tokens: vec![quote(program)],
            }],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.last_tokens().push(quote(arg.as_ref()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Append an unquoted token such as a redirection (`>`, `2>/dev/null`).
    pub fn raw(mut self, token: &str) -> Self {
        self.last_tokens().push(token.to_string());
        self
    }

    /// Run `next` only if everything so far succeeded.
    pub fn and_then(self, next: ShellCommand) -> Self {
        self.join(Connector::And, next)
    }

    /// Run `next` only if the previous command failed.
    pub fn or_else(self, next: ShellCommand) -> Self {
        self.join(Connector::Or, next)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment.connector {
                Some(Connector::And) => out.push_str(" && "),
                Some(Connector::Or) => out.push_str(" || "),
                None => {}
            }
            out.push_str(&segment.tokens.join(" "));
        }
        out
    }

    fn join(mut self, connector: Connector, next: ShellCommand) -> Self {
        let mut segments = next.segments.into_iter();
        if let Some(mut first) = segments.next() {
            first.connector = Some(connector);
            self.segments.push(first);
        }
        self.segments.extend(segments);
        self
    }

    fn last_tokens(&mut self) -> &mut Vec<String> {
        let last = self.segments.len() - 1;
        &mut self.segments[last].tokens
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Fold a working directory and environment into the command line itself,
/// since the remote channel only runs opaque commands.
pub fn with_context(command: &str, workdir: Option<&str>, env: &[(String, String)]) -> String {
    let mut full = String::new();

    if let Some(dir) = workdir {
        full.push_str("cd ");
        full.push_str(&quote(dir));
        full.push_str(" && ");
    }

    let exports: Vec<String> = env
        .iter()
        .filter(|(key, _)| {
            let valid = is_valid_env_name(key);
            if !valid {
                tracing::warn!("Skipping invalid environment variable name: {:?}", key);
            }
            valid
        })
        .map(|(key, value)| format!("{}={}", key, quote(value)))
        .collect();
    if !exports.is_empty() {
        full.push_str("export ");
        full.push_str(&exports.join(" "));
        full.push_str(" && ");
    }

    full.push_str(command);
    full
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_words_untouched() {
        assert_eq!(quote("git"), "git");
        assert_eq!(quote("/workspace/src/main.rs"), "/workspace/src/main.rs");
        assert_eq!(quote("--max-turns=3"), "--max-turns=3");
    }

    #[test]
    fn test_quote_metacharacters() {
        assert_eq!(quote("hello world"), "'hello world'");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
        assert_eq!(quote("a;b|c&d"), "'a;b|c&d'");
        assert_eq!(quote("`id`"), "'`id`'");
    }

    #[test]
    fn test_quote_single_quote_and_empty() {
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_builder_chains_and_or() {
        let cmd = ShellCommand::new("test")
            .args(["-f", ".gitignore"])
            .or_else(
                ShellCommand::new("printf")
                    .arg("%s\\n")
                    .args(["*.log", "node_modules/"])
                    .raw(">")
                    .arg(".gitignore"),
            );
        assert_eq!(
            cmd.render(),
            "test -f .gitignore || printf '%s\\n' '*.log' node_modules/ > .gitignore"
        );
    }

    #[test]
    fn test_builder_keeps_multi_segment_chains() {
        let tail = ShellCommand::new("b").and_then(ShellCommand::new("c"));
        let cmd = ShellCommand::new("a").and_then(tail);
        assert_eq!(cmd.to_string(), "a && b && c");
    }

    #[test]
    fn test_with_context_folds_workdir_and_env() {
        let env = vec![
            ("GH_TOKEN".to_string(), "abc def".to_string()),
            ("bad-name".to_string(), "x".to_string()),
        ];
        let full = with_context("ls", Some("/my work"), &env);
        assert_eq!(full, "cd '/my work' && export GH_TOKEN='abc def' && ls");
    }

    #[test]
    #[cfg(unix)]
    fn test_with_context_bad_workdir_skips_command() {
        let env = vec![("A".to_string(), "1".to_string())];
        let full = with_context("echo ran", Some("/does/not/exist"), &env);
        let output = std::process::Command::new("sh")
            .args(["-c", &full])
            .output()
            .unwrap();
        assert!(!output.status.success());
        assert!(!String::from_utf8_lossy(&output.stdout).contains("ran"));
    }

    #[test]
    fn test_with_context_without_extras_is_identity() {
        assert_eq!(with_context("echo ok", None, &[]), "echo ok");
    }

    #[test]
    fn test_env_name_validation() {
        assert!(is_valid_env_name("ANTHROPIC_API_KEY"));
        assert!(is_valid_env_name("_x1"));
        assert!(!is_valid_env_name("1abc"));
        assert!(!is_valid_env_name(""));
        assert!(!is_valid_env_name("A B"));
    }
}
