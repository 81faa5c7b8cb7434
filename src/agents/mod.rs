//! Agent registry and the common execution contract.
//!
//! Agents are CLIs run inside the container over a `Transport`. Adding a new
//! agent means adding an `AgentKind` variant, one `AgentDef` entry to
//! `AGENTS` and an adapter implementing `CodeAgent`.

pub mod claude_code;
pub mod copilot;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use claude_code::ClaudeCodeAgent;
pub use copilot::CopilotAgent;

use crate::process::ExecOutput;
use crate::shell::ShellCommand;
use crate::ssh::Transport;

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    ClaudeCode,
    Copilot,
}

/// Everything we know about a single agent CLI.
pub struct AgentDef {
    pub kind: AgentKind,
    /// Name reported in results.
    pub name: &'static str,
    pub binary: &'static str,
    /// Accepted spellings when parsing an `AgentKind`.
    pub aliases: &'static [&'static str],
}

pub const AGENTS: &[AgentDef] = &[
    AgentDef {
        kind: AgentKind::ClaudeCode,
        name: "claude-code",
        binary: "claude",
        aliases: &["claudecode", "claude", "claude-code"],
    },
    AgentDef {
        kind: AgentKind::Copilot,
        name: "github-copilot-cli",
        binary: "copilot",
        aliases: &["copilot", "github-copilot"],
    },
];

impl AgentKind {
    pub fn def(self) -> &'static AgentDef {
        // AGENTS has one entry per variant.
        match self {
            AgentKind::ClaudeCode => &AGENTS[0],
            AgentKind::Copilot => &AGENTS[1],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown agent type: {0} (expected one of: {list})", list = agent_aliases().join(", "))]
pub struct UnknownAgent(pub String);

impl FromStr for AgentKind {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        AGENTS
            .iter()
            .find(|a| a.aliases.contains(&lower.as_str()))
            .map(|a| a.kind)
            .ok_or_else(|| UnknownAgent(s.to_string()))
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.def().name)
    }
}

/// All accepted agent spellings in registry order.
pub fn agent_aliases() -> Vec<&'static str> {
    AGENTS.iter().flat_map(|a| a.aliases.iter().copied()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    BypassPermissions,
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(PermissionMode::Default),
            "acceptEdits" => Ok(PermissionMode::AcceptEdits),
            "bypassPermissions" => Ok(PermissionMode::BypassPermissions),
            other => Err(format!("Unknown permission mode: {}", other)),
        }
    }
}

/// Options understood by the agents. Each adapter ignores what it doesn't use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOptions {
    pub model: Option<String>,
    pub output_format: Option<String>,
    pub max_turns: Option<u32>,
    pub permission_mode: Option<PermissionMode>,
    /// Non-interactive print mode; on unless set to false.
    pub print: Option<bool>,
    /// Copilot auto-approval; on unless set to false.
    pub allow_all_tools: Option<bool>,
    /// Extra environment. Copilot falls back to host GitHub credentials when empty.
    pub env: Vec<(String, String)>,
    #[serde(with = "optional_secs")]
    pub timeout: Option<Duration>,
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_secs()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub files_modified: Vec<String>,
    pub files_created: Vec<String>,
    pub files_deleted: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Contract every agent adapter satisfies.
pub trait CodeAgent {
    fn def(&self) -> &'static AgentDef;

    fn name(&self) -> &'static str {
        self.def().name
    }

    fn is_installed(&self, transport: &dyn Transport) -> bool {
        let which = ShellCommand::new("which").arg(self.def().binary);
        transport
            .execute(&which.render(), None, &[], None)
            .success()
    }

    /// The agent invocation for `prompt`.
    fn build_command(&self, prompt: &str, options: &AgentOptions) -> ShellCommand;

    fn environment(&self, options: &AgentOptions) -> Vec<(String, String)> {
        options.env.clone()
    }

    fn metadata(&self, options: &AgentOptions) -> BTreeMap<String, serde_json::Value>;

    fn execute(
        &self,
        transport: &dyn Transport,
        prompt: &str,
        workdir: Option<&str>,
        context_files: &[String],
        options: &AgentOptions,
    ) -> AgentResult {
        let marker = format!("/tmp/codecell-marker-{}", uuid::Uuid::new_v4().simple());
        let touched = transport
            .execute(&ShellCommand::new("touch").arg(&marker).render(), workdir, &[], None)
            .success();

        let full_prompt = with_context_files(transport, prompt, workdir, context_files);
        let command = self.build_command(&full_prompt, options);
        tracing::info!("Running {} in {}", self.name(), workdir.unwrap_or("~"));
        tracing::debug!("{}", command);

        let output = transport.execute(
            &command.render(),
            workdir,
            &self.environment(options),
            Some(options.timeout.unwrap_or(DEFAULT_AGENT_TIMEOUT)),
        );

        let files_modified = match (touched, workdir) {
            (true, Some(dir)) => modified_since(transport, dir, &marker),
            _ => Vec::new(),
        };
        if touched {
            let _ = transport.execute(
                &ShellCommand::new("rm").args(["-f", &marker]).render(),
                None,
                &[],
                None,
            );
        }

        let mut metadata = self.metadata(options);
        metadata.insert("prompt".to_string(), prompt.into());
        build_result(output, files_modified, metadata)
    }
}

/// Closed set of adapters, dispatched by kind.
#[derive(Debug, Clone)]
pub enum Agent {
    ClaudeCode(ClaudeCodeAgent),
    Copilot(CopilotAgent),
}

impl Agent {
    pub fn new(kind: AgentKind) -> Self {
        match kind {
            AgentKind::ClaudeCode => Agent::ClaudeCode(ClaudeCodeAgent),
            AgentKind::Copilot => Agent::Copilot(CopilotAgent),
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.def().kind
    }

    fn inner(&self) -> &dyn CodeAgent {
        match self {
            Agent::ClaudeCode(agent) => agent,
            Agent::Copilot(agent) => agent,
        }
    }
}

impl CodeAgent for Agent {
    fn def(&self) -> &'static AgentDef {
        self.inner().def()
    }

    fn build_command(&self, prompt: &str, options: &AgentOptions) -> ShellCommand {
        self.inner().build_command(prompt, options)
    }

    fn environment(&self, options: &AgentOptions) -> Vec<(String, String)> {
        self.inner().environment(options)
    }

    fn metadata(&self, options: &AgentOptions) -> BTreeMap<String, serde_json::Value> {
        self.inner().metadata(options)
    }
}

/// Prepend the contents of `files` (read inside the container) to `prompt`.
/// Unreadable files are skipped with a warning.
fn with_context_files(
    transport: &dyn Transport,
    prompt: &str,
    workdir: Option<&str>,
    files: &[String],
) -> String {
    if files.is_empty() {
        return prompt.to_string();
    }

    let mut context = String::from("Context from files:\n");
    for file in files {
        let output = transport.execute(&ShellCommand::new("cat").arg(file).render(), workdir, &[], None);
        if !output.success() {
            tracing::warn!("Skipping unreadable context file {}", file);
            continue;
        }
        context.push_str(&format!("--- {} ---\n{}\n", file, output.stdout.trim_end()));
    }
    format!("{}\nTask: {}", context, prompt)
}

fn modified_since(transport: &dyn Transport, dir: &str, marker: &str) -> Vec<String> {
    let find = ShellCommand::new("find")
        .args([dir, "-type", "f", "-newer", marker, "-not", "-path", "*/.git/*"])
        .raw("2>/dev/null");
    let output = transport.execute(&find.render(), Some(dir), &[], None);
    output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_result(
    output: ExecOutput,
    files_modified: Vec<String>,
    metadata: BTreeMap<String, serde_json::Value>,
) -> AgentResult {
    AgentResult {
        success: output.success(),
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
        files_modified,
        files_created: Vec::new(),
        files_deleted: Vec::new(),
        metadata,
    }
}

#[cfg(test)]
pub(crate) mod test_transport {
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::process::ExecOutput;
    use crate::ssh::Transport;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Call {
        pub command: String,
        pub workdir: Option<String>,
        pub env: Vec<(String, String)>,
        pub timeout: Option<Duration>,
    }

    /// Replies by substring match and records every call.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub replies: Vec<(&'static str, ExecOutput)>,
        pub calls: Mutex<Vec<Call>>,
    }

    impl RecordingTransport {
        pub fn with_replies(replies: Vec<(&'static str, ExecOutput)>) -> Self {
            Self {
                replies,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn find(&self, needle: &str) -> Option<Call> {
            self.calls().into_iter().find(|c| c.command.contains(needle))
        }
    }

    impl Transport for RecordingTransport {
        fn execute(
            &self,
            command: &str,
            workdir: Option<&str>,
            env: &[(String, String)],
            timeout: Option<Duration>,
        ) -> ExecOutput {
            self.calls.lock().unwrap().push(Call {
                command: command.to_string(),
                workdir: workdir.map(str::to_string),
                env: env.to_vec(),
                timeout,
            });
            self.replies
                .iter()
                .find(|(needle, _)| command.contains(needle))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_else(|| ExecOutput::ok(""))
        }

        fn copy_to(&self, _local: &Path, _remote: &str, _recursive: bool) -> bool {
            true
        }

        fn copy_from(&self, _remote: &str, _local: &Path, _recursive: bool) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_transport::RecordingTransport;
    use super::*;

    #[test]
    fn test_parse_agent_kind() {
        assert_eq!("claudecode".parse::<AgentKind>().unwrap(), AgentKind::ClaudeCode);
        assert_eq!("Claude".parse::<AgentKind>().unwrap(), AgentKind::ClaudeCode);
        assert_eq!("claude-code".parse::<AgentKind>().unwrap(), AgentKind::ClaudeCode);
        assert_eq!("copilot".parse::<AgentKind>().unwrap(), AgentKind::Copilot);
        assert_eq!("github-copilot".parse::<AgentKind>().unwrap(), AgentKind::Copilot);

        let err = "cursor".parse::<AgentKind>().unwrap_err();
        assert_eq!(err, UnknownAgent("cursor".to_string()));
        let message = err.to_string();
        assert!(message.starts_with("Unknown agent type: cursor (expected one of: "));
        assert!(message.contains("claudecode"));
        assert!(message.ends_with("github-copilot)"));
    }

    #[test]
    fn test_registry_matches_kinds() {
        for def in AGENTS {
            assert_eq!(def.kind.def().name, def.name);
            assert_eq!(Agent::new(def.kind).kind(), def.kind);
        }
    }

    #[test]
    fn test_is_installed_uses_which() {
        let transport = RecordingTransport::with_replies(vec![("which copilot", ExecOutput::new(1, "", ""))]);
        assert!(!Agent::new(AgentKind::Copilot).is_installed(&transport));
        assert!(Agent::new(AgentKind::ClaudeCode).is_installed(&transport));
    }

    #[test]
    fn test_execute_tracks_modified_files() {
        let transport = RecordingTransport::with_replies(vec![
            ("find ", ExecOutput::ok("/workspace/a.py\n/workspace/sub/b.py\n")),
            ("claude ", ExecOutput::ok("done")),
        ]);
        let result = Agent::new(AgentKind::ClaudeCode).execute(
            &transport,
            "write code",
            Some("/workspace"),
            &[],
            &AgentOptions::default(),
        );

        assert!(result.success);
        assert_eq!(result.stdout, "done");
        assert_eq!(result.files_modified, vec!["/workspace/a.py", "/workspace/sub/b.py"]);
        assert_eq!(result.metadata["prompt"], "write code");

        let calls = transport.calls();
        assert!(calls[0].command.starts_with("touch /tmp/codecell-marker-"));
        let find = transport.find("find ").unwrap();
        assert!(find.command.contains("-not -path '*/.git/*'"));
        assert!(transport.find("rm -f /tmp/codecell-marker-").is_some());

        let run = transport.find("claude ").unwrap();
        assert_eq!(run.timeout, Some(DEFAULT_AGENT_TIMEOUT));
        assert_eq!(run.workdir.as_deref(), Some("/workspace"));
    }

    #[test]
    fn test_execute_embeds_context_files() {
        let transport = RecordingTransport::with_replies(vec![
            ("cat notes.md", ExecOutput::ok("# Notes\n")),
            ("cat missing.md", ExecOutput::new(1, "", "No such file")),
        ]);
        Agent::new(AgentKind::ClaudeCode).execute(
            &transport,
            "implement it",
            Some("/workspace"),
            &["notes.md".to_string(), "missing.md".to_string()],
            &AgentOptions::default(),
        );

        let run = transport.find("--print").unwrap();
        assert!(run.command.contains("--- notes.md ---"));
        assert!(run.command.contains("# Notes"));
        assert!(!run.command.contains("missing.md"));
        assert!(run.command.contains("Task: implement it"));
    }

    #[test]
    fn test_failed_run_is_a_value() {
        let transport = RecordingTransport::with_replies(vec![(
            "copilot ",
            ExecOutput::new(2, "", "auth required"),
        )]);
        let options = AgentOptions {
            env: vec![("GH_TOKEN".to_string(), "x".to_string())],
            ..AgentOptions::default()
        };
        let result =
            Agent::new(AgentKind::Copilot).execute(&transport, "hi", None, &[], &options);
        assert!(!result.success);
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.stderr, "auth required");
        assert!(result.files_modified.is_empty());
    }

    #[test]
    fn test_permission_mode_parse() {
        assert_eq!(
            "acceptEdits".parse::<PermissionMode>(),
            Ok(PermissionMode::AcceptEdits)
        );
        assert_eq!(
            "bypassPermissions".parse::<PermissionMode>(),
            Ok(PermissionMode::BypassPermissions)
        );
        assert!("yolo".parse::<PermissionMode>().is_err());
    }
}
