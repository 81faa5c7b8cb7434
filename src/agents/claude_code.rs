use std::collections::BTreeMap;

use serde_json::json;

use super::{AgentDef, AgentKind, AgentOptions, CodeAgent, PermissionMode};
use crate::shell::ShellCommand;

const ACCEPT_EDITS_TOOLS: &str = "Edit,Write,NotebookEdit";

/// Anthropic's `claude` CLI in non-interactive print mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeCodeAgent;

impl CodeAgent for ClaudeCodeAgent {
    fn def(&self) -> &'static AgentDef {
        AgentKind::ClaudeCode.def()
    }

    fn build_command(&self, prompt: &str, options: &AgentOptions) -> ShellCommand {
        let mut cmd = ShellCommand::new(self.def().binary);

        if let Some(format) = &options.output_format {
            cmd = cmd.args(["--output-format", format]);
        }
        if let Some(turns) = options.max_turns {
            cmd = cmd.arg("--max-turns").arg(turns.to_string());
        }
        if let Some(model) = &options.model {
            cmd = cmd.args(["--model", model]);
        }
        match options.permission_mode {
            Some(PermissionMode::AcceptEdits) => {
                cmd = cmd.args(["--allowedTools", ACCEPT_EDITS_TOOLS]);
            }
            Some(PermissionMode::BypassPermissions) => {
                cmd = cmd.arg("--dangerously-skip-permissions");
            }
            Some(PermissionMode::Default) | None => {}
        }
        if options.print.unwrap_or(true) {
            cmd = cmd.arg("--print");
        }

        cmd.arg(prompt)
    }

    fn metadata(&self, options: &AgentOptions) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            ("model".to_string(), json!(options.model)),
            ("output_format".to_string(), json!(options.output_format)),
        ])
    }
}
