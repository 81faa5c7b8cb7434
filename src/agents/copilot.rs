use std::collections::BTreeMap;

use serde_json::json;

use super::{AgentDef, AgentKind, AgentOptions, CodeAgent};
use crate::credentials::github_token_environment;
use crate::shell::ShellCommand;

/// GitHub Copilot CLI (`@github/copilot`) in prompt mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopilotAgent;

impl CopilotAgent {
    fn allow_all_tools(options: &AgentOptions) -> bool {
        options.allow_all_tools.unwrap_or(true)
    }
}

impl CodeAgent for CopilotAgent {
    fn def(&self) -> &'static AgentDef {
        AgentKind::Copilot.def()
    }

    fn build_command(&self, prompt: &str, options: &AgentOptions) -> ShellCommand {
        let mut cmd = ShellCommand::new(self.def().binary);
        if Self::allow_all_tools(options) {
            cmd = cmd.arg("--allow-all-tools");
        }
        if let Some(model) = &options.model {
            cmd = cmd.args(["--model", model]);
        }
        cmd.arg("-p").arg(prompt)
    }

    fn environment(&self, options: &AgentOptions) -> Vec<(String, String)> {
        if options.env.is_empty() {
            github_token_environment()
        } else {
            options.env.clone()
        }
    }

    fn metadata(&self, options: &AgentOptions) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            ("model".to_string(), json!(options.model)),
            (
                "allow_all_tools".to_string(),
                json!(Self::allow_all_tools(options)),
            ),
        ])
    }
}
