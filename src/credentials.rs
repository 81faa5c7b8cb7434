//! Host credentials forwarded to agent CLIs inside the container.

use std::process::Command;
use std::time::Duration;

use crate::process::run_with_timeout;

/// Checked in order; only the first one set is forwarded.
pub const GITHUB_TOKEN_VARS: &[&str] = &["COPILOT_GITHUB_TOKEN", "GH_TOKEN", "GITHUB_TOKEN"];
pub const PASSTHROUGH_VARS: &[&str] = &["ANTHROPIC_API_KEY"];

const GH_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// The first GitHub token in the environment, else `gh auth token` as
/// `GH_TOKEN`. Empty when neither is available.
pub fn github_token_environment() -> Vec<(String, String)> {
    if let Some(pair) = GITHUB_TOKEN_VARS
        .iter()
        .find_map(|name| non_empty_var(name).map(|v| (name.to_string(), v)))
    {
        return vec![pair];
    }

    let mut cmd = Command::new("gh");
    cmd.args(["auth", "token"]);
    let output = run_with_timeout(cmd, Some(GH_AUTH_TIMEOUT));
    let token = output.stdout.trim();
    if output.success() && !token.is_empty() {
        vec![("GH_TOKEN".to_string(), token.to_string())]
    } else {
        Vec::new()
    }
}

/// Everything passed into a new container at create time.
pub fn auth_environment() -> Vec<(String, String)> {
    let mut env = github_token_environment();
    env.extend(
        PASSTHROUGH_VARS
            .iter()
            .filter_map(|name| non_empty_var(name).map(|v| (name.to_string(), v))),
    );
    env
}
