//! Dockerfile generation for workspace images.

use std::fmt::Write as _;

use crate::workspace::DEFAULT_BASE_IMAGE;

pub const LANGUAGES: &[&str] = &["python", "nodejs", "go", "rust", "java"];

const CLAUDE_INSTALL: &str = "curl -fsSL https://claude.ai/install.sh | bash";

/// Base image used when a language is requested without an explicit image.
pub fn language_base_image(language: &str) -> Option<&'static str> {
    match language.to_lowercase().as_str() {
        "python" => Some("python:3.12-slim"),
        "nodejs" | "node" => Some("node:20-slim"),
        "go" => Some("golang:1.22"),
        "rust" => Some("rust:latest"),
        "java" => Some("eclipse-temurin:17"),
        _ => None,
    }
}

fn language_section(language: &str, user: &str) -> Option<String> {
    let section = match language {
        "python" => "# Python\n\
             RUN apt-get update && apt-get install -y --no-install-recommends \\\n    \
             python3 python3-pip python3-venv \\\n    \
             && rm -rf /var/lib/apt/lists/*\n"
            .to_string(),
        "nodejs" => "# Node.js\n\
             RUN apt-get update && apt-get install -y --no-install-recommends \\\n    \
             nodejs npm \\\n    \
             && rm -rf /var/lib/apt/lists/*\n"
            .to_string(),
        "go" => "# Go\n\
             RUN apt-get update && apt-get install -y --no-install-recommends \\\n    \
             golang-go \\\n    \
             && rm -rf /var/lib/apt/lists/*\n"
            .to_string(),
        "rust" => format!(
            "# Rust\n\
             RUN apt-get update && apt-get install -y --no-install-recommends \\\n    \
             build-essential \\\n    \
             && rm -rf /var/lib/apt/lists/*\n\
             USER {user}\n\
             RUN curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y\n\
             ENV PATH=\"/home/{user}/.cargo/bin:${{PATH}}\"\n\
             USER root\n"
        ),
        "java" => "# Java\n\
             RUN apt-get update && apt-get install -y --no-install-recommends \\\n    \
             openjdk-17-jdk-headless maven \\\n    \
             && rm -rf /var/lib/apt/lists/*\n"
            .to_string(),
        _ => return None,
    };
    Some(section)
}

/// Shared tail appended to every image: the unprivileged user, its SSH
/// directory and the sshd entrypoint.
fn ssh_setup(user: &str, work_dir: &str, install_claude: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Workspace user");
    let _ = writeln!(
        out,
        "RUN (id -u {user} >/dev/null 2>&1 || useradd -m -s /bin/bash {user}) \\\n    \
         && mkdir -p /home/{user}/.ssh \\\n    \
         && chmod 700 /home/{user}/.ssh \\\n    \
         && chown -R {user}:{user} /home/{user}/.ssh"
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "# sshd");
    let _ = writeln!(
        out,
        "RUN mkdir -p /run/sshd \\\n    \
         && sed -i 's/^#\\?PasswordAuthentication.*/PasswordAuthentication no/' /etc/ssh/sshd_config \\\n    \
         && sed -i 's/^#\\?PubkeyAuthentication.*/PubkeyAuthentication yes/' /etc/ssh/sshd_config"
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "RUN mkdir -p {work_dir} && chown {user}:{user} {work_dir}");

    if install_claude {
        let _ = writeln!(out);
        let _ = writeln!(out, "# Claude Code CLI");
        let _ = writeln!(out, "USER {user}");
        let _ = writeln!(out, "RUN {CLAUDE_INSTALL}");
        let _ = writeln!(out, "ENV PATH=\"/home/{user}/.local/bin:${{PATH}}\"");
        let _ = writeln!(out, "USER root");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "WORKDIR {work_dir}");
    let _ = writeln!(out, "EXPOSE 22");
    let _ = writeln!(out, "CMD [\"/usr/sbin/sshd\", \"-D\", \"-e\"]");
    out
}

#[derive(Debug, Clone)]
pub struct DockerfileTemplate {
    base_image: String,
    user: String,
    work_dir: String,
    languages: Vec<String>,
    packages: Vec<String>,
    commands: Vec<String>,
    install_claude: bool,
}

impl Default for DockerfileTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_IMAGE, "codecell", "/workspace")
    }
}

impl DockerfileTemplate {
    pub fn new(base_image: &str, user: &str, work_dir: &str) -> Self {
        Self {
            base_image: base_image.to_string(),
            user: user.to_string(),
            work_dir: work_dir.to_string(),
            languages: Vec::new(),
            packages: Vec::new(),
            commands: Vec::new(),
            install_claude: false,
        }
    }

    /// Start from the language's own base image when one exists. An explicit
    /// `base_image` keeps the language setup section instead.
    pub fn for_language(language: &str, base_image: Option<&str>) -> Self {
        let defaults = Self::default();
        match (base_image, language_base_image(language)) {
            (Some(image), _) => {
                Self::new(image, &defaults.user, &defaults.work_dir).with_language(language)
            }
            (None, Some(image)) => Self::new(image, &defaults.user, &defaults.work_dir),
            (None, None) => defaults.with_language(language),
        }
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn with_work_dir(mut self, work_dir: &str) -> Self {
        self.work_dir = work_dir.to_string();
        self
    }

    /// Unknown languages are ignored.
    pub fn with_language(mut self, language: &str) -> Self {
        let language = match language.to_lowercase().as_str() {
            "node" => "nodejs".to_string(),
            other => other.to_string(),
        };
        if LANGUAGES.contains(&language.as_str()) && !self.languages.contains(&language) {
            self.languages.push(language);
        }
        self
    }

    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages.extend(packages.into_iter().map(Into::into));
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.commands.push(command.to_string());
        self
    }

    pub fn with_claude(mut self, install: bool) -> Self {
        self.install_claude = install;
        self
    }

    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "FROM {}", self.base_image);
        let _ = writeln!(out);
        let _ = writeln!(out, "ENV DEBIAN_FRONTEND=noninteractive");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "RUN apt-get update && apt-get install -y --no-install-recommends \\\n    \
             openssh-server git curl ca-certificates sudo \\\n    \
             && rm -rf /var/lib/apt/lists/*"
        );

        for language in &self.languages {
            if let Some(section) = language_section(language, &self.user) {
                let _ = writeln!(out);
                out.push_str(&section);
            }
        }

        if !self.packages.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "# Additional packages");
            let _ = writeln!(
                out,
                "RUN apt-get update && apt-get install -y --no-install-recommends \\\n    \
                 {} \\\n    \
                 && rm -rf /var/lib/apt/lists/*",
                self.packages.join(" ")
            );
        }

        if !self.commands.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "# Custom commands");
            for command in &self.commands {
                let _ = writeln!(out, "RUN {command}");
            }
        }

        let _ = writeln!(out);
        out.push_str(&ssh_setup(&self.user, &self.work_dir, self.install_claude));
        out
    }
}

/// Append the user, SSH and work directory requirements to an existing
/// Dockerfile. The base image must provide `apt-get`.
pub fn extend_dockerfile(
    original: &str,
    user: &str,
    work_dir: &str,
    install_claude: bool,
) -> String {
    let mut out = original.trim_end().to_string();
    out.push_str("\n\n# codecell\nUSER root\n");
    out.push_str(
        "RUN apt-get update && apt-get install -y --no-install-recommends \\\n    \
         openssh-server git curl ca-certificates \\\n    \
         && rm -rf /var/lib/apt/lists/*\n\n",
    );
    out.push_str(&ssh_setup(user, work_dir, install_claude));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_has_ssh_and_workdir() {
        let content = DockerfileTemplate::new("ubuntu:24.04", "dev", "/work").render();
        assert!(content.starts_with("FROM ubuntu:24.04\n"));
        assert!(content.contains("openssh-server git"));
        assert!(content.contains("useradd -m -s /bin/bash dev"));
        assert!(content.contains("mkdir -p /home/dev/.ssh"));
        assert!(content.contains("chown dev:dev /work"));
        assert!(content.contains("WORKDIR /work"));
        assert!(content.contains("EXPOSE 22"));
        assert!(content.contains("\"/usr/sbin/sshd\", \"-D\""));
        assert!(!content.contains("Claude Code CLI"));
    }

    #[test]
    fn test_language_sections() {
        let content = DockerfileTemplate::default()
            .with_language("Python")
            .with_language("python")
            .with_language("cobol")
            .render();
        assert_eq!(content.matches("# Python").count(), 1);
        assert!(content.contains("python3-pip"));

        let content = DockerfileTemplate::default().with_language("rust").render();
        assert!(content.contains("sh.rustup.rs"));
        assert!(content.contains("/home/codecell/.cargo/bin"));
    }

    #[test]
    fn test_packages_commands_and_claude() {
        let content = DockerfileTemplate::default()
            .with_packages(["jq", "ripgrep"])
            .with_command("echo hi > /etc/motd")
            .with_claude(true)
            .render();
        assert!(content.contains("jq ripgrep"));
        assert!(content.contains("RUN echo hi > /etc/motd"));
        assert!(content.contains("# Claude Code CLI"));
        assert!(content.contains("claude.ai/install.sh"));
    }

    #[test]
    fn test_for_language_picks_base_image() {
        let t = DockerfileTemplate::for_language("python", None);
        assert_eq!(t.base_image(), "python:3.12-slim");
        assert!(!t.render().contains("# Python"));

        assert_eq!(DockerfileTemplate::for_language("go", None).base_image(), "golang:1.22");
        assert_eq!(
            DockerfileTemplate::for_language("java", None).base_image(),
            "eclipse-temurin:17"
        );

        let t = DockerfileTemplate::for_language("python", Some("debian:12"));
        assert_eq!(t.base_image(), "debian:12");
        assert!(t.render().contains("# Python"));

        let t = DockerfileTemplate::for_language("haskell", None);
        assert_eq!(t.base_image(), DEFAULT_BASE_IMAGE);
    }

    #[test]
    fn test_extend_dockerfile() {
        let original = "FROM node:20\nRUN npm i -g pnpm\n\n\n";
        let extended = extend_dockerfile(original, "dev", "/src", false);
        assert!(extended.starts_with("FROM node:20\nRUN npm i -g pnpm\n\n# codecell"));
        assert!(extended.contains("openssh-server"));
        assert!(extended.contains("WORKDIR /src"));
        assert!(extended.contains("useradd -m -s /bin/bash dev"));
        assert!(extended.trim_end().ends_with("CMD [\"/usr/sbin/sshd\", \"-D\", \"-e\"]"));
    }
}
