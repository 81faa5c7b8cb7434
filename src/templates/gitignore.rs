//! `.gitignore` generation.

const COMMON: &[&str] = &[
    "# OS files",
    ".DS_Store",
    "Thumbs.db",
    "*.swp",
    "*.swo",
    "*~",
    "",
    "# IDE",
    ".idea/",
    ".vscode/",
    "*.sublime-project",
    "*.sublime-workspace",
    "",
    "# Environment",
    ".env",
    ".env.local",
    ".env.*.local",
    "*.env",
];

fn language_patterns(language: &str) -> Option<&'static [&'static str]> {
    let patterns: &'static [&'static str] = match language {
        "python" => &[
            "# Python",
            "__pycache__/",
            "*.py[cod]",
            "*$py.class",
            "*.so",
            "build/",
            "dist/",
            "*.egg-info/",
            ".eggs/",
            "",
            "# Virtual environments",
            ".venv/",
            "venv/",
            "env/",
            "",
            "# Tooling",
            ".pytest_cache/",
            ".coverage",
            "htmlcov/",
            ".mypy_cache/",
            ".ipynb_checkpoints/",
        ],
        "nodejs" => &[
            "# Node.js",
            "node_modules/",
            "npm-debug.log*",
            "yarn-debug.log*",
            "yarn-error.log*",
            ".npm",
            "",
            "# Build",
            "dist/",
            "build/",
            ".next/",
            "out/",
            "coverage/",
        ],
        "go" => &[
            "# Go",
            "*.exe",
            "*.dll",
            "*.so",
            "*.dylib",
            "*.test",
            "*.out",
            "go.work",
            "vendor/",
        ],
        "rust" => &["# Rust", "/target/", "**/*.rs.bk"],
        "java" => &[
            "# Java",
            "*.class",
            "*.jar",
            "*.war",
            "*.log",
            "target/",
            ".gradle/",
            "build/",
            "!gradle-wrapper.jar",
        ],
        _ => return None,
    };
    Some(patterns)
}

#[derive(Debug, Clone, Default)]
pub struct GitignoreTemplate {
    languages: Vec<String>,
    patterns: Vec<String>,
}

impl GitignoreTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_language(language: &str) -> Self {
        Self::new().with_language(language)
    }

    pub fn with_language(mut self, language: &str) -> Self {
        let language = match language.to_lowercase().as_str() {
            "node" => "nodejs".to_string(),
            other => other.to_string(),
        };
        if language_patterns(&language).is_some() && !self.languages.contains(&language) {
            self.languages.push(language);
        }
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.patterns.push(pattern.to_string());
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn render(&self) -> String {
        let mut lines: Vec<&str> = COMMON.to_vec();
        for language in &self.languages {
            if let Some(patterns) = language_patterns(language) {
                lines.push("");
                lines.extend_from_slice(patterns);
            }
        }
        if !self.patterns.is_empty() {
            lines.push("");
            lines.push("# Custom patterns");
            lines.extend(self.patterns.iter().map(String::as_str));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}
