//! Dockerfile and `.gitignore` templates for new workspaces.

mod dockerfile;
mod gitignore;

use std::fs;
use std::path::{Path, PathBuf};

pub use dockerfile::{extend_dockerfile, language_base_image, DockerfileTemplate, LANGUAGES};
pub use gitignore::GitignoreTemplate;

/// Write a `Dockerfile` and `.gitignore` into `dir`, leaving existing files
/// alone. Returns the paths that were written.
pub fn generate_templates(dir: &Path, language: Option<&str>) -> std::io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let dockerfile = dir.join("Dockerfile");
    if !dockerfile.exists() {
        let template = match language {
            Some(lang) => DockerfileTemplate::for_language(lang, None),
            None => DockerfileTemplate::default(),
        };
        fs::write(&dockerfile, template.render())?;
        written.push(dockerfile);
    }

    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        let template = match language {
            Some(lang) => GitignoreTemplate::for_language(lang),
            None => GitignoreTemplate::new(),
        };
        fs::write(&gitignore, template.render())?;
        written.push(gitignore);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_templates_writes_both() {
        let tmp = TempDir::new().unwrap();
        let written = generate_templates(tmp.path(), Some("python")).unwrap();
        assert_eq!(written.len(), 2);

        let dockerfile = fs::read_to_string(tmp.path().join("Dockerfile")).unwrap();
        assert!(dockerfile.starts_with("FROM python:3.12-slim"));
        let gitignore = fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        assert!(gitignore.contains("__pycache__/"));
    }

    #[test]
    fn test_generate_templates_keeps_existing_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let written = generate_templates(tmp.path(), None).unwrap();
        assert_eq!(written, vec![tmp.path().join(".gitignore")]);
        assert_eq!(
            fs::read_to_string(tmp.path().join("Dockerfile")).unwrap(),
            "FROM scratch\n"
        );
    }
}
