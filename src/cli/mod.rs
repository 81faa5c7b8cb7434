//! CLI command implementations

pub mod cleanup;
pub mod definition;
pub mod list;
pub mod templates;
pub mod workspace;

pub use definition::{Cli, Commands};

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max <= 3 {
        s.chars().take(max).collect()
    } else {
        let kept: String = s.chars().take(max - 3).collect();
        format!("{}...", kept)
    }
}

/// Keep the end of a path, which is the part that tells targets apart.
pub fn truncate_path(path: &str, max: usize) -> String {
    let count = path.chars().count();
    if count <= max {
        path.to_string()
    } else if max <= 3 {
        path.chars().skip(count - max).collect()
    } else {
        let kept: String = path.chars().skip(count - (max - 3)).collect();
        format!("...{}", kept)
    }
}
