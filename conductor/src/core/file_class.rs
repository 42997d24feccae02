//! Deterministic classification of edit targets.
//!
//! Configuration and documentation files (structured data, markdown,
//! environment/ignore files, plan scratch space) never carry the risk the
//! plan gate protects against, so edits to them are always allowed.

use std::path::{Component, Path};

use glob::Pattern;
use serde::{Deserialize, Serialize};

/// Allowlist of configuration/documentation paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAllowlist {
    /// Extensions without the leading dot, compared case-insensitively.
    pub extensions: Vec<String>,
    /// Exact file names (e.g. `.gitignore`).
    pub file_names: Vec<String>,
    /// Any path containing one of these directory components is plan scratch space.
    pub dir_components: Vec<String>,
}

impl Default for FileAllowlist {
    fn default() -> Self {
        Self {
            extensions: to_strings(&[
                "json", "jsonc", "yaml", "yml", "toml", "ini", "cfg", "md", "markdown", "mdx",
                "txt",
            ]),
            file_names: to_strings(&[
                ".env",
                ".gitignore",
                ".gitattributes",
                ".dockerignore",
                ".editorconfig",
            ]),
            dir_components: to_strings(&["thoughts", "plans", ".plans"]),
        }
    }
}

impl FileAllowlist {
    /// True if `path` is a configuration/documentation file.
    pub fn allows(&self, path: &str) -> bool {
        let normalized = normalize(path);
        let path = Path::new(&normalized);
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };

        if self.file_names.iter().any(|allowed| allowed == name) || is_env_or_ignore(name) {
            return true;
        }

        let extension_allowed = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            });
        if extension_allowed {
            return true;
        }

        path.parent().is_some_and(|parent| {
            parent.components().any(|component| match component {
                Component::Normal(part) => self
                    .dir_components
                    .iter()
                    .any(|allowed| part.to_str() == Some(allowed.as_str())),
                _ => false,
            })
        })
    }
}

/// True if `path` falls inside the approved plan scope.
///
/// An empty scope covers every path. Invalid glob patterns match nothing.
pub fn in_scope(scope: &[String], path: &str) -> bool {
    if scope.is_empty() {
        return true;
    }
    let normalized = normalize(path);
    scope
        .iter()
        .filter_map(|pattern| Pattern::new(pattern).ok())
        .any(|pattern| pattern.matches(&normalized))
}

fn is_env_or_ignore(name: &str) -> bool {
    name == ".env"
        || name.starts_with(".env.")
        || (name.starts_with('.') && name.len() > "ignore".len() + 1 && name.ends_with("ignore"))
}

fn normalize(path: &str) -> String {
    let forward = path.trim().replace('\\', "/");
    if let Some(rest) = forward.strip_prefix("./") {
        return rest.to_string();
    }
    forward
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_and_structured_data_are_allowed() {
        let allowlist = FileAllowlist::default();
        assert!(allowlist.allows("README.md"));
        assert!(allowlist.allows("docs/Guide.MD"));
        assert!(allowlist.allows("config/settings.yaml"));
        assert!(allowlist.allows("./Cargo.toml"));
    }

    #[test]
    fn env_and_ignore_files_are_allowed() {
        let allowlist = FileAllowlist::default();
        assert!(allowlist.allows(".env"));
        assert!(allowlist.allows("app/.env.local"));
        assert!(allowlist.allows(".prettierignore"));
        assert!(allowlist.allows("web/.gitignore"));
    }

    #[test]
    fn plan_scratch_directories_are_allowed() {
        let allowlist = FileAllowlist::default();
        assert!(allowlist.allows("thoughts/shared/plans/draft.py"));
        assert!(allowlist.allows("plans/sketch.rs"));
    }

    #[test]
    fn source_files_are_not_allowed() {
        let allowlist = FileAllowlist::default();
        assert!(!allowlist.allows("src/lib.rs"));
        assert!(!allowlist.allows("app/main.py"));
        assert!(!allowlist.allows("Makefile"));
        assert!(!allowlist.allows("src/ignore"));
        assert!(!allowlist.allows("src/thoughts.rs"));
    }

    #[test]
    fn windows_separators_are_normalized() {
        let allowlist = FileAllowlist::default();
        assert!(allowlist.allows(r"thoughts\notes\todo.rs"));
    }

    #[test]
    fn empty_scope_covers_everything() {
        assert!(in_scope(&[], "src/lib.rs"));
    }

    #[test]
    fn scope_globs_limit_coverage() {
        let scope = vec!["src/**/*.rs".to_string()];
        assert!(in_scope(&scope, "./src/core/mod.rs"));
        assert!(!in_scope(&scope, "tests/it.rs"));
    }

    #[test]
    fn invalid_scope_pattern_matches_nothing() {
        let scope = vec!["src/[".to_string()];
        assert!(!in_scope(&scope, "src/lib.rs"));
    }
}
