//! Prompt templates for the vision oracle and the planner.
//!
//! Built-in templates are compiled into the binary. A configured override
//! directory may replace any of them with `<name>.md`; overrides are read once
//! at construction so a bad file fails before a task starts.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use minijinja::Environment;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::PromptError;

/// Default perceive-and-reason prompt; rendered with `instruction`.
pub const SYSTEM: &str = "system";
/// Search verification; rendered with `name`.
pub const VERIFY_SEARCH: &str = "verify_search";
pub const VERIFY_SENT: &str = "verify_sent";
pub const ANALYZE_FEED: &str = "analyze_feed";
pub const FIND_UNREAD: &str = "find_unread";
pub const EXTRACT_CHAT: &str = "extract_chat";
pub const PLANNING: &str = "planning";

const BUILTIN: &[(&str, &str)] = &[
    (SYSTEM, include_str!("prompts/system.md")),
    (VERIFY_SEARCH, include_str!("prompts/verify_search.md")),
    (VERIFY_SENT, include_str!("prompts/verify_sent.md")),
    (ANALYZE_FEED, include_str!("prompts/analyze_feed.md")),
    (FIND_UNREAD, include_str!("prompts/find_unread.md")),
    (EXTRACT_CHAT, include_str!("prompts/extract_chat.md")),
    (PLANNING, include_str!("prompts/planning.md")),
];

/// Template engine wrapper around minijinja.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    env: Environment<'static>,
    overrides: HashMap<String, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    pub fn builtin() -> Self {
        let mut env = Environment::new();
        for &(name, source) in BUILTIN {
            env.add_template(name, source)
                .expect("built-in prompt template should be valid");
        }
        Self {
            env,
            overrides: HashMap::new(),
        }
    }

    /// Built-ins plus any `<name>.md` found in `dir`.
    pub fn with_overrides(dir: &Path) -> Result<Self, PromptError> {
        let mut library = Self::builtin();
        for &(name, _) in BUILTIN {
            let path = dir.join(format!("{name}.md"));
            if !path.exists() {
                continue;
            }
            let source = fs::read_to_string(&path).map_err(|err| PromptError::Override {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
            // Compile once so syntax errors surface at startup.
            library
                .env
                .template_from_str(&source)
                .map_err(|err| PromptError::Override {
                    path: path.display().to_string(),
                    message: err.to_string(),
                })?;
            info!(prompt = name, path = %path.display(), "using prompt override");
            library.overrides.insert(name.to_string(), source);
        }
        Ok(library)
    }

    /// Render template `name` with `ctx`.
    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String, PromptError> {
        let render_err = |err: minijinja::Error| PromptError::Render {
            name: name.to_string(),
            message: err.to_string(),
        };
        let rendered = if let Some(source) = self.overrides.get(name) {
            self.env.render_str(source, ctx).map_err(render_err)?
        } else {
            let template = self
                .env
                .get_template(name)
                .map_err(|_| PromptError::Unknown(name.to_string()))?;
            template.render(ctx).map_err(render_err)?
        };
        debug!(prompt = name, bytes = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn renders_builtin_with_variables() {
        let prompts = PromptLibrary::builtin();
        let out = prompts
            .render(VERIFY_SEARCH, context! { name => "Zhang San" })
            .expect("render");
        assert!(out.contains("\"Zhang San\""));
    }

    #[test]
    fn system_prompt_lists_suggestion_contract() {
        let out = PromptLibrary::builtin()
            .render(SYSTEM, context! { instruction => "open contacts" })
            .expect("render");
        assert!(out.contains("open contacts"));
        assert!(out.contains("action_suggestion"));
        assert!(out.contains("\"END\""));
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = PromptLibrary::builtin()
            .render("nope", context! {})
            .unwrap_err();
        assert!(matches!(err, PromptError::Unknown(_)));
    }

    #[test]
    fn override_directory_replaces_builtin() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("verify_sent.md"), "custom {{ extra }}").expect("write");
        let prompts = PromptLibrary::with_overrides(temp.path()).expect("load");
        assert_eq!(
            prompts
                .render(VERIFY_SENT, context! { extra => "check" })
                .expect("render"),
            "custom check"
        );
        // Untouched templates keep the built-in text.
        assert!(
            prompts
                .render(FIND_UNREAD, context! {})
                .expect("render")
                .contains("unreadChats")
        );
    }

    #[test]
    fn broken_override_fails_at_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("system.md"), "{% if %}").expect("write");
        let err = PromptLibrary::with_overrides(temp.path()).unwrap_err();
        assert!(matches!(err, PromptError::Override { .. }));
    }
}
