//! System prompt assembly.
//!
//! The system prompt is computed once at bootstrap from files in the
//! workspace and is never persisted into a session log:
//!
//! 1. **Built-in prompts**: `prompts/AGENTS.md`, `prompts/IDENTITY.md`, `prompts/TOOLS.md`
//! 2. **Long-term memory**: `memory/LONG-TERM.md`
//! 3. **Short-term memory**: `memory/<YYYY-MM-DD>/MEMORY.md` for today and the two days before
//!
//! Each file is optional. Missing files are skipped; if nothing at all is
//! found a fallback prompt is used. Sections are joined with a horizontal
//! rule, then `{{workspace}}`, `{{cwd}}`, `{{now}}`, `{{runtime}}` and
//! `{{skills}}` placeholders are rendered.

use chrono::{Duration, Local};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Built-in prompt files, relative to the workspace.
pub const PROMPT_FILES: [&str; 3] = ["prompts/AGENTS.md", "prompts/IDENTITY.md", "prompts/TOOLS.md"];

pub const LONG_TERM_MEMORY_FILE: &str = "memory/LONG-TERM.md";

const SHORT_TERM_MEMORY_DAYS: i64 = 3;

const SEPARATOR: &str = "\n\n---\n\n";

/// The assembled system prompt and where it came from.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    pub text: String,

    /// Which files were loaded (for diagnostics)
    pub loaded_files: Vec<PathBuf>,
}

impl SystemPrompt {
    /// Load and render the system prompt for `workspace`.
    ///
    /// `skills` is the already formatted skills listing substituted for
    /// `{{skills}}`.
    pub fn load(workspace: &Path, skills: &str) -> Self {
        let mut sections: Vec<String> = Vec::new();
        let mut loaded_files: Vec<PathBuf> = Vec::new();

        for rel in PROMPT_FILES {
            try_load(&workspace.join(rel), &mut sections, &mut loaded_files);
        }

        try_load(&workspace.join(LONG_TERM_MEMORY_FILE), &mut sections, &mut loaded_files);

        let today = Local::now().date_naive();
        let mut short_term = String::new();
        for days_back in 0..SHORT_TERM_MEMORY_DAYS {
            let day = today - Duration::days(days_back);
            let path = workspace
                .join("memory")
                .join(day.format("%Y-%m-%d").to_string())
                .join("MEMORY.md");
            if let Some(content) = read_non_empty(&path) {
                short_term.push_str(&content);
                loaded_files.push(path);
            }
        }
        if !short_term.is_empty() {
            sections.push(short_term);
        }

        if sections.is_empty() {
            debug!(workspace = %workspace.display(), "No prompt files found, using fallback system prompt");
            return Self {
                text: Self::fallback(),
                loaded_files,
            };
        }

        let text = render(&sections.join(SEPARATOR), workspace, skills);
        debug!(
            files_loaded = loaded_files.len(),
            prompt_len = text.len(),
            "System prompt assembled"
        );

        Self { text, loaded_files }
    }

    /// The fallback system prompt when no prompt files exist.
    pub fn fallback() -> String {
        concat!(
            "You are a helpful AI assistant. ",
            "You have access to tools; use them when they help accomplish the user's goal. ",
            "Large tool outputs may be replaced by @refs/<id> pointers, which the load_ref tool resolves.",
        )
        .into()
    }
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self {
            text: Self::fallback(),
            loaded_files: Vec::new(),
        }
    }
}

fn try_load(path: &Path, sections: &mut Vec<String>, loaded_files: &mut Vec<PathBuf>) {
    if let Some(content) = read_non_empty(path) {
        debug!(file = %path.display(), "Loaded prompt file");
        sections.push(content);
        loaded_files.push(path.to_path_buf());
    }
}

fn read_non_empty(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .filter(|content| !content.trim().is_empty())
}

fn render(template: &str, workspace: &Path, skills: &str) -> String {
    let now = Local::now();
    let now = format!("{}, {}", now.format("%Y-%m-%d %H:%M:%S %z"), now.format("%A"));
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    template
        .replace("{{workspace}}", &workspace.display().to_string())
        .replace("{{cwd}}", &cwd)
        .replace("{{now}}", &now)
        .replace("{{runtime}}", std::env::consts::OS)
        .replace("{{skills}}", skills)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn empty_workspace_uses_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let prompt = SystemPrompt::load(tmp.path(), "");
        assert_eq!(prompt.text, SystemPrompt::fallback());
        assert!(prompt.loaded_files.is_empty());
    }

    #[test]
    fn sections_joined_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::create_dir_all(dir.join("prompts")).unwrap();
        fs::create_dir_all(dir.join("memory")).unwrap();
        fs::write(dir.join("prompts/AGENTS.md"), "agents").unwrap();
        fs::write(dir.join("prompts/TOOLS.md"), "tools").unwrap();
        fs::write(dir.join("memory/LONG-TERM.md"), "remember").unwrap();

        let prompt = SystemPrompt::load(dir, "");
        assert_eq!(prompt.text, "agents\n\n---\n\ntools\n\n---\n\nremember");
        assert_eq!(prompt.loaded_files.len(), 3);
    }

    #[test]
    fn placeholders_rendered() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::create_dir_all(dir.join("prompts")).unwrap();
        fs::write(
            dir.join("prompts/IDENTITY.md"),
            "ws={{workspace}} os={{runtime}} skills={{skills}}",
        )
        .unwrap();

        let prompt = SystemPrompt::load(dir, "- git");
        assert!(prompt.text.contains(&format!("ws={}", dir.display())));
        assert!(prompt.text.contains(&format!("os={}", std::env::consts::OS)));
        assert!(prompt.text.contains("skills=- git"));
        assert!(!prompt.text.contains("{{"));
    }

    #[test]
    fn todays_short_term_memory_included() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        fs::create_dir_all(dir.join("memory").join(&today)).unwrap();
        fs::write(dir.join("memory").join(&today).join("MEMORY.md"), "bought milk").unwrap();

        let prompt = SystemPrompt::load(dir, "");
        assert!(prompt.text.contains("bought milk"));
    }
}
