use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::state::Action;

/// How keyboard actions are written inside a model reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSyntax {
    /// Fenced code blocks tagged bash/sh/shell (or untagged). Each block
    /// becomes one typed command finished with Enter.
    #[default]
    FencedBlocks,
    /// `TYPE: <text>` and `KEY: <name>` line directives.
    LineDirectives,
}

/// Extract keyboard actions from a reply, in reply order. A reply with no
/// recognizable actions yields an empty list; extraction never fails.
pub fn extract_actions(syntax: CommandSyntax, reply: &str) -> Vec<Action> {
    match syntax {
        CommandSyntax::FencedBlocks => extract_fenced(reply),
        CommandSyntax::LineDirectives => extract_directives(reply),
    }
}

fn extract_fenced(reply: &str) -> Vec<Action> {
    let fence = Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").unwrap();
    let mut actions = Vec::new();
    for captures in fence.captures_iter(reply) {
        let tag = captures[1].to_ascii_lowercase();
        if !matches!(tag.as_str(), "" | "bash" | "sh" | "shell") {
            continue;
        }
        let body = captures[2].trim();
        if body.is_empty() {
            continue;
        }
        // Exactly one trailing newline so the command ends with Enter
        actions.push(Action::TypeText {
            text: format!("{body}\n"),
        });
    }
    actions
}

fn extract_directives(reply: &str) -> Vec<Action> {
    let mut actions = Vec::new();
    for line in reply.lines() {
        let line = line.trim();
        if let Some(text) = line.strip_prefix("TYPE:") {
            let text = text.trim();
            if !text.is_empty() {
                actions.push(Action::TypeText {
                    text: text.to_string(),
                });
            }
        } else if let Some(key) = line.strip_prefix("KEY:") {
            let key = key.trim();
            if !key.is_empty() {
                actions.push(Action::PressKey {
                    key: key.to_string(),
                });
            }
        }
    }
    actions
}
