//! Rolling handoff document and git snapshot assembly.
//!
//! `handoff.md` is the context-transfer mechanism between providers. It is
//! overwritten after every successful turn (never appended) so it stays
//! compact, and at failover time it is prepended to the outgoing prompt
//! together with a live git snapshot so the receiving provider can pick up
//! mid-task without the previous provider's session history.

use std::path::Path;
use std::process::Command;

use chrono::Utc;

use crate::config::LimitsConfig;
use crate::provider::Provider;

/// Builds a compact Markdown snapshot of the repository for context
/// injection: `git status --porcelain`, the last five commits, the diff
/// stat, and the working-tree diff capped to the configured limits.
///
/// Returns an empty string outside a git work tree; individual git failures
/// just omit their section.
pub fn repo_snapshot(repo_root: &Path, limits: &LimitsConfig) -> String {
    if run_git(repo_root, &["rev-parse", "--is-inside-work-tree"]).is_none() {
        return String::new();
    }

    let mut parts = vec!["## Repo Snapshot\n".to_string()];

    if let Some(status) = run_git(repo_root, &["status", "--porcelain"]) {
        parts.push(format!("**Status:**\n```\n{}\n```\n", status.trim()));
    }

    if let Some(log) = run_git(repo_root, &["log", "-n", "5", "--oneline"]) {
        parts.push(format!("**Recent commits:**\n```\n{}\n```\n", log.trim()));
    }

    if let Some(stat) = run_git(repo_root, &["diff", "--stat"]) {
        parts.push(format!("**Diff stat:**\n```\n{}\n```\n", stat.trim()));
    }

    if let Some(diff) = run_git(repo_root, &["diff"]) {
        let n_lines = diff.lines().count();
        let n_bytes = diff.len();
        if n_lines <= limits.max_diff_lines && n_bytes <= limits.max_diff_bytes {
            parts.push(format!("**Full diff:**\n```diff\n{}\n```\n", diff.trim()));
        } else {
            let capped = cap_diff(&diff, limits);
            parts.push(format!(
                "**Full diff (truncated from {} lines / {} bytes):**\n```diff\n{}\n```\n",
                n_lines, n_bytes, capped
            ));
        }
    }

    parts.join("\n")
}

/// Assembles the prompt sent to the provider receiving a failover: a short
/// preamble, the rolling summary, the repo snapshot, and the user's actual
/// request, separated by horizontal rules.
pub fn build_failover_prompt(user_prompt: &str, summary: Option<&str>, snapshot: &str) -> String {
    let mut sections = vec![
        "## Provider Handoff\n\nYou are taking over an in-progress task from \
         another assistant whose session is unavailable. Use the context below \
         to continue without asking the user to repeat themselves."
            .to_string(),
    ];

    if let Some(summary) = summary {
        if !summary.trim().is_empty() {
            sections.push(format!(
                "## Context Handoff (from previous session)\n\n{}",
                summary
            ));
        }
    }

    if !snapshot.is_empty() {
        sections.push(snapshot.to_string());
    }

    sections.push(format!("## Current Task\n\n{}", user_prompt));

    sections.join("\n\n---\n\n")
}

/// Produces the next revision of the rolling summary.
///
/// Goal, plan, blockers, and next steps carry forward from the previous
/// revision; "What Changed This Turn" is rebuilt from bounded excerpts of
/// the latest exchange. The whole document is capped at
/// `limits.max_handoff_lines`.
pub fn update_summary(
    previous: Option<&str>,
    user_prompt: &str,
    assistant_text: &str,
    provider: Provider,
    limits: &LimitsConfig,
) -> String {
    let now = Utc::now().format("%Y-%m-%d %H:%M UTC");
    let prev = previous.unwrap_or("");

    let goal = extract_section(prev, "Current Goal");
    let plan = extract_section(prev, "Current Plan");
    let blockers = extract_section(prev, "Open Questions / Blockers");
    let steps = extract_section(prev, "Next Concrete Steps");

    let placeholder = "(not yet established - infer from the exchange below)";
    let content = format!(
        "# Switchboard Handoff\n\
         \n\
         *Last updated: {now} - Provider: {provider}*\n\
         \n\
         ## Current Goal\n\
         \n\
         {goal}\n\
         \n\
         ## Current Plan\n\
         \n\
         {plan}\n\
         \n\
         ## What Changed This Turn\n\
         \n\
         **User asked:**\n\
         {user}\n\
         \n\
         **{provider} responded:**\n\
         {text}\n\
         \n\
         ## Open Questions / Blockers\n\
         \n\
         {blockers}\n\
         \n\
         ## Next Concrete Steps\n\
         \n\
         {steps}\n",
        now = now,
        provider = provider,
        goal = if goal.is_empty() {
            placeholder
        } else {
            goal.as_str()
        },
        plan = if plan.is_empty() {
            placeholder
        } else {
            plan.as_str()
        },
        user = truncate_chars(user_prompt, 600),
        text = truncate_chars(assistant_text, 2_000),
        blockers = if blockers.is_empty() {
            "(none noted yet)"
        } else {
            blockers.as_str()
        },
        steps = if steps.is_empty() {
            "(Derive from the assistant response above and update this section.)"
        } else {
            steps.as_str()
        },
    );

    enforce_line_limit(&content, limits.max_handoff_lines)
}

/// Bounds `text` to `max_chars`, noting how much was dropped.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}\n…[{} chars truncated]", kept, total - max_chars)
}

fn run_git(repo_root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return None;
    }
    Some(stdout)
}

/// Enforces both the line and byte caps on an oversized diff; the smaller
/// cap wins. A trailing partial line is acceptable inside the code fence.
fn cap_diff(diff: &str, limits: &LimitsConfig) -> String {
    let mut kept = diff
        .lines()
        .take(limits.max_diff_lines)
        .collect::<Vec<_>>()
        .join("\n");
    if kept.len() > limits.max_diff_bytes {
        let mut end = limits.max_diff_bytes;
        while end > 0 && !kept.is_char_boundary(end) {
            end -= 1;
        }
        kept.truncate(end);
    }
    kept
}

/// Extracts the body of a level-2 Markdown section, empty if absent.
fn extract_section(text: &str, section_name: &str) -> String {
    let header = format!("## {}", section_name);
    let mut in_section = false;
    let mut body: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.starts_with(&header) {
            in_section = true;
            continue;
        }
        if in_section {
            if line.starts_with("## ") {
                break;
            }
            body.push(line);
        }
    }
    body.join("\n").trim().to_string()
}

/// Middle-cuts a document that exceeds `max_lines`, keeping the top third
/// and the tail so the goal header and the next-steps footer both survive.
fn enforce_line_limit(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }

    let keep_top = max_lines / 3;
    let keep_bottom = max_lines.saturating_sub(keep_top + 3);
    let dropped = lines.len() - keep_top - keep_bottom;

    let mut trimmed: Vec<&str> = Vec::with_capacity(max_lines);
    trimmed.extend(&lines[..keep_top]);
    let marker = format!(
        "[… {} lines omitted to stay within the {}-line limit …]",
        dropped, max_lines
    );
    trimmed.push("");
    trimmed.push(&marker);
    trimmed.push("");
    trimmed.extend(&lines[lines.len() - keep_bottom..]);
    trimmed.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn limits() -> LimitsConfig {
        LimitsConfig::default()
    }

    #[test]
    fn extract_section_finds_body_between_headers() {
        let doc = "# Title\n\n## Current Goal\n\nship it\n\n## Current Plan\n\nsteps\n";
        assert_eq!(extract_section(doc, "Current Goal"), "ship it");
        assert_eq!(extract_section(doc, "Current Plan"), "steps");
        assert_eq!(extract_section(doc, "Missing"), "");
    }

    #[test]
    fn update_summary_carries_sections_forward() {
        let previous = update_summary(None, "first ask", "first answer", Provider::Claude, &limits());
        let edited = previous
            .replace(
                "(not yet established - infer from the exchange below)",
                "finish the migration",
            )
            .replace("(none noted yet)", "waiting on credentials");

        let next = update_summary(
            Some(&edited),
            "second ask",
            "second answer",
            Provider::Codex,
            &limits(),
        );

        assert!(next.contains("finish the migration"));
        assert!(next.contains("waiting on credentials"));
        assert!(next.contains("second ask"));
        assert!(next.contains("**codex responded:**"));
        // The previous exchange is replaced, not accumulated.
        assert!(!next.contains("first ask"));
    }

    #[test]
    fn update_summary_uses_placeholders_without_previous() {
        let doc = update_summary(None, "ask", "answer", Provider::Claude, &limits());
        assert!(doc.contains("## Current Goal"));
        assert!(doc.contains("(not yet established - infer from the exchange below)"));
        assert!(doc.contains("(none noted yet)"));
        assert!(doc.contains("## Next Concrete Steps"));
    }

    #[test]
    fn update_summary_bounds_long_responses() {
        let long_answer = "a".repeat(5_000);
        let doc = update_summary(None, "ask", &long_answer, Provider::Claude, &limits());
        assert!(doc.contains("chars truncated"));
    }

    #[test]
    fn oversized_document_is_middle_cut() {
        let body: Vec<String> = (0..500).map(|i| format!("line {}", i)).collect();
        let text = body.join("\n");
        let capped = enforce_line_limit(&text, 100);

        let lines: Vec<&str> = capped.lines().collect();
        assert!(lines.len() <= 100);
        assert_eq!(lines[0], "line 0");
        assert_eq!(*lines.last().unwrap(), "line 499");
        assert!(capped.contains("lines omitted"));
    }

    #[test]
    fn failover_prompt_joins_sections_with_rules() {
        let prompt = build_failover_prompt("fix the bug", Some("## Current Goal\n\nship"), "");
        assert!(prompt.starts_with("## Provider Handoff"));
        assert!(prompt.contains("## Context Handoff (from previous session)"));
        assert!(prompt.contains("\n\n---\n\n"));
        assert!(prompt.ends_with("## Current Task\n\nfix the bug"));
    }

    #[test]
    fn failover_prompt_skips_empty_summary_and_snapshot() {
        let prompt = build_failover_prompt("do it", None, "");
        assert!(!prompt.contains("Context Handoff"));
        assert!(!prompt.contains("Repo Snapshot"));
        assert!(prompt.contains("## Current Task\n\ndo it"));
    }

    #[test]
    fn truncate_chars_notes_dropped_count() {
        assert_eq!(truncate_chars("short", 10), "short");
        let cut = truncate_chars(&"x".repeat(20), 10);
        assert!(cut.starts_with("xxxxxxxxxx\n"));
        assert!(cut.contains("…[10 chars truncated]"));
    }

    #[test]
    fn cap_diff_honors_both_limits() {
        let diff: String = (0..300)
            .map(|i| format!("+added line {}\n", i))
            .collect();
        let capped = cap_diff(
            &diff,
            &LimitsConfig {
                max_diff_lines: 10,
                max_diff_bytes: 80,
                max_handoff_lines: 350,
            },
        );
        assert!(capped.lines().count() <= 10);
        assert!(capped.len() <= 80);
    }

    #[test]
    fn snapshot_outside_git_repo_is_empty() {
        let temp = TempDir::new().unwrap();
        assert_eq!(repo_snapshot(temp.path(), &limits()), "");
    }

    #[test]
    fn snapshot_inside_git_repo_lists_untracked_files() {
        if Command::new("git").arg("--version").output().is_err() {
            return;
        }
        let temp = TempDir::new().unwrap();
        Command::new("git")
            .args(["init"])
            .current_dir(temp.path())
            .output()
            .unwrap();
        std::fs::write(temp.path().join("note.txt"), "hello\n").unwrap();

        let snapshot = repo_snapshot(temp.path(), &limits());
        assert!(snapshot.contains("## Repo Snapshot"));
        assert!(snapshot.contains("note.txt"));
    }
}
