//! Codex CLI adapter.
//!
//! New session:    `codex exec --json "<prompt>"`
//! Resume session: `codex exec resume <session_id> --json "<prompt>"`
//!
//! The CLI emits newline-delimited JSON events. The ones that matter:
//! `thread.started` carries the session/thread id, `item.completed` with an
//! `agent_message` item carries the assistant text, and `error` events carry
//! a message plus an HTTP-ish status. Non-JSON progress lines are skipped.

use async_trait::async_trait;
use tokio::process::Command;

use crate::classify::{ErrorClass, ErrorClassifier};
use crate::config::SwitchboardConfig;

use super::{
    capture_cli, combined_output, spawn_failure, timeout_failure, CliOutcome, Provider,
    ProviderAdapter, TurnRequest, TurnResult,
};

const INSTALL_HINT: &str = "npm i -g @openai/codex";

/// Adapter for the OpenAI Codex CLI.
pub struct CodexAdapter {
    /// Path to the codex CLI binary.
    cli_path: String,
    classifier: ErrorClassifier,
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodexAdapter {
    /// Creates a new adapter using the default `codex` command.
    pub fn new() -> Self {
        Self::with_cli_path("codex")
    }

    /// Creates a new adapter with a custom CLI path.
    pub fn with_cli_path(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
            classifier: ErrorClassifier::for_provider(Provider::Codex),
        }
    }

    /// Builds the command arguments for one invocation.
    fn build_args(&self, request: &TurnRequest, config: &SwitchboardConfig) -> Vec<String> {
        let mut args = vec!["exec".to_string()];

        if let Some(model) = &config.codex.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        // Valid exec modes:
        //   --sandbox {read-only|workspace-write|danger-full-access}
        //   --full-auto
        //   --dangerously-bypass-approvals-and-sandbox
        let sandbox = config.codex.sandbox.as_str();
        match sandbox {
            "read-only" | "workspace-write" | "danger-full-access" => {
                args.push("--sandbox".to_string());
                args.push(sandbox.to_string());
            }
            "full-auto" => args.push("--full-auto".to_string()),
            "dangerously-bypass-approvals-and-sandbox" => {
                args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
            }
            other => {
                tracing::warn!(mode = %other, "unknown codex sandbox mode, using read-only");
                args.push("--sandbox".to_string());
                args.push("read-only".to_string());
            }
        }

        if let Some(session_id) = &request.session_id {
            args.push("resume".to_string());
            args.push(session_id.clone());
        }

        args.push("--json".to_string());
        args.push(request.prompt.clone());

        args
    }

    /// Walks the JSONL event stream and extracts the turn outcome.
    fn parse_output(&self, stdout: &str, stderr: &str, exit_status: Option<i32>) -> TurnResult {
        let raw = combined_output(stdout, stderr);

        let mut thread_id: Option<String> = None;
        let mut assistant_text: Option<String> = None;
        let mut last_error: Option<serde_json::Value> = None;

        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(event) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };

            match event.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                "thread.started" => {
                    // The id field name varies by codex version.
                    thread_id = ["thread_id", "id", "session_id"]
                        .iter()
                        .find_map(|k| event.get(k).and_then(|v| v.as_str()))
                        .map(str::to_string);
                }
                "item.completed" => {
                    if let Some(text) = Self::agent_message_text(&event) {
                        // Keep the last agent message: the final answer.
                        assistant_text = Some(text);
                    }
                }
                "error" => last_error = Some(event),
                _ => {}
            }
        }

        if let Some(error) = last_error {
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            // Classify on the whole event so the numeric status is visible
            // to the pattern tables ("status":429 and friends).
            let class = self
                .classifier
                .classify(&error.to_string(), None)
                .unwrap_or(ErrorClass::OtherError);
            return TurnResult::failed(Provider::Codex, class, message, raw)
                .with_session(thread_id);
        }

        if exit_status != Some(0) && assistant_text.is_none() {
            let message = if raw.is_empty() {
                "unknown error from Codex CLI".to_string()
            } else {
                raw.clone()
            };
            let class = self
                .classifier
                .classify(&raw, exit_status)
                .unwrap_or(ErrorClass::OtherError);
            return TurnResult::failed(Provider::Codex, class, message, raw)
                .with_session(thread_id);
        }

        if let Some(text) = assistant_text {
            return TurnResult::succeeded(Provider::Codex, text, thread_id, raw);
        }

        // Clean exit, no error event, but nothing resembling an answer.
        TurnResult::failed(
            Provider::Codex,
            ErrorClass::OtherError,
            "no agent message found in codex output",
            raw,
        )
        .with_session(thread_id)
    }

    /// Extracts the text of an `agent_message` item, if the event holds one.
    fn agent_message_text(event: &serde_json::Value) -> Option<String> {
        let item = event.get("item")?;
        if item.get("type").and_then(|t| t.as_str()) != Some("agent_message") {
            return None;
        }

        if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
            return Some(text.to_string());
        }

        let blocks = item.get("content").and_then(|c| c.as_array())?;
        let parts: Vec<&str> = blocks
            .iter()
            .filter_map(|block| {
                block
                    .get("text")
                    .or_else(|| block.get("output_text"))
                    .and_then(|t| t.as_str())
            })
            .filter(|t| !t.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

#[async_trait]
impl ProviderAdapter for CodexAdapter {
    fn provider(&self) -> Provider {
        Provider::Codex
    }

    async fn invoke(&self, request: &TurnRequest, config: &SwitchboardConfig) -> TurnResult {
        let args = self.build_args(request, config);

        tracing::info!(
            cli = %self.cli_path,
            resuming = request.session_id.is_some(),
            "invoking codex"
        );

        let mut command = Command::new(&self.cli_path);
        command.args(&args);

        match capture_cli(&mut command).await {
            CliOutcome::Completed(capture) => {
                self.parse_output(&capture.stdout, &capture.stderr, capture.exit_status)
            }
            CliOutcome::SpawnFailed(e) => spawn_failure(Provider::Codex, e, INSTALL_HINT),
            CliOutcome::TimedOut => timeout_failure(Provider::Codex),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> CodexAdapter {
        CodexAdapter::new()
    }

    fn request(session: Option<&str>) -> TurnRequest {
        TurnRequest::new("do the thing", session.map(str::to_string))
    }

    #[test]
    fn codex_builds_basic_args() {
        let config = SwitchboardConfig::default();
        let args = adapter().build_args(&request(None), &config);

        assert_eq!(args[0], "exec");
        assert!(args.contains(&"--sandbox".to_string()));
        assert!(args.contains(&"read-only".to_string()));
        assert_eq!(args[args.len() - 2], "--json");
        assert_eq!(args[args.len() - 1], "do the thing");
    }

    #[test]
    fn codex_resume_precedes_json_flag() {
        let config = SwitchboardConfig::default();
        let args = adapter().build_args(&request(Some("thread_9")), &config);

        let resume = args.iter().position(|a| a == "resume").unwrap();
        let json = args.iter().position(|a| a == "--json").unwrap();
        assert_eq!(args[resume + 1], "thread_9");
        assert!(resume < json);
    }

    #[test]
    fn codex_full_auto_mode_maps_to_flag() {
        let mut config = SwitchboardConfig::default();
        config.codex.sandbox = "full-auto".to_string();

        let args = adapter().build_args(&request(None), &config);

        assert!(args.contains(&"--full-auto".to_string()));
        assert!(!args.contains(&"--sandbox".to_string()));
    }

    #[test]
    fn codex_invalid_sandbox_falls_back_to_read_only() {
        let mut config = SwitchboardConfig::default();
        config.codex.sandbox = "yolo".to_string();

        let args = adapter().build_args(&request(None), &config);

        let sandbox = args.iter().position(|a| a == "--sandbox").unwrap();
        assert_eq!(args[sandbox + 1], "read-only");
    }

    #[test]
    fn codex_parses_thread_and_last_agent_message() {
        let stdout = concat!(
            "{\"type\":\"thread.started\",\"thread_id\":\"thread_abc\"}\n",
            "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"content\":[{\"type\":\"output_text\",\"text\":\"first\"}]}}\n",
            "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"content\":[{\"type\":\"output_text\",\"text\":\"final answer\"}]}}\n",
        );
        let result = adapter().parse_output(stdout, "", Some(0));

        assert!(result.success);
        assert_eq!(result.text.as_deref(), Some("final answer"));
        assert_eq!(result.session_id.as_deref(), Some("thread_abc"));
    }

    #[test]
    fn codex_skips_non_json_progress_lines() {
        let stdout = concat!(
            "working on it...\n",
            "{\"type\":\"thread.started\",\"id\":\"t1\"}\n",
            "{\"type\":\"item.completed\",\"item\":{\"type\":\"agent_message\",\"text\":\"ok\"}}\n",
        );
        let result = adapter().parse_output(stdout, "", Some(0));

        assert!(result.success);
        assert_eq!(result.text.as_deref(), Some("ok"));
        assert_eq!(result.session_id.as_deref(), Some("t1"));
    }

    #[test]
    fn codex_error_event_with_429_is_transient() {
        let stdout = concat!(
            "{\"type\":\"thread.started\",\"thread_id\":\"t2\"}\n",
            "{\"type\":\"error\",\"status\":429,\"message\":\"slow down\"}\n",
        );
        let result = adapter().parse_output(stdout, "", Some(1));

        assert!(!result.success);
        assert_eq!(result.error_class, Some(ErrorClass::TransientRateLimit));
        assert_eq!(result.error_message.as_deref(), Some("slow down"));
        assert_eq!(result.session_id.as_deref(), Some("t2"));
    }

    #[test]
    fn codex_quota_message_beats_429_status() {
        let stdout =
            "{\"type\":\"error\",\"status\":429,\"message\":\"monthly quota exhausted\"}\n";
        let result = adapter().parse_output(stdout, "", Some(1));

        assert_eq!(result.error_class, Some(ErrorClass::QuotaExhausted));
    }

    #[test]
    fn codex_error_event_with_401_is_auth() {
        let stdout = "{\"type\":\"error\",\"status\":401,\"message\":\"run codex login\"}\n";
        let result = adapter().parse_output(stdout, "", Some(1));

        assert_eq!(result.error_class, Some(ErrorClass::AuthRequired));
    }

    #[test]
    fn codex_nonzero_exit_without_events_classifies_raw() {
        let result = adapter().parse_output("", "stream error: rate limit exceeded\n", Some(1));

        assert!(!result.success);
        assert_eq!(result.error_class, Some(ErrorClass::TransientRateLimit));
    }

    #[test]
    fn codex_clean_exit_without_message_is_other() {
        let stdout = "{\"type\":\"thread.started\",\"thread_id\":\"t3\"}\n";
        let result = adapter().parse_output(stdout, "", Some(0));

        assert!(!result.success);
        assert_eq!(result.error_class, Some(ErrorClass::OtherError));
        assert_eq!(result.session_id.as_deref(), Some("t3"));
    }
}
