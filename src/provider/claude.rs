//! Claude Code CLI adapter.
//!
//! New session:    `claude -p "<prompt>" --output-format json`
//! Resume session: `claude -r <session_id> -p "<prompt>" --output-format json`
//!
//! With `--output-format json` the CLI prints a single JSON envelope:
//! `{"type":"result","result":"...","session_id":"...","is_error":false,...}`.

use async_trait::async_trait;
use tokio::process::Command;

use crate::classify::{ErrorClass, ErrorClassifier};
use crate::config::SwitchboardConfig;

use super::{
    capture_cli, combined_output, spawn_failure, timeout_failure, CliOutcome, Provider,
    ProviderAdapter, TurnRequest, TurnResult,
};

const INSTALL_HINT: &str = "npm i -g @anthropic-ai/claude-code";

/// Adapter for the Claude Code CLI.
pub struct ClaudeAdapter {
    /// Path to the claude CLI binary.
    cli_path: String,
    classifier: ErrorClassifier,
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeAdapter {
    /// Creates a new adapter using the default `claude` command.
    pub fn new() -> Self {
        Self::with_cli_path("claude")
    }

    /// Creates a new adapter with a custom CLI path.
    pub fn with_cli_path(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
            classifier: ErrorClassifier::for_provider(Provider::Claude),
        }
    }

    /// Builds the command arguments for one invocation.
    fn build_args(&self, request: &TurnRequest, config: &SwitchboardConfig) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(session_id) = &request.session_id {
            args.push("-r".to_string());
            args.push(session_id.clone());
        }

        args.push("-p".to_string());
        args.push(request.prompt.clone());
        args.push("--output-format".to_string());
        args.push("json".to_string());

        if let Some(model) = &config.claude.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        for tool in &config.claude.allowed_tools {
            args.push("--allowedTools".to_string());
            args.push(tool.clone());
        }

        args
    }

    /// Parses captured output into a turn result.
    fn parse_output(&self, stdout: &str, stderr: &str, exit_status: Option<i32>) -> TurnResult {
        let raw = combined_output(stdout, stderr);
        let trimmed = stdout.trim();

        if let Ok(envelope) = serde_json::from_str::<serde_json::Value>(trimmed) {
            let is_error = envelope
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let text = envelope
                .get("result")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let session_id = envelope
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(str::to_string);

            // The envelope is authoritative: a non-error result with text is
            // a success even if the CLI's exit code disagrees.
            if !is_error && !text.is_empty() {
                return TurnResult::succeeded(Provider::Claude, text, session_id, raw);
            }

            let basis = if text.is_empty() { raw.as_str() } else { text };
            let class = self
                .classifier
                .classify(basis, exit_status)
                .unwrap_or(ErrorClass::OtherError);
            return TurnResult::failed(Provider::Claude, class, basis, raw.clone())
                .with_session(session_id);
        }

        // No valid JSON. A clean exit with plain text is still usable output.
        if exit_status == Some(0) && !trimmed.is_empty() {
            return TurnResult::succeeded(Provider::Claude, trimmed, None, raw);
        }

        let class = self
            .classifier
            .classify(&raw, exit_status)
            .unwrap_or(ErrorClass::OtherError);
        let message = if raw.is_empty() {
            "unknown error from Claude CLI".to_string()
        } else {
            raw.clone()
        };
        TurnResult::failed(Provider::Claude, class, message, raw)
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn invoke(&self, request: &TurnRequest, config: &SwitchboardConfig) -> TurnResult {
        let args = self.build_args(request, config);

        tracing::info!(
            cli = %self.cli_path,
            resuming = request.session_id.is_some(),
            "invoking claude"
        );

        let mut command = Command::new(&self.cli_path);
        command.args(&args);

        match capture_cli(&mut command).await {
            CliOutcome::Completed(capture) => {
                self.parse_output(&capture.stdout, &capture.stderr, capture.exit_status)
            }
            CliOutcome::SpawnFailed(e) => spawn_failure(Provider::Claude, e, INSTALL_HINT),
            CliOutcome::TimedOut => timeout_failure(Provider::Claude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> ClaudeAdapter {
        ClaudeAdapter::new()
    }

    fn request(session: Option<&str>) -> TurnRequest {
        TurnRequest::new("test prompt", session.map(str::to_string))
    }

    #[test]
    fn claude_builds_basic_args() {
        let config = SwitchboardConfig::default();
        let args = adapter().build_args(&request(None), &config);

        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "test prompt");
        assert!(args.contains(&"--output-format".to_string()));
        assert!(args.contains(&"json".to_string()));
        assert!(!args.contains(&"-r".to_string()));
    }

    #[test]
    fn claude_resumes_with_session_flag() {
        let config = SwitchboardConfig::default();
        let args = adapter().build_args(&request(Some("sess-42")), &config);

        assert_eq!(args[0], "-r");
        assert_eq!(args[1], "sess-42");
        assert_eq!(args[2], "-p");
    }

    #[test]
    fn claude_includes_allowed_tools() {
        let mut config = SwitchboardConfig::default();
        config.claude.allowed_tools = vec!["Read".to_string(), "Bash".to_string()];

        let args = adapter().build_args(&request(None), &config);

        let flags: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| a.as_str() == "--allowedTools")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flags.len(), 2);
        assert_eq!(args[flags[0] + 1], "Read");
        assert_eq!(args[flags[1] + 1], "Bash");
    }

    #[test]
    fn claude_includes_model_when_configured() {
        let mut config = SwitchboardConfig::default();
        config.claude.model = Some("sonnet".to_string());

        let args = adapter().build_args(&request(None), &config);

        assert!(args.contains(&"--model".to_string()));
        assert!(args.contains(&"sonnet".to_string()));
    }

    #[test]
    fn claude_parses_success_envelope() {
        let stdout = r#"{"type":"result","result":"Hello there","session_id":"abc-123","is_error":false}"#;
        let result = adapter().parse_output(stdout, "", Some(0));

        assert!(result.success);
        assert_eq!(result.text.as_deref(), Some("Hello there"));
        assert_eq!(result.session_id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn claude_envelope_success_overrides_exit_code() {
        let stdout = r#"{"type":"result","result":"fine","session_id":"s1","is_error":false}"#;
        let result = adapter().parse_output(stdout, "", Some(1));

        assert!(result.success);
    }

    #[test]
    fn claude_parses_error_envelope_as_quota() {
        let stdout = r#"{"type":"result","result":"Claude AI usage limit reached|1756155600","session_id":"s2","is_error":true}"#;
        let result = adapter().parse_output(stdout, "", Some(1));

        assert!(!result.success);
        assert_eq!(result.error_class, Some(ErrorClass::QuotaExhausted));
        assert_eq!(result.session_id.as_deref(), Some("s2"));
    }

    #[test]
    fn claude_empty_result_envelope_is_failure() {
        let stdout = r#"{"type":"result","result":"","session_id":"s3","is_error":false}"#;
        let result = adapter().parse_output(stdout, "", Some(0));

        assert!(!result.success);
        assert_eq!(result.error_class, Some(ErrorClass::OtherError));
    }

    #[test]
    fn claude_accepts_plain_text_on_clean_exit() {
        let result = adapter().parse_output("plain answer\n", "", Some(0));

        assert!(result.success);
        assert_eq!(result.text.as_deref(), Some("plain answer"));
        assert_eq!(result.session_id, None);
    }

    #[test]
    fn claude_classifies_auth_failure_from_stderr() {
        let result = adapter().parse_output("", "Please run: claude login\n", Some(1));

        assert!(!result.success);
        assert_eq!(result.error_class, Some(ErrorClass::AuthRequired));
    }

    #[test]
    fn claude_empty_output_nonzero_exit_is_other() {
        let result = adapter().parse_output("", "", Some(1));

        assert!(!result.success);
        assert_eq!(result.error_class, Some(ErrorClass::OtherError));
        assert_eq!(
            result.error_message.as_deref(),
            Some("unknown error from Claude CLI")
        );
    }
}
