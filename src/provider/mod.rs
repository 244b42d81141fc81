//! Provider adapters for CLI AI assistants.
//!
//! Each adapter wraps one assistant CLI in headless single-turn mode and
//! folds every failure mode (spawn errors, timeouts, non-zero exits,
//! unparseable output) into a classified [`TurnResult`]. The router never
//! sees a raised error from an adapter.

mod claude;
mod codex;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;

use std::fmt;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::classify::ErrorClass;
use crate::config::SwitchboardConfig;

/// Hard wall-clock limit for a single CLI invocation.
pub const INVOCATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Identity of one assistant backend. The set is fixed; the preference
/// order among them comes from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
}

impl Provider {
    /// All known providers, in default preference order.
    pub const ALL: [Provider; 2] = [Provider::Claude, Provider::Codex];

    /// Lowercase name as it appears in configuration and state files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Codex => "codex",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" => Ok(Provider::Claude),
            "codex" => Ok(Provider::Codex),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// One turn's input to an adapter.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Prompt text, possibly with handoff context already prepended.
    pub prompt: String,
    /// Session to resume on this provider; `None` starts a fresh one.
    pub session_id: Option<String>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            prompt: prompt.into(),
            session_id,
        }
    }
}

/// Result of one provider invocation.
#[derive(Debug, Clone)]
pub struct TurnResult {
    /// Provider that produced this result.
    pub provider: Provider,
    /// Whether the turn produced usable assistant output.
    pub success: bool,
    /// Assistant response text on success.
    pub text: Option<String>,
    /// Provider-assigned conversation handle, when one was reported.
    pub session_id: Option<String>,
    /// Classification of the failure; absent on success.
    pub error_class: Option<ErrorClass>,
    /// Human-readable failure description, bounded to 800 characters.
    pub error_message: Option<String>,
    /// Combined stdout/stderr capture the classification was based on.
    pub raw_output: String,
}

impl TurnResult {
    /// Builds a successful result.
    pub fn succeeded(
        provider: Provider,
        text: impl Into<String>,
        session_id: Option<String>,
        raw_output: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            success: true,
            text: Some(text.into()),
            session_id,
            error_class: None,
            error_message: None,
            raw_output: raw_output.into(),
        }
    }

    /// Builds a failed result with a bounded error message.
    pub fn failed(
        provider: Provider,
        error_class: ErrorClass,
        error_message: impl Into<String>,
        raw_output: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            success: false,
            text: None,
            session_id: None,
            error_class: Some(error_class),
            error_message: Some(clip_chars(&error_message.into(), 800)),
            raw_output: raw_output.into(),
        }
    }

    /// Keeps a session handle on a failed result, for diagnostics.
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Capability trait for one assistant CLI.
///
/// `invoke` must not fail for provider-reported errors: those are returned
/// as classified results so the router can decide to retry or fail over.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter drives.
    fn provider(&self) -> Provider;

    /// Executes one turn against the CLI.
    async fn invoke(&self, request: &TurnRequest, config: &SwitchboardConfig) -> TurnResult;
}

/// The default adapter set, one per known provider.
pub fn default_adapters() -> Vec<Box<dyn ProviderAdapter>> {
    vec![
        Box::new(ClaudeAdapter::new()),
        Box::new(CodexAdapter::new()),
    ]
}

/// Captured output of a completed CLI invocation.
pub(crate) struct CliCapture {
    pub stdout: String,
    pub stderr: String,
    /// Exit code when the process terminated normally.
    pub exit_status: Option<i32>,
}

/// Outcome of driving a CLI to completion under the invocation timeout.
pub(crate) enum CliOutcome {
    Completed(CliCapture),
    SpawnFailed(std::io::Error),
    TimedOut,
}

/// Runs a prepared command to completion, capturing output.
///
/// The child is killed if the timeout elapses or the future is dropped.
pub(crate) async fn capture_cli(command: &mut Command) -> CliOutcome {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return CliOutcome::SpawnFailed(e),
    };

    match tokio::time::timeout(INVOCATION_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => CliOutcome::Completed(CliCapture {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status: output.status.code(),
        }),
        Ok(Err(e)) => CliOutcome::SpawnFailed(e),
        Err(_) => CliOutcome::TimedOut,
    }
}

/// Maps a spawn failure into a classified result with an install hint.
pub(crate) fn spawn_failure(
    provider: Provider,
    error: std::io::Error,
    install_hint: &str,
) -> TurnResult {
    let message = if error.kind() == std::io::ErrorKind::NotFound {
        format!("'{provider}' command not found. Install with: {install_hint}")
    } else {
        format!("failed to launch {provider}: {error}")
    };
    tracing::warn!(provider = %provider, error = %message, "CLI spawn failed");
    TurnResult::failed(provider, ErrorClass::OtherError, message, String::new())
}

/// Maps a timeout into a classified result.
pub(crate) fn timeout_failure(provider: Provider) -> TurnResult {
    let message = format!(
        "{provider} CLI timed out after {} seconds",
        INVOCATION_TIMEOUT.as_secs()
    );
    tracing::warn!(provider = %provider, "CLI invocation timed out");
    TurnResult::failed(provider, ErrorClass::OtherError, message, String::new())
}

/// Joins stdout and stderr into the raw capture fed to the classifier.
pub(crate) fn combined_output(stdout: &str, stderr: &str) -> String {
    let mut raw = String::with_capacity(stdout.len() + stderr.len());
    raw.push_str(stdout);
    raw.push_str(stderr);
    raw
}

/// Cuts a string to at most `max` characters, on a char boundary.
pub(crate) fn clip_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parses_known_names() {
        assert_eq!("claude".parse::<Provider>(), Ok(Provider::Claude));
        assert_eq!("Codex".parse::<Provider>(), Ok(Provider::Codex));
        assert_eq!(" claude ".parse::<Provider>(), Ok(Provider::Claude));
        assert!("gemini".parse::<Provider>().is_err());
    }

    #[test]
    fn provider_serializes_lowercase() {
        let json = serde_json::to_string(&Provider::Claude).unwrap();
        assert_eq!(json, "\"claude\"");
        let back: Provider = serde_json::from_str("\"codex\"").unwrap();
        assert_eq!(back, Provider::Codex);
    }

    #[test]
    fn failed_result_bounds_error_message() {
        let long = "x".repeat(2000);
        let result = TurnResult::failed(
            Provider::Claude,
            ErrorClass::OtherError,
            long,
            String::new(),
        );
        assert_eq!(result.error_message.as_ref().unwrap().chars().count(), 800);
        assert!(!result.success);
    }

    #[test]
    fn succeeded_result_has_no_error_class() {
        let result = TurnResult::succeeded(
            Provider::Codex,
            "done",
            Some("thread_1".to_string()),
            "raw",
        );
        assert!(result.success);
        assert_eq!(result.error_class, None);
        assert_eq!(result.session_id.as_deref(), Some("thread_1"));
    }

    #[test]
    fn clip_chars_respects_char_boundaries() {
        assert_eq!(clip_chars("héllo", 2), "hé");
        assert_eq!(clip_chars("short", 10), "short");
    }

    #[test]
    fn default_adapter_set_covers_all_providers() {
        let adapters = default_adapters();
        let names: Vec<Provider> = adapters.iter().map(|a| a.provider()).collect();
        assert_eq!(names, vec![Provider::Claude, Provider::Codex]);
    }
}
