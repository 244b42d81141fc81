//! Append-only turn log records.
//!
//! Every completed turn becomes one JSON line in
//! `.switchboard/transcript.ndjson`. Records keep a stable flat schema:
//! absent values serialize as `null` rather than being omitted, so the
//! file stays greppable and line-parseable as fields are added.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cooldown::CooldownSource;
use crate::handoff::truncate_chars;
use crate::provider::{Provider, TurnResult};
use crate::router::SwitchDecision;

const MAX_PROMPT_CHARS: usize = 2_000;
const MAX_TEXT_CHARS: usize = 10_000;

/// One line of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub ts: DateTime<Utc>,
    /// Provider that answered (or last failed); `None` if none was reached.
    pub provider: Option<Provider>,
    /// Original user prompt, without any injected handoff context.
    pub user_prompt: String,
    pub assistant_text: Option<String>,
    pub session_id: Option<String>,
    /// `"ERROR_CLASS: message"` on failure, `None` on success.
    pub error: Option<String>,
    /// Cooldown applied to `provider` during this turn, if any.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub cooldown_source: Option<CooldownSource>,
    pub cooldown_reason: Option<String>,
    /// Failover metadata, present only when a switch was considered.
    pub switch_from: Option<Provider>,
    pub switch_to: Option<Provider>,
    pub switch_decision: Option<SwitchDecision>,
}

impl TurnRecord {
    /// Record for a successful turn. Cooldown and switch fields start empty;
    /// the caller fills them from the updated state when applicable.
    pub fn success(user_prompt: &str, result: &TurnResult) -> Self {
        Self {
            ts: Utc::now(),
            provider: Some(result.provider),
            user_prompt: truncate_chars(user_prompt, MAX_PROMPT_CHARS),
            assistant_text: result
                .text
                .as_deref()
                .map(|t| truncate_chars(t, MAX_TEXT_CHARS)),
            session_id: result.session_id.clone(),
            error: None,
            cooldown_until: None,
            cooldown_source: None,
            cooldown_reason: None,
            switch_from: None,
            switch_to: None,
            switch_decision: None,
        }
    }

    /// Record for a failed turn, with the classified error flattened to a
    /// single `"CLASS: message"` string.
    pub fn failure(user_prompt: &str, result: &TurnResult) -> Self {
        let message = result.error_message.as_deref().unwrap_or("unknown error");
        let error = match result.error_class {
            Some(class) => format!("{}: {}", class.as_str(), message),
            None => message.to_string(),
        };
        Self {
            ts: Utc::now(),
            provider: Some(result.provider),
            user_prompt: truncate_chars(user_prompt, MAX_PROMPT_CHARS),
            assistant_text: None,
            session_id: result.session_id.clone(),
            error: Some(error),
            cooldown_until: None,
            cooldown_source: None,
            cooldown_reason: None,
            switch_from: None,
            switch_to: None,
            switch_decision: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorClass;
    use crate::state::StateStore;
    use tempfile::TempDir;

    #[test]
    fn success_record_captures_result_fields() {
        let result = TurnResult::succeeded(
            Provider::Claude,
            "the answer",
            Some("sess-9".to_string()),
            "raw",
        );
        let record = TurnRecord::success("what is it?", &result);

        assert_eq!(record.provider, Some(Provider::Claude));
        assert_eq!(record.user_prompt, "what is it?");
        assert_eq!(record.assistant_text.as_deref(), Some("the answer"));
        assert_eq!(record.session_id.as_deref(), Some("sess-9"));
        assert_eq!(record.error, None);
    }

    #[test]
    fn failure_record_flattens_class_and_message() {
        let result = TurnResult::failed(
            Provider::Codex,
            ErrorClass::QuotaExhausted,
            "usage limit reached",
            "raw",
        );
        let record = TurnRecord::failure("prompt", &result);

        assert_eq!(
            record.error.as_deref(),
            Some("QUOTA_EXHAUSTED: usage limit reached")
        );
        assert_eq!(record.assistant_text, None);
    }

    #[test]
    fn absent_fields_serialize_as_null() {
        let result = TurnResult::succeeded(Provider::Claude, "ok", None, "raw");
        let record = TurnRecord::success("hi", &result);
        let json = serde_json::to_string(&record).unwrap();

        assert!(json.contains("\"error\":null"));
        assert!(json.contains("\"switch_from\":null"));
        assert!(json.contains("\"provider\":\"claude\""));
    }

    #[test]
    fn oversized_prompt_is_truncated_with_marker() {
        let long = "x".repeat(3_000);
        let result = TurnResult::succeeded(Provider::Claude, "ok", None, "raw");
        let record = TurnRecord::success(&long, &result);

        assert!(record.user_prompt.chars().count() < 3_000);
        assert!(record.user_prompt.contains("chars truncated"));
    }

    #[test]
    fn transcript_file_grows_one_line_per_record() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path());

        let ok = TurnResult::succeeded(Provider::Claude, "fine", None, "raw");
        store
            .append_transcript(&TurnRecord::success("one", &ok))
            .unwrap();
        let failed = TurnResult::failed(Provider::Codex, ErrorClass::OtherError, "boom", "raw");
        store
            .append_transcript(&TurnRecord::failure("two", &failed))
            .unwrap();

        let raw =
            std::fs::read_to_string(store.dir().join("transcript.ndjson")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: TurnRecord = serde_json::from_str(line).unwrap();
            assert!(!parsed.user_prompt.is_empty());
        }
    }
}
