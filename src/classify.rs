//! Error classification from provider CLI output.
//!
//! Pattern-matches captured stdout/stderr against per-provider phrase tables
//! and maps each failed invocation to a small taxonomy the router can act on.
//! Provider CLIs change their wording between releases, so the tables are
//! deliberately flat and easy to extend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::Provider;

/// Classification of a failed provider invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// The provider's usage quota is exhausted until some reset time.
    QuotaExhausted,
    /// A rate limit that is expected to clear within seconds to minutes.
    TransientRateLimit,
    /// The CLI is not logged in or its credentials are invalid.
    AuthRequired,
    /// Any other failure, including unparseable output and timeouts.
    OtherError,
}

impl ErrorClass {
    /// Stable wire name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::QuotaExhausted => "QUOTA_EXHAUSTED",
            ErrorClass::TransientRateLimit => "TRANSIENT_RATE_LIMIT",
            ErrorClass::AuthRequired => "AUTH_REQUIRED",
            ErrorClass::OtherError => "OTHER_ERROR",
        }
    }

    /// Whether the router should try another provider after this error.
    pub fn is_switchable(&self) -> bool {
        matches!(
            self,
            ErrorClass::QuotaExhausted | ErrorClass::TransientRateLimit
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies raw invocation output for one provider.
///
/// Precedence is fixed: quota, then rate limit, then auth, then a
/// non-zero-exit catch-all. Only the phrase tables differ per provider.
pub struct ErrorClassifier {
    /// Phrases that identify an exhausted usage quota.
    quota_patterns: Vec<&'static str>,
    /// Phrases that identify a transient rate limit.
    rate_limit_patterns: Vec<&'static str>,
    /// Phrases that identify a missing or invalid login.
    auth_patterns: Vec<&'static str>,
    /// Generic limit wording checked last, so a quota message a provider
    /// phrases unusually is not misfiled as `OtherError`.
    limit_fallback_patterns: Vec<&'static str>,
}

impl ErrorClassifier {
    /// Creates the classifier for a provider's known output phrasing.
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Claude => Self {
                quota_patterns: vec![
                    "usage limit reached",
                    "claude.ai/settings/limits",
                    "you've reached your",
                    "monthly limit",
                ],
                rate_limit_patterns: vec![
                    "rate limit",
                    "too many requests",
                    "overloaded",
                    "429",
                ],
                auth_patterns: vec![
                    "not authenticated",
                    "authentication required",
                    "invalid api key",
                    "please run: claude login",
                    "log in to",
                    "unauthorized",
                    "401",
                ],
                limit_fallback_patterns: Self::generic_limit_patterns(),
            },
            Provider::Codex => Self {
                quota_patterns: vec![
                    "usage limit",
                    "quota",
                    "hit your limit",
                    "exhausted",
                ],
                rate_limit_patterns: vec!["rate limit", "too many requests", "429"],
                auth_patterns: vec![
                    "not authenticated",
                    "unauthorized",
                    "authentication",
                    "401",
                ],
                limit_fallback_patterns: Self::generic_limit_patterns(),
            },
        }
    }

    fn generic_limit_patterns() -> Vec<&'static str> {
        vec![
            "usage limit",
            "quota",
            "hit your limit",
            "limit reached",
            "billing period",
            "resets ",
        ]
    }

    /// Classifies one invocation.
    ///
    /// `exit_status` is the subprocess exit code when one exists; `None`
    /// means the invocation failed before producing one (spawn failure,
    /// timeout) or the adapter could not parse the output it expected.
    /// Returns `None` for success.
    pub fn classify(&self, output: &str, exit_status: Option<i32>) -> Option<ErrorClass> {
        let lower = output.to_lowercase();

        if self.matches_any(&lower, &self.quota_patterns) {
            return Some(ErrorClass::QuotaExhausted);
        }
        if self.matches_any(&lower, &self.rate_limit_patterns) {
            return Some(ErrorClass::TransientRateLimit);
        }
        if self.matches_any(&lower, &self.auth_patterns) {
            return Some(ErrorClass::AuthRequired);
        }
        if exit_status == Some(0) {
            return None;
        }
        if self.matches_any(&lower, &self.limit_fallback_patterns) {
            return Some(ErrorClass::QuotaExhausted);
        }
        Some(ErrorClass::OtherError)
    }

    /// Checks if the lowercased output contains any of the patterns.
    fn matches_any(&self, lower: &str, patterns: &[&str]) -> bool {
        patterns.iter().any(|p| lower.contains(p))
    }
}
