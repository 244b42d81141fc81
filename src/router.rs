//! Turn routing: provider selection, retry with backoff, cooldown
//! bookkeeping, and failover with context handoff.
//!
//! One call to [`Router::run_turn`] drives a single user turn through the
//! per-turn state machine: select the first available provider, invoke it
//! (retrying transient rate limits with exponential backoff), and on a
//! quota or exhausted-retry failure mark the provider cooled down and fail
//! over to the next candidate with a fresh session and handoff context.
//! Auth and unclassified errors stop the turn immediately.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ErrorClass;
use crate::config::SwitchboardConfig;
use crate::cooldown::{quota_cooldown, transient_cooldown};
use crate::handoff::{build_failover_prompt, repo_snapshot};
use crate::provider::{default_adapters, Provider, ProviderAdapter, TurnRequest, TurnResult};
use crate::state::RouterState;

/// Callbacks the driving CLI supplies for interactive decisions.
///
/// Both hooks have no-op defaults so non-interactive callers (and tests)
/// can pass [`AutoApprove`].
pub trait TurnObserver {
    /// Called just before each provider attempt starts.
    fn on_provider_start(&self, _provider: Provider) {}

    /// Asked before failing over from `_from` to `_to`. Returning `false`
    /// stops the turn with the failed result instead of switching.
    fn confirm_switch(&self, _from: Provider, _to: Provider, _failed: &TurnResult) -> bool {
        true
    }
}

/// Observer that silently approves every switch.
pub struct AutoApprove;

impl TurnObserver for AutoApprove {}

/// Whether a proposed failover was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchDecision {
    Approved,
    Denied,
}

/// A failover that was proposed during a turn, for the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchRecord {
    pub from: Provider,
    pub to: Provider,
    pub decision: SwitchDecision,
}

/// Terminal result of one routed turn.
#[derive(Debug)]
pub enum TurnOutcome {
    /// A provider produced output.
    Success {
        provider: Provider,
        result: TurnResult,
        switch: Option<SwitchRecord>,
    },
    /// A provider failed and no further failover was possible or allowed.
    Failed {
        provider: Provider,
        result: TurnResult,
        switch: Option<SwitchRecord>,
    },
    /// Every configured provider is cooling down, either at entry or after
    /// all of them failed this turn. Lists each provider's expiry.
    AllUnavailable {
        cooldowns: Vec<(Provider, Option<DateTime<Utc>>)>,
    },
}

/// Configured providers that are not cooling down, in preference order.
pub fn available_providers(
    state: &RouterState,
    config: &SwitchboardConfig,
    now: DateTime<Utc>,
) -> Vec<Provider> {
    config
        .ordered_providers()
        .into_iter()
        .filter(|p| state.provider(*p).is_available(now))
        .collect()
}

/// Each configured provider with its cooldown expiry, for the
/// all-unavailable report and `status` output.
pub fn provider_cooldowns(
    state: &RouterState,
    config: &SwitchboardConfig,
) -> Vec<(Provider, Option<DateTime<Utc>>)> {
    config
        .ordered_providers()
        .into_iter()
        .map(|p| (p, state.provider(p).cooldown_until))
        .collect()
}

/// Seconds to wait before the `attempt`-th retry (0-based):
/// `min(backoff_base * 2^attempt, backoff_max)`.
pub fn backoff_delay(base: f64, attempt: u32, max: f64) -> f64 {
    (base * 2f64.powi(attempt as i32)).min(max).max(0.0)
}

/// Routes turns across the configured provider adapters.
pub struct Router {
    adapters: Vec<Box<dyn ProviderAdapter>>,
    repo_root: PathBuf,
}

impl Router {
    /// Router over the real `claude` and `codex` CLI adapters.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            adapters: default_adapters(),
            repo_root: repo_root.into(),
        }
    }

    /// Replaces the CLI adapters; tests use this to inject scripted fakes.
    pub fn with_adapters(
        repo_root: impl Into<PathBuf>,
        adapters: Vec<Box<dyn ProviderAdapter>>,
    ) -> Self {
        Self {
            adapters,
            repo_root: repo_root.into(),
        }
    }

    fn adapter_for(&self, provider: Provider) -> Option<&dyn ProviderAdapter> {
        self.adapters
            .iter()
            .find(|a| a.provider() == provider)
            .map(|a| a.as_ref())
    }

    /// Runs one user turn to a terminal outcome.
    ///
    /// `state` is mutated in place (cooldowns, session ids, counters) but
    /// not persisted here; the caller saves it once the outcome is known.
    /// `handoff_content` is the current rolling summary, injected only when
    /// a failover actually happens.
    pub async fn run_turn(
        &self,
        user_prompt: &str,
        state: &mut RouterState,
        config: &SwitchboardConfig,
        handoff_content: Option<&str>,
        observer: &dyn TurnObserver,
    ) -> TurnOutcome {
        // Availability is snapshotted once per turn: a cooldown expiring
        // mid-turn does not bring its provider back until the next turn.
        let now = Utc::now();
        let candidates = available_providers(state, config, now);
        let Some(&first) = candidates.first() else {
            tracing::warn!("all providers are in cooldown");
            return TurnOutcome::AllUnavailable {
                cooldowns: provider_cooldowns(state, config),
            };
        };

        let mut provider = first;
        let mut attempted: Vec<Provider> = Vec::new();
        let mut switch: Option<SwitchRecord> = None;
        // Present once a failover has been approved; its presence also
        // means the next invocation must start a fresh session.
        let mut failover_prompt: Option<String> = None;

        loop {
            observer.on_provider_start(provider);

            let session_id = if failover_prompt.is_some() {
                None
            } else {
                state.provider(provider).session_id.clone()
            };
            let prompt = failover_prompt
                .clone()
                .unwrap_or_else(|| user_prompt.to_string());
            let request = TurnRequest::new(prompt, session_id);

            tracing::info!(
                provider = %provider,
                resuming = request.session_id.is_some(),
                failover = failover_prompt.is_some(),
                "invoking provider"
            );

            let result = match self.adapter_for(provider) {
                Some(adapter) => self.invoke_with_retry(adapter, &request, config).await,
                None => TurnResult::failed(
                    provider,
                    ErrorClass::OtherError,
                    format!("no adapter registered for {}", provider),
                    String::new(),
                ),
            };

            if result.success {
                state.record_success(provider, &result, Utc::now());
                tracing::info!(
                    provider = %provider,
                    total_turns = state.total_turns,
                    "turn succeeded"
                );
                return TurnOutcome::Success {
                    provider,
                    result,
                    switch,
                };
            }

            state.provider_mut(provider).consecutive_errors += 1;
            let failed_at = Utc::now();
            match result.error_class {
                Some(ErrorClass::QuotaExhausted) => {
                    let decision = quota_cooldown(
                        result.error_message.as_deref(),
                        failed_at,
                        config.retry.cooldown_minutes,
                    );
                    tracing::warn!(
                        provider = %provider,
                        until = %decision.until,
                        source = ?decision.source,
                        "quota exhausted, provider entering cooldown"
                    );
                    state.provider_mut(provider).apply_cooldown(&decision, failed_at);
                }
                Some(ErrorClass::TransientRateLimit) => {
                    let decision = transient_cooldown(
                        result.error_message.as_deref(),
                        failed_at,
                        config.retry.transient_cooldown_minutes,
                    );
                    tracing::warn!(
                        provider = %provider,
                        until = %decision.until,
                        "retries exhausted, provider entering cooldown"
                    );
                    state.provider_mut(provider).apply_cooldown(&decision, failed_at);
                }
                _ => {
                    // Auth and unclassified errors are not time-bound: no
                    // cooldown, and no other provider is tried.
                    tracing::error!(
                        provider = %provider,
                        class = ?result.error_class,
                        "provider failed, stopping turn"
                    );
                    return TurnOutcome::Failed {
                        provider,
                        result,
                        switch,
                    };
                }
            }

            attempted.push(provider);
            let next = candidates.iter().copied().find(|p| !attempted.contains(p));
            let Some(next_provider) = next else {
                tracing::warn!("every available provider failed this turn");
                return TurnOutcome::AllUnavailable {
                    cooldowns: provider_cooldowns(state, config),
                };
            };

            if !observer.confirm_switch(provider, next_provider, &result) {
                switch = Some(SwitchRecord {
                    from: provider,
                    to: next_provider,
                    decision: SwitchDecision::Denied,
                });
                tracing::info!(
                    from = %provider,
                    to = %next_provider,
                    "switch declined, stopping turn"
                );
                return TurnOutcome::Failed {
                    provider,
                    result,
                    switch,
                };
            }
            switch = Some(SwitchRecord {
                from: provider,
                to: next_provider,
                decision: SwitchDecision::Approved,
            });

            // The receiving provider starts a fresh session with handoff
            // context prepended; its old session id is never reused.
            let snapshot = repo_snapshot(&self.repo_root, &config.limits);
            failover_prompt = Some(build_failover_prompt(
                user_prompt,
                handoff_content,
                &snapshot,
            ));
            tracing::info!(from = %provider, to = %next_provider, "failing over");
            provider = next_provider;
        }
    }

    /// Invokes one provider, retrying transient rate limits up to
    /// `max_retries` times with exponential backoff. Any other result is
    /// returned as-is.
    async fn invoke_with_retry(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &TurnRequest,
        config: &SwitchboardConfig,
    ) -> TurnResult {
        let retry = &config.retry;
        let mut attempt: u32 = 0;
        loop {
            let result = adapter.invoke(request, config).await;
            if result.success {
                return result;
            }
            let transient = result.error_class == Some(ErrorClass::TransientRateLimit);
            if transient && attempt < retry.max_retries {
                let delay = backoff_delay(retry.backoff_base, attempt, retry.backoff_max);
                tracing::warn!(
                    provider = %result.provider,
                    attempt = attempt,
                    delay_secs = delay,
                    "transient rate limit, backing off before retry"
                );
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                attempt += 1;
                continue;
            }
            return result;
        }
    }
}
