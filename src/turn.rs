//! One persisted turn, end to end.
//!
//! Wraps [`Router::run_turn`] with the on-disk bookkeeping a driving CLI
//! needs: the active-turn marker, the state file, the transcript line, and
//! the rolling handoff summary. The driving binary only renders the
//! returned outcome.

use std::sync::Mutex;

use crate::config::SwitchboardConfig;
use crate::error::Result;
use crate::handoff::update_summary;
use crate::provider::{Provider, TurnResult};
use crate::router::{Router, SwitchRecord, TurnObserver, TurnOutcome};
use crate::state::{ActiveTurnMarker, RouterState, RunMode, StateStore};
use crate::transcript::TurnRecord;

/// Runs one routed turn and persists every durable effect.
///
/// The active-turn marker is written before the first provider attempt and
/// refreshed as the router moves between providers; it is removed once the
/// turn reaches a terminal outcome, so an interrupted process leaves it
/// behind for `status --active`. State is saved exactly once, after the
/// outcome is known. Every Success and Failed outcome appends one
/// transcript line; the handoff summary is rewritten only on success.
pub async fn execute_turn(
    router: &Router,
    store: &StateStore,
    config: &SwitchboardConfig,
    user_prompt: &str,
    mode: RunMode,
    observer: &dyn TurnObserver,
) -> Result<TurnOutcome> {
    let mut state = store.load_state();
    let handoff_content = store.load_handoff();

    let marker = ActiveTurnMarker::new(mode, user_prompt);
    store.save_active_turn(&marker)?;

    let tracked = MarkerObserver {
        store,
        marker: Mutex::new(marker),
        inner: observer,
    };
    let outcome = router
        .run_turn(
            user_prompt,
            &mut state,
            config,
            handoff_content.as_deref(),
            &tracked,
        )
        .await;

    store.clear_active_turn()?;
    store.save_state(&mut state)?;
    persist_outcome(
        store,
        &state,
        config,
        user_prompt,
        handoff_content.as_deref(),
        &outcome,
    )?;
    Ok(outcome)
}

fn persist_outcome(
    store: &StateStore,
    state: &RouterState,
    config: &SwitchboardConfig,
    user_prompt: &str,
    previous_handoff: Option<&str>,
    outcome: &TurnOutcome,
) -> Result<()> {
    match outcome {
        TurnOutcome::Success {
            provider,
            result,
            switch,
        } => {
            let text = result.text.as_deref().unwrap_or_default();
            let summary =
                update_summary(previous_handoff, user_prompt, text, *provider, &config.limits);
            store.save_handoff(&summary)?;

            let mut record = TurnRecord::success(user_prompt, result);
            let ps = state.provider(*provider);
            if record.session_id.is_none() {
                record.session_id = ps.session_id.clone();
            }
            apply_switch(&mut record, *switch);
            store.append_transcript(&record)
        }
        TurnOutcome::Failed {
            provider,
            result,
            switch,
        } => {
            let mut record = TurnRecord::failure(user_prompt, result);
            let ps = state.provider(*provider);
            if record.session_id.is_none() {
                record.session_id = ps.session_id.clone();
            }
            record.cooldown_until = ps.cooldown_until;
            record.cooldown_source = ps.cooldown_source;
            record.cooldown_reason = ps.cooldown_reason.clone();
            apply_switch(&mut record, *switch);
            store.append_transcript(&record)
        }
        // Nothing ran, so there is nothing to log.
        TurnOutcome::AllUnavailable { .. } => Ok(()),
    }
}

fn apply_switch(record: &mut TurnRecord, switch: Option<SwitchRecord>) {
    if let Some(switch) = switch {
        record.switch_from = Some(switch.from);
        record.switch_to = Some(switch.to);
        record.switch_decision = Some(switch.decision);
    }
}

/// Mirrors each provider attempt into the persisted marker, then delegates
/// to the caller's observer for interactive decisions.
struct MarkerObserver<'a> {
    store: &'a StateStore,
    marker: Mutex<ActiveTurnMarker>,
    inner: &'a dyn TurnObserver,
}

impl TurnObserver for MarkerObserver<'_> {
    fn on_provider_start(&self, provider: Provider) {
        if let Ok(mut marker) = self.marker.lock() {
            marker.provider = Some(provider);
            if let Err(error) = self.store.save_active_turn(&marker) {
                tracing::warn!(%error, "failed to update active-turn marker");
            }
        }
        self.inner.on_provider_start(provider);
    }

    fn confirm_switch(&self, from: Provider, to: Provider, failed: &TurnResult) -> bool {
        self.inner.confirm_switch(from, to, failed)
    }
}
