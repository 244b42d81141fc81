//! Switchboard - automatic failover between CLI coding assistants
//!
//! This library routes conversational turns to whichever provider CLI is
//! currently usable, classifies failures from captured output, applies
//! cooldowns and retries, and carries session context across a provider
//! switch so the conversation continues without repetition.

pub mod classify;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod handoff;
pub mod provider;
pub mod router;
pub mod state;
pub mod transcript;
pub mod turn;
pub mod wrappers;

pub use error::{Error, Result};

pub use classify::{ErrorClass, ErrorClassifier};
pub use cooldown::{quota_cooldown, transient_cooldown, CooldownDecision, CooldownSource};
pub use provider::{
    default_adapters, Provider, ProviderAdapter, TurnRequest, TurnResult, INVOCATION_TIMEOUT,
};
pub use router::{
    available_providers, backoff_delay, provider_cooldowns, AutoApprove, Router, SwitchDecision,
    SwitchRecord, TurnObserver, TurnOutcome,
};

pub use config::{
    load_config, repo_config_path, user_config_path, ClaudeConfig, CodexConfig, LimitsConfig,
    RetryConfig, SwitchConfig, SwitchPolicy, SwitchboardConfig, Validate, ValidationResult,
};
pub use handoff::{build_failover_prompt, repo_snapshot, update_summary};
pub use state::{
    ActiveTurnMarker, ProviderState, RouterState, RunMode, StateStore, STATE_DIR,
};
pub use transcript::TurnRecord;
pub use turn::execute_turn;
pub use wrappers::{
    default_wrapper_dir, exec_provider, find_real_binary, install_wrappers, is_wrapper,
    plan_launch, real_binary_for, remove_wrappers, LaunchPlan, RemovalReport,
};
