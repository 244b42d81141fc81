//! Scripted provider fixtures shared by the integration suites.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use switchboard::classify::ErrorClass;
use switchboard::config::SwitchboardConfig;
use switchboard::provider::{Provider, ProviderAdapter, TurnRequest, TurnResult};
use switchboard::router::Router;

/// Adapter that replays a fixed list of results and records every request.
/// Clones share the same script and call log, so a test keeps one handle
/// for assertions while the router owns another.
#[derive(Clone)]
pub struct ScriptedAdapter {
    provider: Provider,
    results: Arc<Mutex<VecDeque<TurnResult>>>,
    calls: Arc<Mutex<Vec<TurnRequest>>>,
}

impl ScriptedAdapter {
    pub fn new(provider: Provider, results: Vec<TurnResult>) -> Self {
        Self {
            provider,
            results: Arc::new(Mutex::new(results.into())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> TurnRequest {
        self.calls.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn invoke(&self, request: &TurnRequest, _config: &SwitchboardConfig) -> TurnResult {
        self.calls.lock().unwrap().push(request.clone());
        self.results.lock().unwrap().pop_front().unwrap_or_else(|| {
            TurnResult::failed(
                self.provider,
                ErrorClass::OtherError,
                "scripted adapter ran out of results",
                String::new(),
            )
        })
    }
}

pub fn ok(provider: Provider, text: &str, session: &str) -> TurnResult {
    TurnResult::succeeded(provider, text, Some(session.to_string()), String::new())
}

pub fn quota(provider: Provider, message: &str) -> TurnResult {
    TurnResult::failed(provider, ErrorClass::QuotaExhausted, message, message)
}

pub fn transient(provider: Provider) -> TurnResult {
    TurnResult::failed(
        provider,
        ErrorClass::TransientRateLimit,
        "rate limit reached",
        "",
    )
}

pub fn auth(provider: Provider) -> TurnResult {
    TurnResult::failed(provider, ErrorClass::AuthRequired, "Please run /login", "")
}

pub fn router_with(tmp: &TempDir, claude: &ScriptedAdapter, codex: &ScriptedAdapter) -> Router {
    Router::with_adapters(
        tmp.path(),
        vec![Box::new(claude.clone()), Box::new(codex.clone())],
    )
}
