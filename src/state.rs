//! Persistent router state under `.switchboard/`.
//!
//! One directory per repository, created on first use. `state.json` holds
//! the cross-turn routing state, `handoff.md` the rolling summary,
//! `active-turn.json` marks an in-flight turn, and `transcript.ndjson` is
//! the append-only turn log. Loads are forgiving (missing or corrupt files
//! fall back to defaults); saves go through a temp-file-then-rename so a
//! crash never leaves a half-written state file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cooldown::{CooldownDecision, CooldownSource};
use crate::error::{Error, Result};
use crate::provider::{Provider, TurnResult};
use crate::transcript::TurnRecord;

/// Directory name, relative to the repository root.
pub const STATE_DIR: &str = ".switchboard";

const STATE_FILE: &str = "state.json";
const HANDOFF_FILE: &str = "handoff.md";
const ACTIVE_TURN_FILE: &str = "active-turn.json";
const TRANSCRIPT_FILE: &str = "transcript.ndjson";

/// Per-provider runtime state tracked across turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderState {
    /// Session/thread id from the last successful turn, used for resumption.
    pub session_id: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
    /// If set, the provider is not selectable until this UTC instant.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub cooldown_started_at: Option<DateTime<Utc>>,
    /// Which rule set the cooldown. Present whenever `cooldown_until` is.
    pub cooldown_source: Option<CooldownSource>,
    pub cooldown_reason: Option<String>,
    /// Bounded excerpt of the provider error the cooldown was derived from.
    pub cooldown_message_excerpt: Option<String>,
    /// Consecutive failed turns; zeroed on success.
    pub consecutive_errors: u32,
}

impl ProviderState {
    /// A provider is available iff it has no cooldown or the cooldown has
    /// already expired.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.cooldown_until {
            Some(until) => until <= now,
            None => true,
        }
    }

    pub fn apply_cooldown(&mut self, decision: &CooldownDecision, now: DateTime<Utc>) {
        self.cooldown_until = Some(decision.until);
        self.cooldown_started_at = Some(now);
        self.cooldown_source = Some(decision.source);
        self.cooldown_reason = Some(decision.reason.to_string());
        self.cooldown_message_excerpt = decision.message_excerpt.clone();
    }

    pub fn clear_cooldown(&mut self) {
        self.cooldown_until = None;
        self.cooldown_started_at = None;
        self.cooldown_source = None;
        self.cooldown_reason = None;
        self.cooldown_message_excerpt = None;
    }
}

/// Root state object serialized to `.switchboard/state.json`.
///
/// One file per repository. Mutated only after a turn reaches a terminal
/// outcome, never speculatively mid-turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterState {
    pub last_provider: Option<Provider>,
    pub claude: ProviderState,
    pub codex: ProviderState,
    /// Completed successful turns across the lifetime of this state file.
    pub total_turns: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for RouterState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            last_provider: None,
            claude: ProviderState::default(),
            codex: ProviderState::default(),
            total_turns: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl RouterState {
    pub fn provider(&self, provider: Provider) -> &ProviderState {
        match provider {
            Provider::Claude => &self.claude,
            Provider::Codex => &self.codex,
        }
    }

    pub fn provider_mut(&mut self, provider: Provider) -> &mut ProviderState {
        match provider {
            Provider::Claude => &mut self.claude,
            Provider::Codex => &mut self.codex,
        }
    }

    /// Books a successful turn: stores the session id (keeping the previous
    /// one if the provider returned none), stamps `last_used`, zeroes the
    /// error streak, lifts any cooldown, and advances the turn counter.
    pub fn record_success(&mut self, provider: Provider, result: &TurnResult, now: DateTime<Utc>) {
        let ps = self.provider_mut(provider);
        if let Some(session_id) = &result.session_id {
            ps.session_id = Some(session_id.clone());
        }
        ps.last_used = Some(now);
        ps.consecutive_errors = 0;
        ps.clear_cooldown();
        self.last_provider = Some(provider);
        self.total_turns += 1;
    }
}

/// How the current process is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Chat,
    Ask,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Chat => "chat",
            RunMode::Ask => "ask",
        }
    }
}

/// Ephemeral marker for an in-flight turn.
///
/// Written before the first provider attempt and removed when the turn
/// completes. If it survives the process, the previous run was interrupted;
/// `status --active` surfaces it for diagnostics. Never auto-resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTurnMarker {
    pub turn_id: Uuid,
    pub pid: u32,
    pub mode: RunMode,
    /// Updated as the router moves between providers.
    pub provider: Option<Provider>,
    pub started_at: DateTime<Utc>,
    pub prompt_excerpt: String,
}

impl ActiveTurnMarker {
    pub fn new(mode: RunMode, prompt: &str) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            pid: std::process::id(),
            mode,
            provider: None,
            started_at: Utc::now(),
            prompt_excerpt: prompt_excerpt(prompt),
        }
    }
}

/// Single-line prompt preview for the marker and status output.
fn prompt_excerpt(prompt: &str) -> String {
    let normalized = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= 160 {
        return normalized;
    }
    let mut cut: String = normalized.chars().take(160).collect();
    cut.push_str("...");
    cut
}

/// Owns every file under the repository's `.switchboard/` directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            dir: repo_root.into().join(STATE_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.exists()
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::State {
            path: self.dir.clone(),
            reason: format!("failed to create state directory: {}", e),
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Writes `contents` to a sibling temp file, then renames it over the
    /// target. A crash mid-write leaves the previous file intact.
    fn write_atomic(&self, name: &str, contents: &str) -> Result<()> {
        self.ensure_dir()?;
        let target = self.path(name);
        let tmp = self.path(&format!("{}.tmp", name));
        fs::write(&tmp, contents).map_err(|e| Error::State {
            path: tmp.clone(),
            reason: format!("failed to write: {}", e),
        })?;
        fs::rename(&tmp, &target).map_err(|e| Error::State {
            path: target.clone(),
            reason: format!("failed to replace: {}", e),
        })
    }

    /// Loads `state.json`, falling back to a fresh default when the file is
    /// missing or unreadable. Corruption is logged, never fatal.
    pub fn load_state(&self) -> RouterState {
        let path = self.path(STATE_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return RouterState::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "state file unreadable, starting from defaults"
                );
                RouterState::default()
            }
        }
    }

    /// Persists the state, stamping `updated_at`.
    pub fn save_state(&self, state: &mut RouterState) -> Result<()> {
        state.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(state).map_err(|e| Error::State {
            path: self.path(STATE_FILE),
            reason: format!("failed to serialize state: {}", e),
        })?;
        self.write_atomic(STATE_FILE, &json)
    }

    /// Contents of the rolling summary, or `None` before the first turn.
    pub fn load_handoff(&self) -> Option<String> {
        fs::read_to_string(self.path(HANDOFF_FILE)).ok()
    }

    /// Overwrites the rolling summary. The document is rebuilt every turn,
    /// never appended to.
    pub fn save_handoff(&self, content: &str) -> Result<()> {
        self.write_atomic(HANDOFF_FILE, content)
    }

    pub fn save_active_turn(&self, marker: &ActiveTurnMarker) -> Result<()> {
        let json = serde_json::to_string_pretty(marker).map_err(|e| Error::State {
            path: self.path(ACTIVE_TURN_FILE),
            reason: format!("failed to serialize active turn: {}", e),
        })?;
        self.write_atomic(ACTIVE_TURN_FILE, &json)
    }

    pub fn load_active_turn(&self) -> Option<ActiveTurnMarker> {
        let raw = fs::read_to_string(self.path(ACTIVE_TURN_FILE)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn clear_active_turn(&self) -> Result<()> {
        match fs::remove_file(self.path(ACTIVE_TURN_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::State {
                path: self.path(ACTIVE_TURN_FILE),
                reason: format!("failed to remove: {}", e),
            }),
        }
    }

    /// Appends one record to `transcript.ndjson`. The transcript is
    /// append-only and never truncated.
    pub fn append_transcript(&self, record: &TurnRecord) -> Result<()> {
        self.ensure_dir()?;
        let path = self.path(TRANSCRIPT_FILE);
        let line = serde_json::to_string(record).map_err(|e| Error::State {
            path: path.clone(),
            reason: format!("failed to serialize transcript record: {}", e),
        })?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::State {
                path: path.clone(),
                reason: format!("failed to open: {}", e),
            })?;
        writeln!(file, "{}", line).map_err(|e| Error::State {
            path,
            reason: format!("failed to append: {}", e),
        })
    }

    /// Deletes the whole `.switchboard/` directory. Idempotent; a missing
    /// directory is not an error.
    pub fn reset(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::State {
                path: self.dir.clone(),
                reason: format!("failed to remove: {}", e),
            }),
        }
    }
}
