//! Layered configuration for switchboard.
//!
//! Three layers, later wins per key: built-in defaults, the user file at
//! `~/.config/switchboard/config.toml`, and the repository file at
//! `<repo>/.switchboard/config.toml`. Tables merge key-by-key; a malformed
//! layer is skipped with a warning, never fatal.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::state::STATE_DIR;

/// When the router may switch providers without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchPolicy {
    /// Prompt on a TTY; decline when not interactive.
    #[default]
    Ask,
    /// Switch silently.
    Yes,
    /// Never switch.
    No,
}

impl FromStr for SwitchPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ask" => Ok(SwitchPolicy::Ask),
            "yes" => Ok(SwitchPolicy::Yes),
            "no" => Ok(SwitchPolicy::No),
            other => Err(format!("unknown switch policy: {other} (use ask|yes|no)")),
        }
    }
}

/// Options passed through to the claude CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaudeConfig {
    /// Each entry becomes `--allowedTools <tool>`.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Optional `--model` override.
    #[serde(default)]
    pub model: Option<String>,
}

/// Options passed through to the codex CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexConfig {
    /// Sandbox mode for `codex exec`.
    #[serde(default = "default_sandbox")]
    pub sandbox: String,
    /// Optional `--model` override.
    #[serde(default)]
    pub model: Option<String>,
    /// Accepted for forward compatibility; not currently mapped to a flag.
    #[serde(default)]
    pub approvals: Option<String>,
}

fn default_sandbox() -> String {
    "read-only".to_string()
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            sandbox: default_sandbox(),
            model: None,
            approvals: None,
        }
    }
}

/// Retry and cooldown timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries of a transient error on one provider within one turn.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry wait, in seconds; doubles per attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    /// Upper bound on a single retry wait, in seconds.
    #[serde(default = "default_backoff_max")]
    pub backoff_max: f64,
    /// Quota cooldown when the provider gave no reset time.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
    /// Cooldown after transient retries are exhausted.
    #[serde(default = "default_transient_cooldown_minutes")]
    pub transient_cooldown_minutes: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_backoff_max() -> f64 {
    30.0
}

fn default_cooldown_minutes() -> u64 {
    60
}

fn default_transient_cooldown_minutes() -> u64 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            cooldown_minutes: default_cooldown_minutes(),
            transient_cooldown_minutes: default_transient_cooldown_minutes(),
        }
    }
}

/// Size caps on injected handoff material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Full git diff is truncated beyond this many lines.
    #[serde(default = "default_max_diff_lines")]
    pub max_diff_lines: usize,
    /// Full git diff is truncated beyond this many bytes.
    #[serde(default = "default_max_diff_bytes")]
    pub max_diff_bytes: usize,
    /// Rolling summary document line cap.
    #[serde(default = "default_max_handoff_lines")]
    pub max_handoff_lines: usize,
}

fn default_max_diff_lines() -> usize {
    200
}

fn default_max_diff_bytes() -> usize {
    8000
}

fn default_max_handoff_lines() -> usize {
    350
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_diff_lines: default_max_diff_lines(),
            max_diff_bytes: default_max_diff_bytes(),
            max_handoff_lines: default_max_handoff_lines(),
        }
    }
}

/// Failover confirmation behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchConfig {
    #[serde(default)]
    pub confirmation: SwitchPolicy,
}

/// Top-level switchboard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    /// Provider preference order; unknown names are ignored.
    #[serde(default = "default_provider_order")]
    pub provider_order: Vec<String>,
    #[serde(default)]
    pub claude: ClaudeConfig,
    #[serde(default)]
    pub codex: CodexConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub switch: SwitchConfig,
}

fn default_provider_order() -> Vec<String> {
    vec!["claude".to_string(), "codex".to_string()]
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            provider_order: default_provider_order(),
            claude: ClaudeConfig::default(),
            codex: CodexConfig::default(),
            retry: RetryConfig::default(),
            limits: LimitsConfig::default(),
            switch: SwitchConfig::default(),
        }
    }
}

impl SwitchboardConfig {
    /// Effective preference order, unknown and duplicate names dropped.
    pub fn ordered_providers(&self) -> Vec<Provider> {
        let mut providers = Vec::new();
        for name in &self.provider_order {
            match name.parse::<Provider>() {
                Ok(p) => {
                    if !providers.contains(&p) {
                        providers.push(p);
                    }
                }
                Err(_) => {
                    tracing::warn!(provider = %name, "ignoring unknown provider in provider_order");
                }
            }
        }
        providers
    }

    /// Rotates the order so `preferred` comes first. Process-local only;
    /// never written back to a config file.
    pub fn prefer(&mut self, preferred: Provider) {
        let name = preferred.as_str();
        self.provider_order.retain(|n| n != name);
        self.provider_order.insert(0, name.to_string());
    }
}

/// Path of the user-level config file, when a config dir exists.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("switchboard").join("config.toml"))
}

/// Path of the repository-level config file.
pub fn repo_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(STATE_DIR).join("config.toml")
}

/// Loads the layered configuration for a repository.
pub fn load_config(repo_root: &Path) -> SwitchboardConfig {
    load_layers(&[user_config_path(), Some(repo_config_path(repo_root))])
}

fn load_layers(paths: &[Option<PathBuf>]) -> SwitchboardConfig {
    let mut merged: Option<toml::Value> = None;

    for path in paths.iter().flatten() {
        let Some(layer) = read_layer(path) else {
            continue;
        };
        merged = Some(match merged {
            Some(base) => merge_values(base, layer),
            None => layer,
        });
    }

    match merged {
        None => SwitchboardConfig::default(),
        Some(value) => value.try_into().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "configuration did not deserialize, using defaults");
            SwitchboardConfig::default()
        }),
    }
}

/// Parses one layer, or skips it if missing or malformed.
fn read_layer(path: &Path) -> Option<toml::Value> {
    let text = std::fs::read_to_string(path).ok()?;
    match text.parse::<toml::Value>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "skipping malformed config layer"
            );
            None
        }
    }
}

/// Deep merge: tables merge key-by-key, any other value is replaced.
fn merge_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for SwitchboardConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        for name in &self.provider_order {
            if name.parse::<Provider>().is_err() {
                result.add_warning(format!("unknown provider '{}' in provider_order", name));
            }
        }
        if self.ordered_providers().is_empty() {
            result.add_error("provider_order must name at least one of: claude, codex");
        }

        if self.retry.backoff_base <= 0.0 {
            result.add_error("backoff_base must be positive");
        }
        if self.retry.backoff_max < self.retry.backoff_base {
            result.add_warning("backoff_max below backoff_base caps every retry wait");
        }
        if self.retry.max_retries > 10 {
            result.add_warning("max_retries > 10 will stall a long time on a rate-limited provider");
        }
        if self.retry.cooldown_minutes == 0 {
            result.add_warning("cooldown_minutes = 0 re-selects a quota-exhausted provider immediately");
        }
        // One year, the longest cooldown actually applied.
        const MINUTES_PER_YEAR: u64 = 525_600;
        if self.retry.cooldown_minutes > MINUTES_PER_YEAR {
            result.add_warning("cooldown_minutes exceeds a year and will be capped");
        }
        if self.retry.transient_cooldown_minutes > MINUTES_PER_YEAR {
            result.add_warning("transient_cooldown_minutes exceeds a year and will be capped");
        }

        if self.limits.max_handoff_lines < 20 {
            result.add_warning("max_handoff_lines < 20 leaves little room for a useful handoff");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switchboard_config_has_sensible_defaults() {
        let config = SwitchboardConfig::default();

        assert_eq!(config.provider_order, vec!["claude", "codex"]);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_base, 2.0);
        assert_eq!(config.retry.backoff_max, 30.0);
        assert_eq!(config.retry.cooldown_minutes, 60);
        assert_eq!(config.retry.transient_cooldown_minutes, 5);
        assert_eq!(config.limits.max_diff_lines, 200);
        assert_eq!(config.limits.max_diff_bytes, 8000);
        assert_eq!(config.limits.max_handoff_lines, 350);
        assert_eq!(config.codex.sandbox, "read-only");
        assert_eq!(config.switch.confirmation, SwitchPolicy::Ask);
        assert!(config.claude.allowed_tools.is_empty());
    }

    #[test]
    fn switch_policy_serializes_correctly() {
        assert_eq!(serde_json::to_string(&SwitchPolicy::Ask).unwrap(), "\"ask\"");
        assert_eq!(serde_json::to_string(&SwitchPolicy::Yes).unwrap(), "\"yes\"");
        assert_eq!(serde_json::to_string(&SwitchPolicy::No).unwrap(), "\"no\"");
        assert_eq!("YES".parse::<SwitchPolicy>(), Ok(SwitchPolicy::Yes));
        assert!("maybe".parse::<SwitchPolicy>().is_err());
    }

    #[test]
    fn config_deserializes_partial_toml() {
        let toml = r#"
            provider_order = ["codex"]

            [retry]
            max_retries = 5

            [codex]
            model = "o4-mini"
        "#;

        let config: SwitchboardConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.provider_order, vec!["codex"]);
        assert_eq!(config.retry.max_retries, 5);
        // Untouched keys keep their defaults.
        assert_eq!(config.retry.cooldown_minutes, 60);
        assert_eq!(config.codex.model.as_deref(), Some("o4-mini"));
        assert_eq!(config.codex.sandbox, "read-only");
    }

    #[test]
    fn ordered_providers_ignores_unknown_and_duplicate_names() {
        let config = SwitchboardConfig {
            provider_order: vec![
                "gpt5".to_string(),
                "codex".to_string(),
                "claude".to_string(),
                "codex".to_string(),
            ],
            ..Default::default()
        };

        assert_eq!(
            config.ordered_providers(),
            vec![Provider::Codex, Provider::Claude]
        );
    }

    #[test]
    fn prefer_moves_provider_to_front() {
        let mut config = SwitchboardConfig::default();
        config.prefer(Provider::Codex);

        assert_eq!(config.provider_order, vec!["codex", "claude"]);

        // Preferring the current head is a no-op.
        config.prefer(Provider::Codex);
        assert_eq!(config.provider_order, vec!["codex", "claude"]);
    }

    #[test]
    fn merge_overlays_nested_tables_per_key() {
        let base: toml::Value = r#"
            provider_order = ["claude", "codex"]
            [retry]
            max_retries = 3
            cooldown_minutes = 60
        "#
        .parse()
        .unwrap();
        let overlay: toml::Value = r#"
            [retry]
            max_retries = 7
        "#
        .parse()
        .unwrap();

        let merged: SwitchboardConfig = merge_values(base, overlay).try_into().unwrap();
        assert_eq!(merged.retry.max_retries, 7);
        assert_eq!(merged.retry.cooldown_minutes, 60);
        assert_eq!(merged.provider_order, vec!["claude", "codex"]);
    }

    #[test]
    fn load_layers_applies_repo_over_user() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let repo = dir.path().join("repo.toml");
        std::fs::write(&user, "[retry]\nmax_retries = 9\ncooldown_minutes = 10\n").unwrap();
        std::fs::write(&repo, "[retry]\nmax_retries = 2\n").unwrap();

        let config = load_layers(&[Some(user), Some(repo)]);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.cooldown_minutes, 10);
    }

    #[test]
    fn load_layers_skips_malformed_layer() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let repo = dir.path().join("repo.toml");
        std::fs::write(&user, "[limits]\nmax_diff_lines = 50\n").unwrap();
        std::fs::write(&repo, "this is [not valid toml\n").unwrap();

        let config = load_layers(&[Some(user), Some(repo)]);
        assert_eq!(config.limits.max_diff_lines, 50);
    }

    #[test]
    fn load_layers_without_files_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_layers(&[Some(dir.path().join("missing.toml")), None]);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn validate_rejects_empty_provider_order() {
        let config = SwitchboardConfig {
            provider_order: vec!["mystery".to_string()],
            ..Default::default()
        };

        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("mystery")));
    }

    #[test]
    fn validate_warns_on_zero_cooldown() {
        let config = SwitchboardConfig {
            retry: RetryConfig {
                cooldown_minutes: 0,
                ..Default::default()
            },
            ..Default::default()
        };

        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("cooldown_minutes")));
    }

    #[test]
    fn validate_warns_on_multi_year_cooldowns() {
        let config = SwitchboardConfig {
            retry: RetryConfig {
                cooldown_minutes: u64::MAX,
                transient_cooldown_minutes: 600_000,
                ..Default::default()
            },
            ..Default::default()
        };

        let result = config.validate();
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.starts_with("cooldown_minutes exceeds")));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.starts_with("transient_cooldown_minutes exceeds")));
    }

    #[test]
    fn validate_default_config_is_clean() {
        let result = SwitchboardConfig::default().validate();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }
}
