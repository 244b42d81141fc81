//! Switchboard CLI
//!
//! Routes chat turns to whichever provider CLI (`claude`, `codex`) is
//! currently usable, with cooldowns, retries, and context handoff on
//! failover. `wrappers install` and `launch` provide a transparent mode
//! where shims on PATH route plain `claude`/`codex` invocations through
//! the same availability logic.

use std::ffi::OsString;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};

use switchboard::config::{load_config, SwitchPolicy, SwitchboardConfig, Validate};
use switchboard::provider::{Provider, TurnResult};
use switchboard::router::{available_providers, Router, TurnObserver, TurnOutcome};
use switchboard::state::{RunMode, StateStore};
use switchboard::wrappers::{
    default_wrapper_dir, exec_provider, install_wrappers, plan_launch, real_binary_for,
    remove_wrappers,
};
use switchboard::{execute_turn, Error, Result};

#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author, version, about = "Automatic failover between CLI coding assistants", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive loop; each prompt goes to the best available provider
    Chat {
        /// Try this provider first for this run (claude|codex)
        #[arg(long, value_name = "PROVIDER")]
        prefer_provider: Option<Provider>,
        /// Failover confirmation policy for this run (ask|yes|no)
        #[arg(long, value_name = "POLICY")]
        auto_switch: Option<SwitchPolicy>,
    },
    /// Send a single prompt and print the response
    Ask {
        /// Prompt text; multiple words are joined with spaces
        #[arg(required = true, value_name = "PROMPT")]
        prompt: Vec<String>,
        /// Try this provider first for this run (claude|codex)
        #[arg(long, value_name = "PROVIDER")]
        prefer_provider: Option<Provider>,
        /// Failover confirmation policy for this run (ask|yes|no)
        #[arg(long, value_name = "POLICY")]
        auto_switch: Option<SwitchPolicy>,
    },
    /// Exec the best available provider's own CLI (used by the shims)
    Launch {
        /// Try this provider first (claude|codex)
        #[arg(long, value_name = "PROVIDER")]
        prefer_provider: Option<Provider>,
        /// Arguments passed through to the launched provider CLI
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
        args: Vec<OsString>,
    },
    /// Show session, availability, and cooldown state per provider
    Status {
        /// Also show the active-turn marker, if one exists
        #[arg(long)]
        active: bool,
    },
    /// Manage the transparent provider shims
    Wrappers {
        #[command(subcommand)]
        action: WrapperCommand,
    },
    /// Delete all switchboard state for this repository
    Reset {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum WrapperCommand {
    /// Write claude/claudecode/codex shims into the wrapper directory
    Install {
        /// Shim directory (default: ~/.switchboard/bin)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Replace existing files even if they are not switchboard shims
        #[arg(long)]
        overwrite: bool,
    },
    /// Remove shims previously written by `wrappers install`
    Remove {
        /// Shim directory (default: ~/.switchboard/bin)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries only assistant output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("switchboard: {}", error);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Commands::Chat {
            prefer_provider,
            auto_switch,
        } => {
            let config = prepare_config(&repo_root, prefer_provider, auto_switch)?;
            install_interrupt_handler();
            chat(&repo_root, &config).await
        }
        Commands::Ask {
            prompt,
            prefer_provider,
            auto_switch,
        } => {
            let config = prepare_config(&repo_root, prefer_provider, auto_switch)?;
            let prompt = prompt.join(" ");
            let prompt = prompt.trim();
            if prompt.is_empty() {
                return Err(Error::Config("ask needs a non-empty prompt".to_string()));
            }
            install_interrupt_handler();
            let ok = run_single_turn(&repo_root, &config, prompt, RunMode::Ask).await?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Launch {
            prefer_provider,
            args,
        } => {
            let config = prepare_config(&repo_root, prefer_provider, None)?;
            launch(&repo_root, &config, args)
        }
        Commands::Status { active } => status(&repo_root, active),
        Commands::Wrappers { action } => match action {
            WrapperCommand::Install { dir, overwrite } => wrappers_install(dir, overwrite),
            WrapperCommand::Remove { dir } => wrappers_remove(dir),
        },
        Commands::Reset { yes } => reset(&repo_root, yes),
    }
}

/// Loads config, applies per-run CLI overrides, and reports validation.
fn prepare_config(
    repo_root: &Path,
    prefer: Option<Provider>,
    auto_switch: Option<SwitchPolicy>,
) -> Result<SwitchboardConfig> {
    let mut config = load_config(repo_root);
    if let Some(provider) = prefer {
        config.prefer(provider);
    }
    if let Some(policy) = auto_switch {
        config.switch.confirmation = policy;
    }
    let warnings = config.validate().into_result()?;
    for warning in warnings {
        tracing::warn!(%warning, "configuration");
    }
    Ok(config)
}

/// Ctrl-C aborts the turn in flight: the process exits without writing a
/// state update, and the active-turn marker stays behind so
/// `status --active` can surface the aborted turn.
fn install_interrupt_handler() {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            std::process::exit(130);
        }
    });
}

async fn chat(repo_root: &Path, config: &SwitchboardConfig) -> Result<()> {
    let order = config
        .ordered_providers()
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    println!("switchboard chat (providers: {}). Type 'exit' to quit.", order);

    loop {
        print!("\nyou> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit" | "/exit" | "/quit") {
            break;
        }
        if let Err(error) = run_single_turn(repo_root, config, input, RunMode::Chat).await {
            eprintln!("✗ {}", error);
        }
    }
    Ok(())
}

/// Drives one persisted turn and renders its outcome. Returns whether the
/// turn produced assistant output.
async fn run_single_turn(
    repo_root: &Path,
    config: &SwitchboardConfig,
    user_prompt: &str,
    mode: RunMode,
) -> Result<bool> {
    let store = StateStore::new(repo_root);
    let router = Router::new(repo_root);
    let observer = CliObserver {
        policy: config.switch.confirmation,
    };
    let outcome = execute_turn(&router, &store, config, user_prompt, mode, &observer).await?;
    Ok(report_outcome(outcome))
}

fn report_outcome(outcome: TurnOutcome) -> bool {
    match outcome {
        TurnOutcome::Success {
            provider, result, ..
        } => {
            println!("\n◆ {}\n", provider);
            println!("{}", result.text.unwrap_or_default());
            true
        }
        TurnOutcome::Failed {
            provider, result, ..
        } => {
            let class = result.error_class.map(|c| c.as_str()).unwrap_or("UNKNOWN");
            eprintln!(
                "\n✗ {} error [{}] {}",
                provider,
                class,
                result.error_message.as_deref().unwrap_or("unknown error"),
            );
            false
        }
        TurnOutcome::AllUnavailable { cooldowns } => {
            eprintln!("\n✗ All providers are in cooldown.");
            for (provider, until) in cooldowns {
                match until {
                    Some(until) => eprintln!(
                        "  {}: until {}",
                        provider,
                        until.format("%Y-%m-%d %H:%M UTC")
                    ),
                    None => eprintln!("  {}: no cooldown recorded", provider),
                }
            }
            eprintln!("Run 'switchboard status' for details.");
            false
        }
    }
}

/// Interactive observer applying the configured switch-confirmation policy.
struct CliObserver {
    policy: SwitchPolicy,
}

impl TurnObserver for CliObserver {
    fn confirm_switch(&self, from: Provider, to: Provider, failed: &TurnResult) -> bool {
        let class = failed.error_class.map(|c| c.as_str()).unwrap_or("ERROR");
        match self.policy {
            SwitchPolicy::Yes => {
                eprintln!("\n⚠ {} unavailable ({}); switching to {}", from, class, to);
                true
            }
            SwitchPolicy::No => {
                eprintln!(
                    "\n⚠ {} unavailable ({}); switching disabled (switch.confirmation = no)",
                    from, class
                );
                false
            }
            SwitchPolicy::Ask => {
                if !std::io::stdin().is_terminal() {
                    eprintln!(
                        "\n⚠ {} unavailable ({}); not a terminal, staying on {}",
                        from, class, from
                    );
                    return false;
                }
                eprint!(
                    "\n⚠ {} unavailable ({}). Switch to {} and continue there? [y/N] ",
                    from, class, to
                );
                let mut answer = String::new();
                if std::io::stdin().read_line(&mut answer).is_err() {
                    return false;
                }
                matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
            }
        }
    }
}

/// Replaces this process with the best available provider's own CLI.
/// Cooldown bookkeeping still applies; the native experience is otherwise
/// untouched.
fn launch(repo_root: &Path, config: &SwitchboardConfig, args: Vec<OsString>) -> Result<()> {
    let store = StateStore::new(repo_root);
    let state = store.load_state();
    let preferred = config.ordered_providers().first().copied();

    let candidates = available_providers(&state, config, Utc::now());
    if candidates.is_empty() {
        eprintln!("✗ All providers are in cooldown. Run 'switchboard status' for details.");
        std::process::exit(1);
    }

    let Some(plan) = plan_launch(&candidates, preferred, real_binary_for) else {
        return Err(Error::Wrapper(
            "could not locate a real claude or codex binary in PATH".to_string(),
        ));
    };
    if let Some(from) = plan.switched_from {
        eprintln!("switchboard: switched {} -> {}", from, plan.provider);
    }

    // exec only returns on failure.
    Err(exec_provider(&plan.binary, &args))
}

fn wrapper_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    dir.or_else(default_wrapper_dir).ok_or_else(|| {
        Error::Wrapper("cannot determine a home directory for the shims; pass --dir".to_string())
    })
}

fn wrappers_install(dir: Option<PathBuf>, overwrite: bool) -> Result<()> {
    let dir = wrapper_dir(dir)?;
    let written = install_wrappers(&dir, overwrite)?;
    println!("Installed wrappers:");
    for path in &written {
        println!("  {}", path.display());
    }
    println!();
    println!(
        "Put {} first in PATH so the shims shadow the provider binaries.",
        dir.display()
    );
    Ok(())
}

fn wrappers_remove(dir: Option<PathBuf>) -> Result<()> {
    let dir = wrapper_dir(dir)?;
    let report = remove_wrappers(&dir)?;
    for path in &report.skipped {
        println!("Skipping non-wrapper file: {}", path.display());
    }
    for path in &report.removed {
        println!("Removed {}", path.display());
    }
    if report.removed.is_empty() {
        println!("No switchboard wrappers found in {}.", dir.display());
    }
    Ok(())
}

fn status(repo_root: &Path, show_active: bool) -> Result<()> {
    let config = load_config(repo_root);
    let store = StateStore::new(repo_root);
    let state = store.load_state();
    let now = Utc::now();

    let available = available_providers(&state, &config, now)
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let last = state.last_provider.map(|p| p.as_str()).unwrap_or("none");

    println!("Last provider: {}", last);
    println!(
        "Available:     {}",
        if available.is_empty() {
            "none"
        } else {
            available.as_str()
        }
    );
    println!("Total turns:   {}", state.total_turns);

    if show_active {
        println!();
        match store.load_active_turn() {
            None => println!("Active turn: none"),
            Some(marker) => {
                println!("Active turn:");
                println!("  Turn ID:  {}", marker.turn_id);
                println!("  PID:      {}", marker.pid);
                println!("  Mode:     {}", marker.mode.as_str());
                println!(
                    "  Provider: {}",
                    marker.provider.map(|p| p.as_str()).unwrap_or("selecting")
                );
                println!(
                    "  Started:  {}",
                    marker.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!("  Prompt:   {}", marker.prompt_excerpt);
            }
        }
    }

    for provider in config.ordered_providers() {
        let ps = state.provider(provider);
        let cooling = !ps.is_available(now);
        println!();
        println!("{}:", provider);
        println!("  Status:    {}", if cooling { "cooldown" } else { "ready" });
        println!(
            "  Session:   {}",
            ps.session_id
                .as_deref()
                .map(|s| shorten(s, 20))
                .unwrap_or_else(|| "-".to_string())
        );
        println!(
            "  Last used: {}",
            ps.last_used
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        if cooling {
            if let Some(until) = ps.cooldown_until {
                let remaining = (until - now).num_minutes().max(0);
                println!(
                    "  Cooldown:  {} min remaining, until {}",
                    remaining,
                    until.format("%Y-%m-%d %H:%M UTC")
                );
            }
            if let Some(source) = ps.cooldown_source {
                println!("  Source:    {}", source.as_str());
            }
            if let Some(reason) = &ps.cooldown_reason {
                println!("  Reason:    {}", reason);
            }
        }
    }
    Ok(())
}

fn reset(repo_root: &Path, yes: bool) -> Result<()> {
    let store = StateStore::new(repo_root);
    if !store.exists() {
        println!("Nothing to reset: {} does not exist.", store.dir().display());
        return Ok(());
    }
    if !yes {
        print!(
            "Delete {} (sessions, cooldowns, handoff, transcript)? [y/N] ",
            store.dir().display()
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("Aborted.");
            return Ok(());
        }
    }
    store.reset()?;
    println!("Removed {}.", store.dir().display());
    Ok(())
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}…", head)
    }
}
