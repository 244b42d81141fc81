//! Cooldown policy: how long a provider must be avoided after a failure.
//!
//! Quota messages often name an explicit reset time ("Your limit resets 6pm
//! (America/Los_Angeles)"). When one parses, it is used verbatim; otherwise
//! a configured fixed cooldown applies. Pure functions of the inputs, no
//! clock reads or I/O.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which rule produced a cooldown expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownSource {
    /// Provider-reported reset time, used verbatim.
    QuotaResetTime,
    /// Fixed quota cooldown when no reset time could be parsed.
    CooldownMinutes,
    /// Short cooldown after transient-rate-limit retries ran out.
    TransientCooldownMinutes,
}

impl CooldownSource {
    /// Wire/status name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CooldownSource::QuotaResetTime => "quota_reset_time",
            CooldownSource::CooldownMinutes => "cooldown_minutes",
            CooldownSource::TransientCooldownMinutes => "transient_cooldown_minutes",
        }
    }
}

/// A computed cooldown with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownDecision {
    /// When the provider becomes selectable again.
    pub until: DateTime<Utc>,
    pub source: CooldownSource,
    /// Short tag for logs and status output.
    pub reason: &'static str,
    /// Bounded, whitespace-normalized provider message.
    pub message_excerpt: Option<String>,
}

/// Cooldown for a quota-exhausted provider.
pub fn quota_cooldown(
    error_message: Option<&str>,
    now: DateTime<Utc>,
    default_minutes: u64,
) -> CooldownDecision {
    if let Some(reset) = error_message.and_then(|m| extract_reset_time(m, now)) {
        if reset > now {
            return CooldownDecision {
                until: reset,
                source: CooldownSource::QuotaResetTime,
                reason: "quota-exhausted:provider-reset-time",
                message_excerpt: message_excerpt(error_message),
            };
        }
    }

    CooldownDecision {
        until: now + bounded_minutes(default_minutes),
        source: CooldownSource::CooldownMinutes,
        reason: "quota-exhausted:default-cooldown",
        message_excerpt: message_excerpt(error_message),
    }
}

/// Cooldown after transient retries are exhausted.
pub fn transient_cooldown(
    error_message: Option<&str>,
    now: DateTime<Utc>,
    minutes: u64,
) -> CooldownDecision {
    CooldownDecision {
        until: now + bounded_minutes(minutes),
        source: CooldownSource::TransientCooldownMinutes,
        reason: "transient-rate-limit:retries-exhausted",
        message_excerpt: message_excerpt(error_message),
    }
}

/// Minute counts above this are treated as "effectively forever".
/// 525,600 minutes = 365 days.
const MAX_COOLDOWN_MINUTES: u64 = 525_600;

/// Fixed-duration cooldown from a configured minute count, capped at one
/// year. Without the cap, pathological counts overflow `Duration` or the
/// expiry addition and panic inside chrono.
fn bounded_minutes(minutes: u64) -> Duration {
    Duration::minutes(minutes.min(MAX_COOLDOWN_MINUTES) as i64)
}

/// Collapses whitespace and bounds the message for state/status display.
fn message_excerpt(message: Option<&str>) -> Option<String> {
    let message = message?;
    let normalized = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }
    if normalized.chars().count() <= 240 {
        Some(normalized)
    } else {
        let mut cut: String = normalized.chars().take(240).collect();
        cut.push_str("...");
        Some(cut)
    }
}

static RESET_TIME_12H: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)resets?\s+(?:at\s+)?(?P<hour>\d{1,2})(?::(?P<minute>\d{2}))?\s*(?P<ampm>am|pm)\s*[.,:;\-·]?\s*\((?P<tz>[^)]+)\)",
    )
    .expect("12h reset regex")
});

static RESET_TIME_24H: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)resets?\s+(?:at\s+)?(?P<hour>(?:[01]?\d|2[0-3])):(?P<minute>[0-5]\d)\s*[.,:;\-·]?\s*\((?P<tz>[^)]+)\)",
    )
    .expect("24h reset regex")
});

/// Parses a provider-reported reset time out of an error message.
///
/// Handles "resets 6pm (America/Los_Angeles)", "resets at 11:30am (UTC)",
/// and the 24-hour form "resets at 18:30 (America/Los_Angeles)". The time
/// is placed on the current day in the named zone, rolled to the next day
/// if already past, then converted to UTC.
pub fn extract_reset_time(message: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    extract_12h(message, now).or_else(|| extract_24h(message, now))
}

fn extract_12h(message: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = RESET_TIME_12H.captures(message)?;

    let hour_12: u32 = caps.name("hour")?.as_str().parse().ok()?;
    if !(1..=12).contains(&hour_12) {
        return None;
    }
    let minute: u32 = match caps.name("minute") {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };

    let pm = caps.name("ampm")?.as_str().eq_ignore_ascii_case("pm");
    let hour_24 = (hour_12 % 12) + if pm { 12 } else { 0 };

    build_reset_time(now, caps.name("tz")?.as_str().trim(), hour_24, minute)
}

fn extract_24h(message: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = RESET_TIME_24H.captures(message)?;

    let hour_24: u32 = caps.name("hour")?.as_str().parse().ok()?;
    let minute: u32 = caps.name("minute")?.as_str().parse().ok()?;

    build_reset_time(now, caps.name("tz")?.as_str().trim(), hour_24, minute)
}

/// Places `hour:minute` on today's date in `tz_name`, rolling forward a day
/// if that instant is already past, and converts to UTC. Unknown zones and
/// nonexistent wall times (DST gaps) yield `None`.
fn build_reset_time(
    now: DateTime<Utc>,
    tz_name: &str,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Utc>> {
    let tz: Tz = tz_name.parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();
    let mut local_reset = tz.from_local_datetime(&date.and_time(time)).earliest()?;
    if local_reset <= local_now {
        date = date.succ_opt()?;
        local_reset = tz.from_local_datetime(&date.and_time(time)).earliest()?;
    }

    Some(local_reset.with_timezone(&Utc))
}
