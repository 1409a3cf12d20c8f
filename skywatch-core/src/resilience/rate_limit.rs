//! Rate limiting tracking and management
//!
//! Each budget key (a provider, or a provider's credential tier) gets a
//! minimum spacing between dispatched calls plus fixed hourly and daily
//! ceilings. Windows are anchored at the instant the key was first seen and
//! roll over on a fixed grid from there.

use super::{lock, ProviderTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Limits applied to one budget key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitSettings {
    /// Minimum spacing between two dispatched calls
    pub min_interval: Duration,

    /// Calls allowed per hourly window (`None` = unlimited)
    pub hourly_limit: Option<u32>,

    /// Calls allowed per daily window (`None` = unlimited)
    pub daily_limit: Option<u32>,
}

/// Which rolling ceiling was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Hourly,
    Daily,
}

/// Outcome of asking the limiter for permission to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Dispatch now
    Allow,
    /// Pacing: try again after the given wait
    Wait(Duration),
    /// A ceiling is spent until the window boundary
    Exhausted {
        window: WindowKind,
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }
}

/// Calls left in the current windows (`None` = unlimited)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BudgetRemaining {
    pub hourly: Option<u32>,
    pub daily: Option<u32>,
}

/// Usage counters for one budget key
#[derive(Debug, Clone)]
pub struct RateWindow {
    pub key: String,
    pub last_request_at: Option<Instant>,
    pub hourly_count: u32,
    pub hour_window_start: Instant,
    pub daily_count: u32,
    pub day_window_start: Instant,
}

impl RateWindow {
    fn new(key: &str, now: Instant) -> Self {
        Self {
            key: key.to_string(),
            last_request_at: None,
            hourly_count: 0,
            hour_window_start: now,
            daily_count: 0,
            day_window_start: now,
        }
    }

    /// Advance window starts past `now`, zeroing counts on rollover
    fn roll(&mut self, now: Instant) {
        if let Some(start) = advance_window(self.hour_window_start, HOUR, now) {
            debug!("Hourly window rolled over for {}", self.key);
            self.hour_window_start = start;
            self.hourly_count = 0;
        }
        if let Some(start) = advance_window(self.day_window_start, DAY, now) {
            debug!("Daily window rolled over for {}", self.key);
            self.day_window_start = start;
            self.daily_count = 0;
        }
    }

    fn evaluate(&self, settings: &RateLimitSettings, now: Instant, check_ceilings: bool) -> Admission {
        if check_ceilings {
            if let Some(limit) = settings.daily_limit {
                if self.daily_count >= limit {
                    return Admission::Exhausted {
                        window: WindowKind::Daily,
                        retry_after: (self.day_window_start + DAY).saturating_duration_since(now),
                    };
                }
            }
            if let Some(limit) = settings.hourly_limit {
                if self.hourly_count >= limit {
                    return Admission::Exhausted {
                        window: WindowKind::Hourly,
                        retry_after: (self.hour_window_start + HOUR).saturating_duration_since(now),
                    };
                }
            }
        }

        if let Some(last) = self.last_request_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < settings.min_interval {
                return Admission::Wait(settings.min_interval - elapsed);
            }
        }

        Admission::Allow
    }

    fn charge(&mut self, now: Instant) {
        self.hourly_count += 1;
        self.daily_count += 1;
        self.last_request_at = Some(now);
    }

    fn remaining(&self, settings: &RateLimitSettings) -> BudgetRemaining {
        BudgetRemaining {
            hourly: settings
                .hourly_limit
                .map(|limit| limit.saturating_sub(self.hourly_count)),
            daily: settings
                .daily_limit
                .map(|limit| limit.saturating_sub(self.daily_count)),
        }
    }
}

fn advance_window(start: Instant, period: Duration, now: Instant) -> Option<Instant> {
    let elapsed = now.saturating_duration_since(start);
    if elapsed < period {
        return None;
    }
    let periods = (elapsed.as_secs() / period.as_secs()) as u32;
    Some(start + period * periods)
}

/// Rate limiter over all budget keys
#[derive(Debug)]
pub struct RateLimiter {
    default_settings: RateLimitSettings,
    overrides: HashMap<String, RateLimitSettings>,
    table: ProviderTable<RateWindow>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitSettings::default())
    }
}

impl RateLimiter {
    /// Create a limiter where every key uses `default_settings`
    pub fn new(default_settings: RateLimitSettings) -> Self {
        Self {
            default_settings,
            overrides: HashMap::new(),
            table: ProviderTable::new(),
        }
    }

    /// Use dedicated limits for one budget key
    pub fn with_provider(mut self, key: impl Into<String>, settings: RateLimitSettings) -> Self {
        self.overrides.insert(key.into(), settings);
        self
    }

    pub fn settings(&self, key: &str) -> RateLimitSettings {
        self.overrides
            .get(key)
            .copied()
            .unwrap_or(self.default_settings)
    }

    fn with_window<R>(&self, key: &str, f: impl FnOnce(&mut RateWindow, Instant) -> R) -> R {
        let now = Instant::now();
        let cell = self.table.cell(key, || RateWindow::new(key, now));
        let mut window = lock(&cell);
        window.roll(now);
        f(&mut window, now)
    }

    /// Check whether a call may be dispatched now, without consuming budget
    pub fn admit(&self, key: &str) -> Admission {
        let settings = self.settings(key);
        self.with_window(key, |window, now| window.evaluate(&settings, now, true))
    }

    /// Check and, when allowed, stamp the dispatch in one step.
    ///
    /// With `charge` the call counts against the ceilings; without it only the
    /// pacing clock moves and the ceilings are not consulted.
    pub fn try_acquire(&self, key: &str, charge: bool) -> Admission {
        let settings = self.settings(key);
        self.with_window(key, |window, now| {
            let admission = window.evaluate(&settings, now, charge);
            if admission.is_allowed() {
                if charge {
                    window.charge(now);
                } else {
                    window.last_request_at = Some(now);
                }
            }
            admission
        })
    }

    /// Give back one charged call that was never sent.
    ///
    /// Only the ceilings are credited; the pacing clock keeps its stamp.
    pub fn refund(&self, key: &str) {
        self.with_window(key, |window, _| {
            window.hourly_count = window.hourly_count.saturating_sub(1);
            window.daily_count = window.daily_count.saturating_sub(1);
            debug!("Refunded one call to {}", window.key);
        });
    }

    /// Calls left in the current windows
    pub fn remaining(&self, key: &str) -> BudgetRemaining {
        let settings = self.settings(key);
        self.with_window(key, |window, _| window.remaining(&settings))
    }

    /// Snapshot of a key's usage counters
    pub fn window(&self, key: &str) -> RateWindow {
        self.with_window(key, |window, _| window.clone())
    }

    /// Remaining budget for every configured or observed key
    pub fn all_remaining(&self) -> HashMap<String, BudgetRemaining> {
        let mut keys: Vec<String> = self.overrides.keys().cloned().collect();
        keys.extend(self.table.entries().into_iter().map(|(key, _)| key));
        keys.into_iter()
            .map(|key| {
                let remaining = self.remaining(&key);
                (key, remaining)
            })
            .collect()
    }
}
