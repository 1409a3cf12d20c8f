//! Per-provider circuit breaker
//!
//! After `failure_threshold` consecutive failures a provider's circuit opens
//! and every call is rejected without touching the network. Once the cooldown
//! has elapsed exactly one caller is let through as a half-open probe; its
//! outcome decides whether the circuit closes again or the cooldown restarts.

use super::{lock, ProviderTable};
use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Thresholds for a single provider's breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls before probing
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Breaker state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the cooldown ends
    Open,
    /// One probe call decides the next state
    HalfOpen,
}

/// Health record kept for each provider
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub cooldown_until: Option<Instant>,
    pub probe_in_flight: bool,
}

impl ProviderHealth {
    fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            cooldown_until: None,
            probe_in_flight: false,
        }
    }

    fn remaining_cooldown(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }

    fn on_success(&mut self, probe: bool) {
        match self.state {
            CircuitState::Closed => self.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                info!("Probe succeeded, closing circuit for {}", self.provider);
                self.state = CircuitState::Closed;
                self.consecutive_failures = 0;
                self.cooldown_until = None;
                self.probe_in_flight = false;
            }
            // Late results from calls issued before the circuit opened
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&mut self, probe: bool, settings: &BreakerSettings, now: Instant) {
        self.last_failure_at = Some(now);
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= settings.failure_threshold {
                    warn!(
                        "Opening circuit for {} after {} consecutive failures",
                        self.provider, self.consecutive_failures
                    );
                    self.state = CircuitState::Open;
                    self.cooldown_until = Some(now + settings.cooldown);
                }
            }
            CircuitState::HalfOpen if probe => {
                warn!("Probe failed, reopening circuit for {}", self.provider);
                self.consecutive_failures += 1;
                self.state = CircuitState::Open;
                self.cooldown_until = Some(now + settings.cooldown);
                self.probe_in_flight = false;
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }
}

/// Circuit breakers for every provider, keyed by provider name
#[derive(Debug)]
pub struct CircuitBreaker {
    default_settings: BreakerSettings,
    overrides: HashMap<String, BreakerSettings>,
    table: ProviderTable<ProviderHealth>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

impl CircuitBreaker {
    /// Create a breaker table where every provider uses `default_settings`
    pub fn new(default_settings: BreakerSettings) -> Self {
        Self {
            default_settings,
            overrides: HashMap::new(),
            table: ProviderTable::new(),
        }
    }

    /// Use dedicated settings for one provider
    pub fn with_provider(mut self, provider: impl Into<String>, settings: BreakerSettings) -> Self {
        self.overrides.insert(provider.into(), settings);
        self
    }

    /// Settings in effect for `provider`
    pub fn settings(&self, provider: &str) -> BreakerSettings {
        self.overrides
            .get(provider)
            .copied()
            .unwrap_or(self.default_settings)
    }

    fn cell(&self, provider: &str) -> Arc<Mutex<ProviderHealth>> {
        self.table.cell(provider, || ProviderHealth::new(provider))
    }

    /// Fail fast if the provider is currently rejecting calls.
    ///
    /// Unlike [`CircuitBreaker::acquire`] this never claims the probe slot.
    pub fn check(&self, provider: &str) -> Result<(), ClientError> {
        let Some(cell) = self.table.get(provider) else {
            return Ok(());
        };
        let health = lock(&cell);
        let now = Instant::now();
        match health.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open if health.remaining_cooldown(now).is_zero() => Ok(()),
            CircuitState::HalfOpen if !health.probe_in_flight => Ok(()),
            CircuitState::Open => Err(open_error(provider, health.remaining_cooldown(now))),
            CircuitState::HalfOpen => Err(open_error(provider, self.settings(provider).cooldown)),
        }
    }

    /// Claim permission for one network attempt
    pub fn acquire(&self, provider: &str) -> Result<BreakerPermit, ClientError> {
        let cell = self.cell(provider);
        let settings = self.settings(provider);
        let probe = {
            let mut health = lock(&cell);
            let now = Instant::now();
            match health.state {
                CircuitState::Closed => false,
                CircuitState::Open => {
                    let remaining = health.remaining_cooldown(now);
                    if !remaining.is_zero() {
                        return Err(open_error(provider, remaining));
                    }
                    debug!("Cooldown elapsed for {}, admitting probe", provider);
                    health.state = CircuitState::HalfOpen;
                    health.probe_in_flight = true;
                    true
                }
                CircuitState::HalfOpen => {
                    if health.probe_in_flight {
                        return Err(open_error(provider, settings.cooldown));
                    }
                    health.probe_in_flight = true;
                    true
                }
            }
        };

        Ok(BreakerPermit {
            cell,
            settings,
            probe,
            resolved: false,
        })
    }

    /// Record a failed call made without a permit
    pub fn record_failure(&self, provider: &str) {
        let settings = self.settings(provider);
        lock(&self.cell(provider)).on_failure(false, &settings, Instant::now());
    }

    /// Current state of a provider's circuit
    pub fn state(&self, provider: &str) -> CircuitState {
        self.table
            .get(provider)
            .map(|cell| lock(&cell).state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshot of a provider's health record
    pub fn health(&self, provider: &str) -> ProviderHealth {
        self.table
            .get(provider)
            .map(|cell| lock(&cell).clone())
            .unwrap_or_else(|| ProviderHealth::new(provider))
    }

    /// Providers whose circuit is not closed, sorted by name
    pub fn open_circuits(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .table
            .entries()
            .into_iter()
            .filter(|(_, cell)| lock(cell).state != CircuitState::Closed)
            .map(|(name, _)| name)
            .collect();
        open.sort();
        open
    }

    /// Force one provider (or all of them) back to closed
    pub fn reset(&self, provider: Option<&str>) {
        let targets = match provider {
            Some(name) => self.table.get(name).into_iter().collect::<Vec<_>>(),
            None => self.table.entries().into_iter().map(|(_, cell)| cell).collect(),
        };
        for cell in targets {
            let mut health = lock(&cell);
            info!("Resetting circuit breaker for {}", health.provider);
            let name = std::mem::take(&mut health.provider);
            *health = ProviderHealth::new(&name);
        }
    }
}

fn open_error(provider: &str, retry_after: Duration) -> ClientError {
    ClientError::CircuitOpen {
        provider: provider.to_string(),
        retry_after,
    }
}

/// Permission for a single attempt.
///
/// Resolve it with [`BreakerPermit::success`] or [`BreakerPermit::failure`].
/// Dropping an unresolved probe permit hands the probe slot to the next caller.
#[derive(Debug)]
pub struct BreakerPermit {
    cell: Arc<Mutex<ProviderHealth>>,
    settings: BreakerSettings,
    probe: bool,
    resolved: bool,
}

impl BreakerPermit {
    /// Whether this attempt is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.resolved = true;
        lock(&self.cell).on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        lock(&self.cell).on_failure(self.probe, &self.settings, Instant::now());
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.resolved || !self.probe {
            return;
        }
        let mut health = lock(&self.cell);
        if health.state == CircuitState::HalfOpen {
            health.probe_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerSettings {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        })
    }

    fn fail(breaker: &CircuitBreaker, provider: &str, times: usize) {
        for _ in 0..times {
            breaker.acquire(provider).unwrap().failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = breaker();
        fail(&breaker, "flares", 2);
        assert_eq!(breaker.state("flares"), CircuitState::Closed);

        fail(&breaker, "flares", 1);
        assert_eq!(breaker.state("flares"), CircuitState::Open);

        let err = breaker.acquire("flares").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert!(breaker.check("flares").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = breaker();
        fail(&breaker, "quake", 2);
        breaker.acquire("quake").unwrap().success();
        fail(&breaker, "quake", 2);
        assert_eq!(breaker.state("quake"), CircuitState::Closed);
        assert_eq!(breaker.health("quake").consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_cooldown() {
        let breaker = breaker();
        fail(&breaker, "flares", 3);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.check("flares").is_ok());

        let probe = breaker.acquire("flares").unwrap();
        assert!(probe.is_probe());
        assert_eq!(breaker.state("flares"), CircuitState::HalfOpen);

        // Everyone else is rejected while the probe is out
        assert!(breaker.acquire("flares").is_err());
        assert!(breaker.check("flares").is_err());

        probe.success();
        assert_eq!(breaker.state("flares"), CircuitState::Closed);
        assert!(!breaker.acquire("flares").unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_cooldown() {
        let breaker = breaker();
        fail(&breaker, "flares", 3);
        tokio::time::advance(Duration::from_secs(61)).await;

        breaker.acquire("flares").unwrap().failure();
        assert_eq!(breaker.state("flares"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        match breaker.acquire("flares") {
            Err(ClientError::CircuitOpen { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            other => panic!("expected open circuit, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let breaker = breaker();
        fail(&breaker, "flares", 3);
        tokio::time::advance(Duration::from_secs(60)).await;

        drop(breaker.acquire("flares").unwrap());
        let probe = breaker.acquire("flares").unwrap();
        assert!(probe.is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_are_isolated() {
        let breaker = breaker();
        fail(&breaker, "flares", 3);
        assert!(breaker.acquire("quake").is_ok());
        assert_eq!(breaker.open_circuits(), vec!["flares".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_single_and_all() {
        let breaker = breaker();
        fail(&breaker, "flares", 3);
        fail(&breaker, "quake", 3);

        breaker.reset(Some("flares"));
        assert_eq!(breaker.state("flares"), CircuitState::Closed);
        assert_eq!(breaker.state("quake"), CircuitState::Open);

        breaker.reset(None);
        assert!(breaker.open_circuits().is_empty());
        assert_eq!(breaker.health("quake").provider, "quake");
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_override() {
        let breaker = breaker().with_provider(
            "jpl",
            BreakerSettings {
                failure_threshold: 1,
                cooldown: Duration::from_secs(5),
            },
        );
        fail(&breaker, "jpl", 1);
        assert_eq!(breaker.state("jpl"), CircuitState::Open);
        assert_eq!(breaker.settings("nasa").failure_threshold, 3);
    }
}
