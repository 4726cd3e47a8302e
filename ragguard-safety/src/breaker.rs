//! Circuit breaker guarding the risk analyzer.
//!
//! Three states:
//! - Closed: calls proceed; consecutive failures are counted
//! - Open: calls are refused until the recovery timeout has elapsed since the
//!   last failure
//! - HalfOpen: exactly one probe call is admitted; its outcome closes or
//!   re-opens the breaker
//!
//! The breaker is an owned value. Share it between engines through
//! [`SharedCircuitBreaker`], which hands out [`BreakerPermit`]s.

use chrono::{DateTime, Utc};
use ragguard_core::SafetyConfig;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The single half-open probe, tagged with the probe generation.
    Probe(u64),
}

/// Point-in-time view of a breaker, suitable for audit data and health checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub recovery_timeout_secs: u64,
    pub probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    failure_threshold: u32,
    recovery_timeout: Duration,
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    probe_generation: u64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            opened_at: None,
            last_failure_time: None,
            probe_in_flight: false,
            probe_generation: 0,
        }
    }

    pub fn from_config(config: &SafetyConfig) -> Self {
        Self::new(config.failure_threshold, config.breaker_timeout())
    }

    /// Admit a call if the current state allows it.
    ///
    /// An open breaker whose timeout has elapsed moves to half-open and admits
    /// the caller as its probe. While a probe is in flight every other caller
    /// is refused.
    pub fn admit(&mut self) -> Option<Admission> {
        match self.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| at.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    debug!("Circuit breaker transitioning to half-open");
                    self.state = CircuitState::HalfOpen;
                    Some(self.start_probe())
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if !self.probe_in_flight => Some(self.start_probe()),
            CircuitState::HalfOpen => None,
        }
    }

    /// Whether a call is currently permitted. Admits the caller when it is.
    pub fn is_call_permitted(&mut self) -> bool {
        self.admit().is_some()
    }

    fn start_probe(&mut self) -> Admission {
        self.probe_in_flight = true;
        self.probe_generation += 1;
        Admission::Probe(self.probe_generation)
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                info!("Circuit breaker closing after successful probe");
                self.close();
            }
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&mut self) {
        self.last_failure_time = Some(Utc::now());
        self.failure_count = self.failure_count.saturating_add(1);
        match self.state {
            CircuitState::HalfOpen => {
                warn!("Circuit breaker probe failed; re-opening");
                self.open();
            }
            CircuitState::Closed if self.failure_count >= self.failure_threshold => {
                warn!(
                    failures = self.failure_count,
                    threshold = self.failure_threshold,
                    "Circuit breaker opening"
                );
                self.open();
            }
            CircuitState::Closed => {}
            CircuitState::Open => self.opened_at = Some(Instant::now()),
        }
    }

    /// Apply the outcome of an admitted call.
    ///
    /// While half-open only the current probe's outcome counts; a late result
    /// from a call admitted earlier is ignored.
    pub fn settle(&mut self, admission: Admission, success: bool) {
        if self.state == CircuitState::HalfOpen && !self.is_current_probe(admission) {
            debug!("Ignoring outcome of a call admitted before the probe");
            return;
        }
        if success {
            self.record_success();
        } else {
            self.record_failure();
        }
    }

    /// Free the probe slot without recording an outcome.
    pub fn release(&mut self, admission: Admission) {
        if self.state == CircuitState::HalfOpen && self.is_current_probe(admission) {
            debug!("Half-open probe abandoned; slot released");
            self.probe_in_flight = false;
        }
    }

    fn is_current_probe(&self, admission: Admission) -> bool {
        matches!(admission, Admission::Probe(generation)
            if self.probe_in_flight && generation == self.probe_generation)
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    /// Force the breaker closed with zero failures.
    pub fn reset(&mut self) {
        info!(previous = %self.state, "Circuit breaker manually reset");
        self.close();
        self.last_failure_time = None;
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            state: self.state,
            failure_count: self.failure_count,
            failure_threshold: self.failure_threshold,
            last_failure_time: self.last_failure_time,
            recovery_timeout_secs: self.recovery_timeout.as_secs(),
            probe_in_flight: self.probe_in_flight,
        }
    }
}

/// A breaker shared by every engine that guards the same analyzer.
#[derive(Debug, Clone)]
pub struct SharedCircuitBreaker {
    inner: Arc<Mutex<CircuitBreaker>>,
}

impl SharedCircuitBreaker {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(breaker)),
        }
    }

    pub fn from_config(config: &SafetyConfig) -> Self {
        Self::new(CircuitBreaker::from_config(config))
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask for permission to call the analyzer.
    pub fn acquire(&self) -> Option<BreakerPermit> {
        let admission = self.lock().admit()?;
        Some(BreakerPermit {
            breaker: self.clone(),
            admission,
            settled: false,
        })
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        self.lock().status()
    }

    pub fn reset(&self) {
        self.lock().reset();
    }
}

/// Permission for one analyzer call.
///
/// Dropping an unsettled probe permit frees the half-open slot, so a
/// cancelled caller cannot leave the breaker waiting forever.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: SharedCircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl BreakerPermit {
    pub fn is_probe(&self) -> bool {
        matches!(self.admission, Admission::Probe(_))
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.lock().settle(self.admission, true);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.lock().settle(self.admission, false);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.lock().release(self.admission);
        }
    }
}
