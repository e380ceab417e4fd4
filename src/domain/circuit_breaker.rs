//! Circuit Breaker Registry - Per-Source Failure Gating
//!
//! One breaker per source identifier, owned by the resolver instance (no
//! global maps). Every mutation is a single step under a short lock:
//! - failure: increment the consecutive count, open once it reaches the
//!   threshold
//! - success: reset the count to zero and close
//!
//! An open breaker admits a single half-open trial call once its cool-down
//! has elapsed; a failed trial re-opens it immediately. A trial that never
//! reports back (its caller was cancelled) is abandoned after another
//! cool-down and a fresh trial is admitted.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerPolicy {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time after which an open breaker admits one trial call.
    /// `None` keeps it open until a success or explicit reset.
    pub cooldown: Option<Duration>,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct BreakerState {
    consecutive_failures: u32,
    open: bool,
    opened_at: Option<Instant>,
    /// Start of the outstanding half-open trial.
    trial_started_at: Option<Instant>,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    /// Source identifier.
    pub source: String,
    /// Consecutive failures counted.
    pub consecutive_failures: u32,
    /// Whether calls are being skipped.
    pub open: bool,
}

/// Registry of per-source breakers.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    policy: BreakerPolicy,
    breakers: Mutex<HashMap<String, BreakerState>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerPolicy::default())
    }
}

impl CircuitBreakerRegistry {
    /// Create a registry with the given policy.
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy: BreakerPolicy {
                failure_threshold: policy.failure_threshold.max(1),
                ..policy
            },
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Active policy.
    pub const fn policy(&self) -> BreakerPolicy {
        self.policy
    }

    /// Whether a call to `source` may proceed now.
    ///
    /// Closed breakers always allow. Open breakers allow exactly one trial
    /// after the cool-down; concurrent callers keep being refused until that
    /// trial reports back or is abandoned for a further cool-down.
    pub fn allow(&self, source: &str) -> bool {
        let mut breakers = self.breakers.lock();
        let Some(state) = breakers.get_mut(source) else {
            return true;
        };
        if !state.open {
            return true;
        }
        let Some(cooldown) = self.policy.cooldown else {
            return false;
        };
        let cooled = state
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= cooldown);
        if !cooled {
            return false;
        }
        match state.trial_started_at {
            Some(started) if started.elapsed() < cooldown => false,
            previous => {
                if previous.is_some() {
                    warn!(source, "Half-open trial never reported back, admitting another");
                } else {
                    info!(source, "Breaker cool-down elapsed, admitting trial call");
                }
                state.trial_started_at = Some(Instant::now());
                true
            }
        }
    }

    /// Whether the breaker for `source` is open.
    pub fn is_open(&self, source: &str) -> bool {
        self.breakers.lock().get(source).is_some_and(|s| s.open)
    }

    /// Consecutive failures counted for `source`.
    pub fn failures(&self, source: &str) -> u32 {
        self.breakers
            .lock()
            .get(source)
            .map_or(0, |s| s.consecutive_failures)
    }

    /// Success: count to zero, breaker closed.
    pub fn record_success(&self, source: &str) {
        let mut breakers = self.breakers.lock();
        let state = breakers.entry(source.to_string()).or_default();
        if state.open {
            info!(source, "Breaker closed after success");
        }
        *state = BreakerState::default();
    }

    /// Failure: count up, open at the threshold. Returns `true` if this
    /// call opened (or re-opened) the breaker.
    pub fn record_failure(&self, source: &str) -> bool {
        let mut breakers = self.breakers.lock();
        let state = breakers.entry(source.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let was_trial = state.trial_started_at.take().is_some();
        if was_trial || (!state.open && state.consecutive_failures >= self.policy.failure_threshold) {
            state.open = true;
            state.opened_at = Some(Instant::now());
            warn!(
                source,
                failures = state.consecutive_failures,
                threshold = self.policy.failure_threshold,
                "Breaker opened"
            );
            return true;
        }
        false
    }

    /// Explicitly re-enable one source. The entry stays, closed, so
    /// snapshots keep reporting it.
    pub fn reset(&self, source: &str) {
        if let Some(state) = self.breakers.lock().get_mut(source) {
            *state = BreakerState::default();
        }
    }

    /// Explicitly re-enable every source.
    pub fn reset_all(&self) {
        for state in self.breakers.lock().values_mut() {
            *state = BreakerState::default();
        }
    }

    /// Snapshot of all known breakers, sorted by source.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.lock();
        let mut out: Vec<_> = breakers
            .iter()
            .map(|(source, state)| BreakerSnapshot {
                source: source.clone(),
                consecutive_failures: state.consecutive_failures,
                open: state.open,
            })
            .collect();
        out.sort_by(|a, b| a.source.cmp(&b.source));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, cooldown: Option<Duration>) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(BreakerPolicy {
            failure_threshold: threshold,
            cooldown,
        })
    }

    #[test]
    fn test_opens_after_exactly_threshold_failures() {
        let reg = registry(3, None);
        assert!(!reg.record_failure("primary"));
        assert!(!reg.record_failure("primary"));
        assert!(reg.allow("primary"));
        assert!(reg.record_failure("primary"));
        assert!(reg.is_open("primary"));
        assert!(!reg.allow("primary"));
    }

    #[test]
    fn test_success_closes_and_resets() {
        let reg = registry(2, None);
        reg.record_failure("alt");
        reg.record_failure("alt");
        assert!(reg.is_open("alt"));
        reg.record_success("alt");
        assert!(!reg.is_open("alt"));
        assert_eq!(reg.failures("alt"), 0);
    }

    #[test]
    fn test_breakers_are_independent() {
        let reg = registry(1, None);
        reg.record_failure("primary");
        assert!(reg.is_open("primary"));
        assert!(!reg.is_open("external"));
        reg.record_success("external");
        assert!(reg.is_open("primary"));
    }

    #[test]
    fn test_explicit_reset() {
        let reg = registry(1, None);
        reg.record_failure("primary");
        reg.record_failure("external");
        reg.reset("primary");
        assert!(reg.allow("primary"));
        assert!(!reg.allow("external"));
        reg.reset_all();
        assert!(reg.allow("external"));
    }

    #[test]
    fn test_reset_reports_closed_in_snapshot() {
        let reg = registry(1, None);
        reg.record_failure("alt-rest");
        reg.reset("alt-rest");
        assert_eq!(
            reg.snapshot(),
            vec![BreakerSnapshot {
                source: "alt-rest".into(),
                consecutive_failures: 0,
                open: false,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let reg = registry(1, Some(Duration::from_secs(30)));
        reg.record_failure("primary");
        assert!(!reg.allow("primary"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(reg.allow("primary"));
        assert!(!reg.allow("primary"), "only one trial at a time");

        // Failed trial re-opens and restarts the cool-down.
        assert!(reg.record_failure("primary"));
        assert!(!reg.allow("primary"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(reg.allow("primary"));
        reg.record_success("primary");
        assert!(!reg.is_open("primary"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_is_readmitted_after_cooldown() {
        let reg = registry(1, Some(Duration::from_secs(30)));
        reg.record_failure("alt");

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(reg.allow("alt"));
        // The trial's caller goes away without recording an outcome.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!reg.allow("alt"));

        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(reg.allow("alt"));
        assert!(!reg.allow("alt"));
        reg.record_success("alt");
        assert!(!reg.is_open("alt"));
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let reg = registry(0, None);
        assert_eq!(reg.policy().failure_threshold, 1);
    }
}
