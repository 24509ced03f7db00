//! Weighted sliding-window rate limiting.
//!
//! Each identity gets a one-hour window of `(timestamp, operation)` entries.
//! Every check first evicts expired entries and recomputes the point total;
//! an operation is admitted only if it keeps the total at or below the
//! policy ceiling.
//!
//! The limiter is in-memory and per process. Deployments with several
//! processes need a shared counter store in front of it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Length of the rolling window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Operation kind for a grid mutation.
pub const UPDATE_PIXEL: &str = "update_pixel";
/// Operation kind for a full grid read.
pub const GET_PIXEL_GRID: &str = "get_pixel_grid";
/// Operation kind for clearing the grid.
pub const CLEAR_GRID: &str = "clear_grid";

/// Advisory rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {operation}: {remaining} points remaining")]
    Exceeded { operation: String, remaining: u64 },
}

/// Point weights per operation kind and the hourly ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// Maximum points per rolling hour.
    pub ceiling: u64,
    /// Weight of each named operation kind.
    pub weights: HashMap<String, u64>,
    /// Weight of kinds missing from `weights`.
    pub default_weight: u64,
}

impl Default for RateLimitPolicy {
    /// 100 grid mutations or 1000 reads per hour.
    fn default() -> Self {
        let weights = [(UPDATE_PIXEL, 10), (GET_PIXEL_GRID, 1), (CLEAR_GRID, 10)]
            .into_iter()
            .map(|(kind, weight)| (kind.to_string(), weight))
            .collect();
        Self { ceiling: 1000, weights, default_weight: 1 }
    }
}

impl RateLimitPolicy {
    pub fn new(ceiling: u64) -> Self {
        Self { ceiling, weights: HashMap::new(), default_weight: 1 }
    }

    pub fn with_weight(mut self, operation: &str, weight: u64) -> Self {
        self.weights.insert(operation.to_string(), weight);
        self
    }

    pub fn weight(&self, operation: &str) -> u64 {
        self.weights.get(operation).copied().unwrap_or(self.default_weight)
    }
}

/// Result of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
}

impl RateDecision {
    pub fn into_result(self, operation: &str) -> Result<u64, RateLimitError> {
        if self.allowed {
            Ok(self.remaining)
        } else {
            Err(RateLimitError::Exceeded {
                operation: operation.to_string(),
                remaining: self.remaining,
            })
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RateWindow {
    entries: VecDeque<(Instant, String)>,
    points: u64,
}

impl RateWindow {
    fn evict(&mut self, now: Instant, window: Duration, policy: &RateLimitPolicy) {
        while let Some((timestamp, _)) = self.entries.front() {
            if now.saturating_duration_since(*timestamp) < window {
                break;
            }
            self.entries.pop_front();
        }
        self.points = self.entries.iter().map(|(_, kind)| policy.weight(kind)).sum();
    }
}

/// Per-identity sliding window limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    windows: HashMap<String, RateWindow>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(RATE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self { window, windows: HashMap::new() }
    }

    /// Check and, if admitted, record an operation at the current time.
    pub fn check(&mut self, identity: &str, policy: &RateLimitPolicy, operation: &str) -> RateDecision {
        self.check_at(identity, policy, operation, Instant::now())
    }

    /// Check against an explicit clock reading.
    pub fn check_at(
        &mut self,
        identity: &str,
        policy: &RateLimitPolicy,
        operation: &str,
        now: Instant,
    ) -> RateDecision {
        let window = self.windows.entry(identity.to_string()).or_default();
        window.evict(now, self.window, policy);

        let weight = policy.weight(operation);
        if window.points + weight > policy.ceiling {
            log::debug!("Rate limit hit for {} on {} ({} points used)", identity, operation, window.points);
            return RateDecision {
                allowed: false,
                limit: policy.ceiling,
                remaining: policy.ceiling.saturating_sub(window.points),
            };
        }

        window.entries.push_back((now, operation.to_string()));
        window.points += weight;
        RateDecision {
            allowed: true,
            limit: policy.ceiling,
            remaining: policy.ceiling - window.points,
        }
    }

    /// Points currently used by an identity, without recording anything.
    pub fn used_points(&mut self, identity: &str, policy: &RateLimitPolicy, now: Instant) -> u64 {
        match self.windows.get_mut(identity) {
            Some(window) => {
                window.evict(now, self.window, policy);
                window.points
            }
            None => 0,
        }
    }

    /// Drop all state for an identity.
    pub fn forget(&mut self, identity: &str) {
        self.windows.remove(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy::new(100).with_weight(UPDATE_PIXEL, 1)
    }

    #[test]
    fn test_ceiling_then_window_expiry() {
        let mut limiter = RateLimiter::new();
        let policy = policy();
        let start = Instant::now();

        for i in 0..100 {
            let decision = limiter.check_at("alice", &policy, UPDATE_PIXEL, start);
            assert!(decision.allowed, "call {} should be admitted", i + 1);
        }

        let rejected = limiter.check_at("alice", &policy, UPDATE_PIXEL, start);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);

        let later = start + RATE_WINDOW + Duration::from_millis(1);
        let admitted = limiter.check_at("alice", &policy, UPDATE_PIXEL, later);
        assert!(admitted.allowed);
        assert_eq!(admitted.remaining, 99);
    }

    #[test]
    fn test_rejection_is_not_recorded() {
        let mut limiter = RateLimiter::new();
        let policy = RateLimitPolicy::new(10).with_weight("heavy", 8).with_weight("light", 1);
        let now = Instant::now();

        assert!(limiter.check_at("bob", &policy, "heavy", now).allowed);
        assert!(!limiter.check_at("bob", &policy, "heavy", now).allowed);
        assert_eq!(limiter.used_points("bob", &policy, now), 8);
        assert!(limiter.check_at("bob", &policy, "light", now).allowed);
        assert!(limiter.check_at("bob", &policy, "light", now).allowed);
        assert_eq!(limiter.check_at("bob", &policy, "light", now).remaining, 0);
    }

    #[test]
    fn test_identities_are_independent() {
        let mut limiter = RateLimiter::new();
        let policy = RateLimitPolicy::new(1);
        let now = Instant::now();
        assert!(limiter.check_at("a", &policy, UPDATE_PIXEL, now).allowed);
        assert!(!limiter.check_at("a", &policy, UPDATE_PIXEL, now).allowed);
        assert!(limiter.check_at("b", &policy, UPDATE_PIXEL, now).allowed);
    }

    #[test]
    fn test_partial_eviction() {
        let mut limiter = RateLimiter::with_window(Duration::from_secs(10));
        let policy = RateLimitPolicy::new(2);
        let start = Instant::now();
        limiter.check_at("c", &policy, UPDATE_PIXEL, start);
        limiter.check_at("c", &policy, UPDATE_PIXEL, start + Duration::from_secs(5));
        assert!(!limiter.check_at("c", &policy, UPDATE_PIXEL, start + Duration::from_secs(9)).allowed);
        assert!(limiter.check_at("c", &policy, UPDATE_PIXEL, start + Duration::from_secs(10)).allowed);
    }

    #[test]
    fn test_unknown_kind_uses_default_weight() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.weight(UPDATE_PIXEL), 10);
        assert_eq!(policy.weight(GET_PIXEL_GRID), 1);
        assert_eq!(policy.weight("something_else"), 1);
    }

    #[test]
    fn test_policy_from_json() {
        let policy: RateLimitPolicy =
            serde_json::from_str(r#"{"ceiling": 5, "weights": {"update_pixel": 5}}"#).unwrap();
        assert_eq!(policy.ceiling, 5);
        assert_eq!(policy.default_weight, 1);
        let decision = RateLimiter::new().check(&"x".to_string(), &policy, UPDATE_PIXEL);
        assert_eq!(decision, RateDecision { allowed: true, limit: 5, remaining: 0 });
        assert!(decision.into_result(UPDATE_PIXEL).is_ok());
    }
}
