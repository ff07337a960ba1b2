use crate::{Error, ErrorContext, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateGateSnapshot {
    pub requests_per_minute: u32,
    pub min_interval_ms: u64,
    pub dispatches: u64,
    /// Another caller currently holds the gate (sleeping or recording).
    pub busy: bool,
    /// Estimated wait before the next dispatch may leave (ms), if any.
    ///
    /// When `busy`, the holder's dispatch time is unknown, so this is the
    /// upper bound for that one holder: a full `min_interval_ms`. Callers
    /// already queued behind it add their own intervals.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateGateConfig {
    /// Calls per minute ceiling.
    pub requests_per_minute: u32,
}

impl RateGateConfig {
    pub fn from_rpm(requests_per_minute: u32) -> Result<Self> {
        if requests_per_minute == 0 {
            return Err(Error::configuration_with_context(
                "requests_per_minute must be at least 1",
                ErrorContext::new()
                    .with_field_path("requests_per_minute")
                    .with_source("rate_gate"),
            ));
        }
        Ok(Self {
            requests_per_minute,
        })
    }

    /// `ceil(60000 / requests_per_minute)` milliseconds.
    pub fn min_interval(&self) -> Duration {
        let rpm = u64::from(self.requests_per_minute.max(1));
        Duration::from_millis(60_000u64.div_ceil(rpm))
    }
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
        }
    }
}

#[derive(Debug)]
struct State {
    last_dispatch_at: Option<Instant>,
}

/// Serializes outbound calls so that no two leave closer together than
/// the configured minimum interval.
///
/// - Callers are admitted strictly in the order they called [`RateGate::admit`]
///   (tokio's mutex is FIFO-fair).
/// - Each caller waits relative to the previous caller's dispatch, not to
///   when it itself arrived.
/// - Construct one per upstream API and share it through an `Arc`.
#[derive(Debug)]
pub struct RateGate {
    cfg: RateGateConfig,
    min_interval: Duration,
    state: Mutex<State>,
    dispatches: AtomicU64,
}

impl RateGate {
    pub fn new(cfg: RateGateConfig) -> Self {
        Self {
            min_interval: cfg.min_interval(),
            cfg,
            state: Mutex::new(State {
                last_dispatch_at: None,
            }),
            dispatches: AtomicU64::new(0),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this caller's turn, then record the dispatch. Never fails.
    ///
    /// The lock is held across the deficit sleep, which is what keeps later
    /// callers queued behind this one.
    pub async fn admit(&self) {
        let mut st = self.state.lock().await;

        if let Some(last) = st.last_dispatch_at {
            let elapsed = Instant::now().saturating_duration_since(last);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(
                    wait_ms = wait.as_millis() as u64,
                    min_interval_ms = self.min_interval.as_millis() as u64,
                    "rate gate holding dispatch"
                );
                tokio::time::sleep(wait).await;
            }
        }

        st.last_dispatch_at = Some(Instant::now());
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RateGateSnapshot {
        let min_interval_ms = self.min_interval.as_millis() as u64;
        let dispatches = self.dispatches.load(Ordering::Relaxed);
        match self.state.try_lock() {
            Ok(st) => {
                let wait_ms = st.last_dispatch_at.and_then(|last| {
                    let elapsed = Instant::now().saturating_duration_since(last);
                    (elapsed < self.min_interval)
                        .then(|| (self.min_interval - elapsed).as_millis() as u64)
                });
                RateGateSnapshot {
                    requests_per_minute: self.cfg.requests_per_minute,
                    min_interval_ms,
                    dispatches,
                    busy: false,
                    estimated_wait_ms: wait_ms,
                }
            }
            // Someone is mid-admission; report the upper bound for one holder.
            Err(_) => RateGateSnapshot {
                requests_per_minute: self.cfg.requests_per_minute,
                min_interval_ms,
                dispatches,
                busy: true,
                estimated_wait_ms: Some(min_interval_ms),
            },
        }
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(RateGateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_min_interval_rounds_up() {
        assert_eq!(
            RateGateConfig::from_rpm(10).unwrap().min_interval(),
            Duration::from_millis(6_000)
        );
        assert_eq!(
            RateGateConfig::from_rpm(7).unwrap().min_interval(),
            Duration::from_millis(8_572)
        );
        assert_eq!(
            RateGateConfig::from_rpm(120_000).unwrap().min_interval(),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_from_rpm_rejects_zero() {
        let err = RateGateConfig::from_rpm(0).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_default_is_ten_per_minute() {
        let gate = RateGate::default();
        assert_eq!(gate.min_interval(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_admission_is_immediate() {
        let gate = RateGate::new(RateGateConfig::from_rpm(1).unwrap());
        let start = Instant::now();
        gate.admit().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(gate.snapshot().dispatches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_admissions_are_spaced() {
        let gate = RateGate::new(RateGateConfig::from_rpm(60).unwrap());
        let start = Instant::now();
        gate.admit().await;
        gate.admit().await;
        gate.admit().await;
        assert!(start.elapsed() >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_when_interval_already_passed() {
        let gate = RateGate::new(RateGateConfig::from_rpm(60).unwrap());
        gate.admit().await;
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let start = Instant::now();
        gate.admit().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_relative_to_previous_dispatch() {
        let gate = RateGate::new(RateGateConfig::from_rpm(60).unwrap());
        gate.admit().await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        let start = Instant::now();
        gate.admit().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(590), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(650), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_remaining_wait() {
        let gate = Arc::new(RateGate::new(RateGateConfig::from_rpm(60).unwrap()));
        assert_eq!(gate.snapshot().estimated_wait_ms, None);

        gate.admit().await;
        let snap = gate.snapshot();
        assert_eq!(snap.min_interval_ms, 1_000);
        assert_eq!(snap.estimated_wait_ms, Some(1_000));
        assert!(!snap.busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_snapshot_reports_upper_bound() {
        let gate = Arc::new(RateGate::new(RateGateConfig::from_rpm(60).unwrap()));
        gate.admit().await;

        let holder = Arc::clone(&gate);
        let waiting = tokio::spawn(async move { holder.admit().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snap = gate.snapshot();
        assert!(snap.busy);
        assert_eq!(snap.estimated_wait_ms, Some(snap.min_interval_ms));
        assert_eq!(snap.dispatches, 1);

        waiting.await.unwrap();
        assert_eq!(gate.snapshot().dispatches, 2);
    }
}
