//! Bounded-time convergence polling.
//!
//! Each tick spawns an independent probe task; the tick loop never waits for
//! a probe to finish. The first terminal result reaching the channel wins and
//! anything arriving later is discarded.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{DeployError, Result};

/// Outcome of one probe invocation. Fatal problems are returned as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The target exists but has not converged yet.
    Pending,
    /// The target does not exist yet; keep waiting.
    Absent,
    Satisfied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub const fn from_secs(interval: u64, timeout: u64) -> Self {
        Self::new(Duration::from_secs(interval), Duration::from_secs(timeout))
    }

    /// Defaults for waiting on a service rollout.
    pub const fn service_health() -> Self {
        Self::from_secs(10, 600)
    }

    /// Defaults for waiting on an image push.
    pub const fn image() -> Self {
        Self::from_secs(10, 60)
    }
}

/// A successful wait.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Convergence {
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Probe invocations dispatched before the wait ended.
    pub probes: u32,
}

/// Probe `target` every `settings.interval` until it is satisfied, a probe
/// fails, or `settings.timeout` elapses.
///
/// Probes may overlap when one takes longer than the interval, so they must
/// be read-only.
pub async fn poll_until<F, Fut>(
    target: &str,
    settings: PollSettings,
    probe: F,
) -> Result<Convergence>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProbeOutcome>> + Send + 'static,
{
    if settings.interval.is_zero() {
        return Err(DeployError::InvalidSpec("poll interval must be positive".into()));
    }

    let started_at = Utc::now();
    let start = Instant::now();
    let dispatched = Arc::new(AtomicU32::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<()>>();

    let ticker = {
        let probe = Arc::new(probe);
        let dispatched = dispatched.clone();
        let target = target.to_string();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(settings.interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let attempt = dispatched.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt > 1 {
                    tracing::info!(
                        resource = %target,
                        elapsed_secs = start.elapsed().as_secs(),
                        "waiting"
                    );
                }

                let probe = probe.clone();
                let tx = tx.clone();
                let target = target.clone();
                tokio::spawn(async move {
                    let signal = match probe().await {
                        Ok(ProbeOutcome::Satisfied) => Ok(()),
                        Ok(outcome) => {
                            tracing::debug!(
                                resource = %target,
                                attempt,
                                ?outcome,
                                "not converged"
                            );
                            return;
                        }
                        Err(e) => Err(e),
                    };
                    if let Err(mpsc::error::SendError(late)) = tx.send(signal) {
                        tracing::debug!(
                            resource = %target,
                            attempt,
                            error = ?late.err(),
                            "discarding probe result after wait ended"
                        );
                    }
                });
            }
        })
    };

    let first = tokio::time::timeout(settings.timeout, rx.recv()).await;
    ticker.abort();
    rx.close();
    while let Ok(extra) = rx.try_recv() {
        tracing::debug!(
            resource = %target,
            error = ?extra.err(),
            "discarding extra probe result"
        );
    }

    let elapsed = start.elapsed();
    match first {
        Ok(Some(Ok(()))) => {
            tracing::info!(resource = %target, elapsed_secs = elapsed.as_secs(), "converged");
            Ok(Convergence {
                target: target.to_string(),
                started_at,
                elapsed,
                probes: dispatched.load(Ordering::SeqCst),
            })
        }
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Err(DeployError::Platform(format!(
            "poller for [{target}] stopped unexpectedly"
        ))),
        Err(_) => Err(DeployError::Timeout {
            target: target.to_string(),
            elapsed,
        }),
    }
}
