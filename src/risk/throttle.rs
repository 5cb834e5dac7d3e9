//! Sliding-window request throttling.
//!
//! A [`RateWindow`] holds the instants of admitted requests and is pruned on
//! every access, so every retained instant lies within `[now - window, now]`.
//! [`SlidingWindowThrottle`] wraps one window with a clock and adds the
//! async wait-for-slot loop.

use crate::error::{Result, RiskError};
use crate::utils::Clock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Admitted-request instants for one asset.
#[derive(Debug, Clone)]
pub struct RateWindow {
    instants: VecDeque<Duration>,
    limit: usize,
    window: Duration,
}

impl RateWindow {
    pub fn new(limit: usize, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(RiskError::invalid_parameter("rate_limit", limit, "must be at least 1"));
        }
        if window.is_zero() {
            return Err(RiskError::invalid_parameter(
                "time_window",
                format!("{window:?}"),
                "must be positive",
            ));
        }
        Ok(Self {
            instants: VecDeque::with_capacity(limit),
            limit,
            window,
        })
    }

    /// Drop instants strictly older than `now - window`.
    pub fn prune(&mut self, now: Duration) {
        if let Some(cutoff) = now.checked_sub(self.window) {
            while self.instants.front().is_some_and(|t| *t < cutoff) {
                self.instants.pop_front();
            }
        }
    }

    pub fn can_proceed(&mut self, now: Duration) -> bool {
        self.prune(now);
        self.instants.len() < self.limit
    }

    /// Append `now` without checking the limit.
    pub fn record(&mut self, now: Duration) {
        self.instants.push_back(now);
    }

    /// Time until the oldest retained instant leaves the window. Zero when a
    /// slot is already free.
    pub fn retry_after(&mut self, now: Duration) -> Duration {
        if self.can_proceed(now) {
            return Duration::ZERO;
        }
        match self.instants.front() {
            Some(oldest) => (*oldest + self.window + Duration::from_nanos(1)).saturating_sub(now),
            None => Duration::ZERO,
        }
    }

    pub fn len(&self) -> usize {
        self.instants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Rate gate for a single stream of requests.
pub struct SlidingWindowThrottle {
    asset: String,
    window: Mutex<RateWindow>,
    clock: Arc<dyn Clock>,
    span: tracing::Span,
}

impl SlidingWindowThrottle {
    pub fn new(
        asset: impl Into<String>,
        rate_limit: usize,
        time_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let asset = asset.into();
        let window = RateWindow::new(rate_limit, time_window)?;
        let span = tracing::info_span!("throttle", asset = %asset);
        info!(parent: &span, rate_limit, ?time_window, "throttle initialized");
        Ok(Self {
            asset,
            window: Mutex::new(window),
            clock,
            span,
        })
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    /// Whether a request made now would be admitted. Does not record.
    pub fn can_proceed(&self) -> bool {
        let now = self.clock.now();
        self.window.lock().can_proceed(now)
    }

    /// Admit and record a request, or fail with the time until a slot frees.
    pub fn record_request(&self) -> Result<()> {
        let now = self.clock.now();
        let mut window = self.window.lock();
        if !window.can_proceed(now) {
            let retry_after = window.retry_after(now);
            warn!(parent: &self.span, ?retry_after, "rate limit exceeded");
            return Err(RiskError::RateLimitExceeded {
                asset: self.asset.clone(),
                limit: window.limit(),
                window: window.window(),
                retry_after,
            });
        }
        window.record(now);
        debug!(parent: &self.span, in_window = window.len(), "request recorded");
        Ok(())
    }

    /// Suspend until a slot is free, then record the request. The wait is
    /// recomputed on every iteration since other callers may take the slot.
    pub async fn wait_for_slot(&self) {
        loop {
            let wait = {
                let now = self.clock.now();
                let mut window = self.window.lock();
                if window.can_proceed(now) {
                    window.record(now);
                    debug!(parent: &self.span, in_window = window.len(), "request recorded");
                    return;
                }
                window.retry_after(now)
            };
            info!(parent: &self.span, ?wait, "rate limit reached, waiting for slot");
            tokio::time::sleep(wait).await;
        }
    }

    /// [`wait_for_slot`](Self::wait_for_slot) bounded by `timeout`.
    pub async fn wait_for_slot_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.wait_for_slot())
            .await
            .map_err(|_| RiskError::SlotWaitTimeout {
                asset: self.asset.clone(),
                waited: timeout,
            })
    }

    /// Requests currently inside the window.
    pub fn in_window(&self) -> usize {
        let now = self.clock.now();
        let mut window = self.window.lock();
        window.prune(now);
        window.len()
    }
}
