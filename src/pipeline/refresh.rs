// SPDX-License-Identifier: GPL-3.0-only

//! Display-refresh pacing for the render thread

use crate::errors::RefreshError;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Blocks the render thread until the next display refresh
pub trait RefreshClock: Send + Sync {
    fn wait_for_refresh(&self) -> Result<(), RefreshError>;
}

/// Fixed-rate refresh clock for hosts without a vblank signal.
///
/// Deadlines advance by whole periods; if the caller falls behind by more
/// than one period the schedule restarts from now instead of bursting.
#[derive(Debug)]
pub struct IntervalRefreshClock {
    period: Duration,
    next_deadline: Mutex<Option<Instant>>,
}

impl IntervalRefreshClock {
    pub fn new(rate_hz: u32) -> Self {
        let rate_hz = rate_hz.max(1);
        Self {
            period: Duration::from_secs_f64(1.0 / f64::from(rate_hz)),
            next_deadline: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl RefreshClock for IntervalRefreshClock {
    fn wait_for_refresh(&self) -> Result<(), RefreshError> {
        let deadline = {
            let mut next = self
                .next_deadline
                .lock()
                .map_err(|_| RefreshError("refresh clock poisoned".to_string()))?;
            let now = Instant::now();
            let deadline = match *next {
                Some(d) if d + self.period > now => d,
                _ => now + self.period,
            };
            *next = Some(deadline + self.period);
            deadline
        };

        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        Ok(())
    }
}
