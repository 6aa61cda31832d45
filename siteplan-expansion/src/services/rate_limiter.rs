//! Global AI dispatch limiter
//!
//! One instance is shared by every job. It enforces two limits:
//! - concurrent in-flight calls (semaphore)
//! - calls per hour (governor GCRA quota)
//!
//! Each wait on either limit is bounded by `max_retry_wait` and retried up to
//! `max_dispatch_retries` times in total. Past that the caller demotes the
//! candidate instead of blocking the job.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::RateLimitConfig;

#[derive(Debug, Error, PartialEq)]
pub enum DispatchDenied {
    #[error("all {0} AI call slots busy")]
    ConcurrencySaturated(usize),

    #[error("hourly AI call quota exhausted, next slot in {0:?}")]
    HourlyQuota(Duration),
}

/// Held for the duration of one AI call
pub struct DispatchPermit {
    _permit: OwnedSemaphorePermit,
}

pub struct AiDispatchLimiter {
    concurrency: Arc<Semaphore>,
    max_concurrent: usize,
    hourly: DefaultDirectRateLimiter,
    max_retry_wait: Duration,
    max_retries: u32,
}

impl AiDispatchLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let max_concurrent = config.max_concurrent_calls.max(1);
        let per_hour = NonZeroU32::new(config.hourly_call_limit).unwrap_or(NonZeroU32::MIN);
        Self {
            concurrency: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            hourly: RateLimiter::direct(Quota::per_hour(per_hour)),
            max_retry_wait: config.max_retry_wait(),
            max_retries: config.max_dispatch_retries,
        }
    }

    /// Calls currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.concurrency.available_permits()
    }

    /// Wait for a call slot and an hourly quota cell
    ///
    /// Both limits draw on one budget of `max_retries` retries.
    pub async fn acquire(&self) -> Result<DispatchPermit, DispatchDenied> {
        let mut attempt = 0;
        let permit = loop {
            match tokio::time::timeout(self.max_retry_wait, self.concurrency.clone().acquire_owned()).await {
                Ok(Ok(permit)) => break permit,
                Ok(Err(_)) => return Err(DispatchDenied::ConcurrencySaturated(self.max_concurrent)),
                Err(_) if attempt >= self.max_retries => {
                    return Err(DispatchDenied::ConcurrencySaturated(self.max_concurrent));
                }
                Err(_) => {
                    attempt += 1;
                    debug!(attempt, in_flight = self.in_flight(), "AI call slots busy, retrying");
                }
            }
        };

        loop {
            match self.hourly.check() {
                Ok(()) => return Ok(DispatchPermit { _permit: permit }),
                Err(not_until) => {
                    let wait = not_until.wait_time_from(DefaultClock::default().now());
                    if wait > self.max_retry_wait || attempt >= self.max_retries {
                        return Err(DispatchDenied::HourlyQuota(wait));
                    }
                    attempt += 1;
                    debug!(attempt, wait_ms = wait.as_millis() as u64, "Hourly AI quota busy, retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
