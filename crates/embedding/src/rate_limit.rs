//! Sliding-window rate limiter with refund support. Tracks requests over a
//! configurable window and reports how long to wait once the window fills,
//! so an HTTP-backed provider can throttle itself ahead of a 429 (§4.2).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitToken {
  timestamp: Instant,
  id: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
  pub max_requests: usize,
  pub window: Duration,
  pub max_wait: Duration,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      max_requests: 60,
      window: Duration::from_secs(10),
      max_wait: Duration::from_secs(30),
    }
  }
}

impl RateLimitConfig {
  pub fn new(max_requests: usize, window: Duration) -> Self {
    Self {
      max_requests,
      window,
      max_wait: Duration::from_secs(30),
    }
  }

  pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
    self.max_wait = max_wait;
    self
  }
}

#[derive(Debug)]
pub struct SlidingWindowLimiter {
  config: RateLimitConfig,
  request_records: VecDeque<(Instant, u64)>,
  next_token_id: u64,
}

impl SlidingWindowLimiter {
  pub fn new(config: RateLimitConfig) -> Self {
    let capacity = config.max_requests + 1;
    Self {
      config,
      request_records: VecDeque::with_capacity(capacity),
      next_token_id: 0,
    }
  }

  fn prune_expired(&mut self) {
    let cutoff = Instant::now() - self.config.window;
    while let Some(&(oldest_ts, _)) = self.request_records.front() {
      if oldest_ts < cutoff {
        self.request_records.pop_front();
      } else {
        break;
      }
    }
  }

  fn check_and_wait_time(&mut self) -> Option<Duration> {
    self.prune_expired();
    if self.request_records.len() < self.config.max_requests {
      return None;
    }
    let &(oldest_ts, _) = self.request_records.front()?;
    let expires_at = oldest_ts + self.config.window;
    let now = Instant::now();
    if expires_at > now { Some(expires_at - now) } else { None }
  }

  pub fn record_request_with_token(&mut self) -> RateLimitToken {
    let ts = Instant::now();
    let id = self.next_token_id;
    self.next_token_id = self.next_token_id.wrapping_add(1);
    self.request_records.push_back((ts, id));
    RateLimitToken { timestamp: ts, id }
  }

  /// Refund a slot for a request that failed before it could have consumed
  /// the provider's rate-limit capacity (network error, timeout, 5xx).
  pub fn refund(&mut self, token: RateLimitToken) -> bool {
    if let Some(pos) = self.request_records.iter().position(|&(ts, id)| ts == token.timestamp && id == token.id) {
      self.request_records.remove(pos);
      trace!(token_id = token.id, "rate limit slot refunded");
      true
    } else {
      false
    }
  }

  pub fn check_and_record_with_token(&mut self) -> Result<RateLimitToken, Duration> {
    match self.check_and_wait_time() {
      None => Ok(self.record_request_with_token()),
      Some(duration) => Err(duration),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn under_limit_never_waits() {
    let mut limiter = SlidingWindowLimiter::new(RateLimitConfig::new(5, Duration::from_secs(1)));
    for _ in 0..5 {
      assert!(limiter.check_and_record_with_token().is_ok());
    }
  }

  #[test]
  fn at_limit_reports_wait() {
    let mut limiter = SlidingWindowLimiter::new(RateLimitConfig::new(2, Duration::from_secs(10)));
    limiter.check_and_record_with_token().unwrap();
    limiter.check_and_record_with_token().unwrap();
    let err = limiter.check_and_record_with_token().unwrap_err();
    assert!(err <= Duration::from_secs(10));
  }

  #[test]
  fn refund_restores_capacity() {
    let mut limiter = SlidingWindowLimiter::new(RateLimitConfig::new(1, Duration::from_secs(10)));
    let token = limiter.check_and_record_with_token().unwrap();
    assert!(limiter.check_and_record_with_token().is_err());
    limiter.refund(token);
    assert!(limiter.check_and_record_with_token().is_ok());
  }

  #[test]
  fn refund_of_unknown_token_is_a_no_op() {
    let mut limiter = SlidingWindowLimiter::new(RateLimitConfig::new(5, Duration::from_secs(10)));
    let fake = RateLimitToken {
      timestamp: Instant::now(),
      id: 9999,
    };
    assert!(!limiter.refund(fake));
  }
}
