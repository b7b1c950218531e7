//! `retryEmbedding`: attempt an embedding call, and on failure sleep
//! `backoffBaseMs * 2^(attempt-1)` before retrying, up to `maxAttempts`
//! times, surfacing the final error (§4.2).

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff_base_ms: 1000,
    }
  }
}

impl RetryConfig {
  /// Backoff before the nth retry (`attempt` is 1-based: the delay before
  /// the 2nd call is `backoff_for(1)`).
  pub fn backoff_for(&self, attempt: u32) -> Duration {
    let millis = self.backoff_base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)));
    Duration::from_millis(millis)
  }
}

/// Run `op` up to `config.max_attempts` times, sleeping
/// `backoffBaseMs * 2^(attempt-1)` between attempts. Returns the last error
/// if every attempt fails.
pub async fn retry_embedding<F, Fut, T, E>(config: RetryConfig, mut op: F) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: std::fmt::Display,
{
  let mut last_err = None;
  for attempt in 1..=config.max_attempts {
    match op().await {
      Ok(value) => {
        if attempt > 1 {
          debug!(attempt, "embedding call succeeded after retry");
        }
        return Ok(value);
      }
      Err(e) => {
        if attempt < config.max_attempts {
          let backoff = config.backoff_for(attempt);
          warn!(attempt, max_attempts = config.max_attempts, backoff_ms = backoff.as_millis(), error = %e, "embedding attempt failed, retrying");
          sleep(backoff).await;
        }
        last_err = Some(e);
      }
    }
  }
  Err(last_err.expect("max_attempts >= 1 guarantees at least one iteration"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[test]
  fn backoff_follows_2_pow_attempt_minus_1() {
    let config = RetryConfig::default();
    assert_eq!(config.backoff_for(1), Duration::from_millis(1000));
    assert_eq!(config.backoff_for(2), Duration::from_millis(2000));
    assert_eq!(config.backoff_for(3), Duration::from_millis(4000));
  }

  #[tokio::test(start_paused = true)]
  async fn succeeds_without_retry_on_first_attempt() {
    let calls = AtomicU32::new(0);
    let result: Result<u32, &str> = retry_embedding(RetryConfig::default(), || async {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok(42)
    })
    .await;
    assert_eq!(result, Ok(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn succeeds_on_second_attempt_after_one_failure() {
    let calls = AtomicU32::new(0);
    let result: Result<u32, &str> = retry_embedding(RetryConfig::default(), || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move { if n == 0 { Err("transient") } else { Ok(7) } }
    })
    .await;
    assert_eq!(result, Ok(7));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn surfaces_final_error_after_exhausting_attempts() {
    let calls = AtomicU32::new(0);
    let result: Result<u32, &str> = retry_embedding(RetryConfig::default(), || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err("permanent") }
    })
    .await;
    assert_eq!(result, Err("permanent"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }
}
