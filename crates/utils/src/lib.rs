//! utils
//!
//! Small helpers shared between the services.

use std::time::Duration;

use anyhow::Result;

/// Run CPU-heavy work (big-integer exponentiation, HMAC over large
/// binaries) on the blocking pool so the calling connection task
/// yields its executor, and post the result back.
pub async fn offload<F, T>(work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await?)
}

/// An interval that ticks at a fixed period without trying to catch up
/// after a stall.
pub fn interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod test {
    use super::offload;

    #[tokio::test]
    async fn offload_returns_result() {
        let value = offload(|| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
    }
}
