use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::debug;

/// Run `operation` once per entry in `delays`, sleeping for the entry before
/// each attempt. Stops at the first success or at the first error
/// `should_retry` rejects. An empty `delays` still makes one attempt.
pub(crate) async fn retry_with_delays<T, E, Op, Fut, P>(
    operation_name: &'static str,
    delays: &[Duration],
    should_retry: P,
    mut operation: Op,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let first = delays.first().copied().unwrap_or_default();
    if !first.is_zero() {
        tokio::time::sleep(first).await;
    }
    let mut result = operation().await;

    for (attempt, &delay) in delays.iter().enumerate().skip(1) {
        match &result {
            Ok(_) => break,
            Err(error) if !should_retry(error) => break,
            Err(error) => debug!("{operation_name} attempt {attempt} failed: {error}"),
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result = operation().await;
    }

    result
}
