use backon::{ConstantBuilder, Retryable};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::controller::ServiceController;
use crate::error::StewardError;

#[derive(Debug)]
struct NotReady(u32);

/// Polls `is_ready` at a fixed interval, at most `attempts` times.
/// Returns the attempt on which the service answered.
pub(crate) async fn wait_until_ready(
    controller: &dyn ServiceController,
    attempts: u32,
    interval: Duration,
) -> Result<u32, StewardError> {
    let attempts = attempts.max(1);
    let policy = ConstantBuilder::default()
        .with_delay(interval)
        .with_max_times((attempts - 1) as usize);

    let polls = AtomicU32::new(0);
    let polls_ref = &polls;

    let result = (move || async move {
        let attempt = polls_ref.fetch_add(1, Ordering::Relaxed) + 1;
        if controller.is_ready().await {
            Ok(attempt)
        } else {
            Err(NotReady(attempt))
        }
    })
    .retry(policy)
    .notify(|err: &NotReady, delay: Duration| {
        debug!(attempt = err.0, ?delay, "service not ready yet");
    })
    .await;

    result.map_err(|_| StewardError::NotReady {
        attempts: polls.load(Ordering::Relaxed),
    })
}
