use crate::domain::model::{ExtractRef, ExtractStatus};
use crate::domain::ports::ExtractService;
use crate::utils::error::{NhgisError, Result};
use std::time::Duration;
use tokio::time::Instant;

/// Shortest wait between two polls, whatever the options say.
pub const MIN_POLL_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    pub initial_wait: Duration,
    pub max_wait: Duration,
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(300),
            timeout: None,
        }
    }
}

/// Polls the status of `extract` until it completes.
///
/// The wait between polls starts at `initial_wait` and doubles up to
/// `max_wait`, never below [`MIN_POLL_WAIT`]. Failed, canceled and missing
/// extracts end the wait with an error.
pub async fn wait_for_extract<S>(
    service: &S,
    extract: &ExtractRef,
    options: &PollOptions,
) -> Result<ExtractStatus>
where
    S: ExtractService + ?Sized,
{
    let started = Instant::now();
    let mut wait = options.initial_wait.max(MIN_POLL_WAIT);
    let max_wait = options.max_wait.max(wait);
    let mut polls: u32 = 0;

    loop {
        let status = service.extract_status(extract).await?;
        polls += 1;
        tracing::info!("{} is {} (poll #{})", extract, status, polls);

        match status {
            ExtractStatus::Completed => return Ok(status),
            ExtractStatus::Failed | ExtractStatus::Canceled => {
                return Err(NhgisError::ExtractFailed {
                    collection: extract.collection.clone(),
                    number: extract.number,
                    status: status.to_string(),
                })
            }
            ExtractStatus::NotFound => {
                return Err(NhgisError::ExtractNotFound {
                    collection: extract.collection.clone(),
                    number: extract.number,
                })
            }
            _ => {}
        }

        let mut sleep_for = wait;
        if let Some(timeout) = options.timeout {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(NhgisError::PollTimeout {
                    collection: extract.collection.clone(),
                    number: extract.number,
                    seconds: timeout.as_secs(),
                });
            }
            sleep_for = sleep_for.min(timeout - elapsed);
        }

        tracing::debug!("Waiting {:?} before polling {} again", sleep_for, extract);
        tokio::time::sleep(sleep_for).await;
        wait = wait.saturating_mul(2).min(max_wait);
    }
}
