//! Waiting on eventually consistent platform state.
//!
//! Every resource that has to settle before the next step (a table becoming
//! `ACTIVE`, a database instance becoming `available`, a freshly created role
//! becoming assumable) goes through the two functions here, so backoff and
//! timeouts behave the same everywhere.

use std::{future::Future, time::Duration};

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio_util::sync::CancellationToken;

/// Configuration for exponential backoff.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Delay after the first unsuccessful check
    pub initial_delay: Duration,
    /// Cap for exponential growth
    pub max_delay: Duration,
    /// Maximum total time before giving up
    pub timeout: Duration,
    pub jitter: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
            jitter: true,
        }
    }
}

impl WaitConfig {
    /// For resources that take many minutes, like database instances and
    /// auto scaling groups draining their instances.
    pub fn slow() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(30 * 60),
            jitter: true,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            // The timeout ends the schedule, not a number of attempts
            .without_max_times();
        let builder = if self.jitter {
            builder.with_jitter()
        } else {
            builder
        };
        builder.build()
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
async fn sleep_or_cancel(
    delay: Duration,
    cancel: Option<&CancellationToken>,
    name: &str,
) -> anyhow::Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        } => anyhow::bail!("Wait for {name} cancelled"),
    }
}

/// Polls `check` until it returns `Ok(true)`.
///
/// Errors returned by `check` end the wait immediately. The wait also ends
/// with an error once `config.timeout` has elapsed or `cancel` fires.
pub async fn wait_for<F, Fut>(
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
    name: &str,
    check: F,
) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let start = std::time::Instant::now();
    let mut delays = config.delays();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if cancel.is_some_and(|token| token.is_cancelled()) {
            anyhow::bail!("Wait for {name} cancelled");
        }
        if start.elapsed() >= config.timeout {
            anyhow::bail!(
                "Timeout waiting for {name} after {:?} ({attempts} attempts)",
                config.timeout
            );
        }

        match check().await {
            Ok(true) => {
                log::debug!("{name} is ready after {attempts} attempt(s)");
                return Ok(());
            }
            Ok(false) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                log::debug!(
                    "{name} is not ready (attempt {attempts}), checking again in {}ms",
                    delay.as_millis()
                );
                sleep_or_cancel(delay, cancel, name).await?;
            }
            Err(e) => {
                log::warn!("checking {name} failed: {e}");
                return Err(e);
            }
        }
    }
}

/// Runs `op` until it succeeds, retrying the errors `is_retryable` accepts.
///
/// Any other error, a timeout or a cancellation returns the last error.
pub async fn retry<T, E, F, Fut>(
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
    name: &str,
    is_retryable: impl Fn(&E) -> bool,
    op: F,
) -> Result<T, E>
where
    E: core::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let mut delays = config.delays();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match op().await {
            Ok(t) => return Ok(t),
            Err(e) if is_retryable(&e) && start.elapsed() < config.timeout => {
                let delay = delays.next().unwrap_or(config.max_delay);
                log::debug!(
                    "{name} failed with a retryable error (attempt {attempts}), retrying in {}ms: {e}",
                    delay.as_millis()
                );
                if sleep_or_cancel(delay, cancel, name).await.is_err() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    fn quick() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
            jitter: false,
        }
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let config = WaitConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
            jitter: false,
        };
        let delays: Vec<_> = config.delays().take(8).map(|d| d.as_millis()).collect();
        assert_eq!(
            vec![500, 1000, 2000, 4000, 8000, 10000, 10000, 10000],
            delays
        );
    }

    #[tokio::test]
    async fn ready_immediately() {
        wait_for(&WaitConfig::default(), None, "table", || async { Ok(true) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn polls_until_ready() {
        let counter = Arc::new(AtomicU32::new(0));
        wait_for(&quick(), None, "instance", || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await
        .unwrap();
        assert_eq!(3, counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn times_out() {
        let config = quick().with_timeout(Duration::from_millis(100));
        let err = wait_for(&config, None, "group", || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Timeout waiting for group"));
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = wait_for(&quick(), Some(&cancel), "group", || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn check_errors_are_returned() {
        let err = wait_for(&quick(), None, "role", || async {
            anyhow::bail!("AccessDenied")
        })
        .await
        .unwrap_err();
        assert_eq!("AccessDenied", err.to_string());
    }

    #[tokio::test]
    async fn retry_only_retries_what_it_is_told_to() {
        let counter = Arc::new(AtomicU32::new(0));
        let value = retry(
            &quick(),
            None,
            "create function",
            |e: &String| e == "propagating",
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("propagating".to_owned())
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(7, value);
        assert_eq!(3, counter.load(Ordering::SeqCst));

        let counter = Arc::new(AtomicU32::new(0));
        let err = retry(
            &quick(),
            None,
            "create function",
            |e: &String| e == "propagating",
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("denied".to_owned())
                }
            },
        )
        .await
        .unwrap_err();
        assert_eq!("denied", err);
        assert_eq!(1, counter.load(Ordering::SeqCst));
    }
}
