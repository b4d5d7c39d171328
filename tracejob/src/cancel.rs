use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Drive `fut` to completion unless `token` is cancelled first.
///
/// Cancellation wins ties, so a caller never starts another remote call
/// after the token fired.
pub async fn run_until_cancelled<F>(token: &CancellationToken, fut: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = fut => Some(output),
    }
}

/// Sleep for `delay`; returns false if woken by cancellation.
pub async fn sleep_or_cancelled(token: &CancellationToken, delay: Duration) -> bool {
    run_until_cancelled(token, sleep(delay)).await.is_some()
}
