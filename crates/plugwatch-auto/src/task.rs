//! Supervised background attempts
//!
//! An attempt runs as its own task; a supervisor task awaits it, turns a
//! panic or cancellation into [`AttemptOutcome::Failed`], logs the result,
//! and hands it to a completion callback. Whatever the work future owns
//! (notably its [`AttemptPermit`](crate::guard::AttemptPermit)) is dropped
//! before the callback runs.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{AttemptOrigin, AttemptOutcome};

/// Spawn `work` under supervision and call `on_complete` with its outcome
pub fn spawn_supervised<F, C>(
    runtime: &Handle,
    origin: AttemptOrigin,
    work: F,
    on_complete: C,
) -> JoinHandle<()>
where
    F: Future<Output = AttemptOutcome> + Send + 'static,
    C: FnOnce(AttemptOutcome) + Send + 'static,
{
    let attempt = runtime.spawn(work);

    runtime.spawn(async move {
        let outcome = match attempt.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                error!(%origin, "Auto-connect task panicked");
                AttemptOutcome::Failed("auto-connect task panicked".to_string())
            }
            Err(e) => AttemptOutcome::Failed(format!("auto-connect task cancelled: {}", e)),
        };

        match &outcome {
            AttemptOutcome::ConnectInvoked { port } => {
                info!(%origin, port = %port, "Auto-connect attempt finished")
            }
            AttemptOutcome::Failed(reason) => {
                warn!(%origin, "Auto-connect attempt failed: {}", reason)
            }
            other => debug!(%origin, outcome = ?other, "Auto-connect attempt finished"),
        }

        on_complete(outcome);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    async fn exploding_attempt() -> AttemptOutcome {
        panic!("enumerator exploded")
    }

    #[tokio::test]
    async fn test_outcome_reaches_callback() {
        let (tx, rx) = oneshot::channel();
        let handle = spawn_supervised(
            &Handle::current(),
            AttemptOrigin::Startup,
            async { AttemptOutcome::NoDevice },
            move |outcome| {
                let _ = tx.send(outcome);
            },
        );

        handle.await.unwrap();
        assert_eq!(rx.await.unwrap(), AttemptOutcome::NoDevice);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let (tx, rx) = oneshot::channel();
        let handle = spawn_supervised(
            &Handle::current(),
            AttemptOrigin::Hotplug,
            exploding_attempt(),
            move |outcome| {
                let _ = tx.send(outcome);
            },
        );

        handle.await.unwrap();
        assert!(matches!(rx.await.unwrap(), AttemptOutcome::Failed(_)));
    }
}
