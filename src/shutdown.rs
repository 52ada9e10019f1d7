//! Daemon-wide graceful shutdown (spec.md §6 Process surface). A single
//! `tokio::sync::broadcast` channel fans the signal out to every run
//! coordinator task, which aborts its run as `stopped` rather than
//! `failed` on receipt — distinct from the per-run `stop()` the control
//! surface exposes, though both share the coordinator's grace-period drain.

use tokio::sync::broadcast;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Registers SIGINT/SIGTERM (Ctrl-C on non-Unix) and broadcasts once on the
/// first one received. Returns the task handle so the caller can await it
/// during its own shutdown sequence.
pub fn setup_signal_shutdown_handler(shutdown_tx: &broadcast::Sender<()>) -> tokio::task::JoinHandle<()> {
    let shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut shutdown_rx = shutdown_tx.subscribe();

        #[cfg(unix)]
        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                tracing::warn!("failed to register SIGTERM handler: {err}");
                None
            }
        };

        #[cfg(unix)]
        {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = tokio::signal::ctrl_c() => {
                    drop(shutdown_tx.send(()));
                }
                () = async {
                    if let Some(signal) = term_signal.as_mut() {
                        signal.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => {
                    drop(shutdown_tx.send(()));
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = tokio::signal::ctrl_c() => {
                    drop(shutdown_tx.send(()));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    fn run_async_test<F>(future: F) -> Result<(), String>
    where
        F: Future<Output = Result<(), String>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| format!("failed to build runtime: {err}"))?;
        runtime.block_on(future)
    }

    #[test]
    fn signal_handler_exits_on_broadcast() -> Result<(), String> {
        run_async_test(async {
            let (shutdown_tx, _) = broadcast::channel::<()>(1);
            let handle = setup_signal_shutdown_handler(&shutdown_tx);

            tokio::time::sleep(Duration::from_millis(10)).await;
            if shutdown_tx.send(()).is_err() {
                return Err("failed to send shutdown".to_owned());
            }

            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .map_err(|err| format!("timed out waiting for shutdown handler: {err}"))?
                .map_err(|err| format!("shutdown task join error: {err}"))?;
            Ok(())
        })
    }
}
