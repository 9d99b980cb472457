use std::{future::Future, pin::Pin, sync::Arc};

pub type InterruptFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Creates a future resolving when the pending login should be cancelled.
///
/// Called once per interactive login attempt, right before waiting for the callback.
pub type InterruptSource = Arc<dyn Fn() -> InterruptFuture + Send + Sync>;

/// Resolves on Ctrl-C, or on SIGTERM on unix.
pub fn os_interrupt() -> InterruptFuture {
    Box::pin(async {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(?err, "Could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(err) => {
                    tracing::warn!(?err, "Could not listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => tracing::debug!("Received Ctrl-C"),
            () = terminate => tracing::debug!("Received SIGTERM"),
        }
    })
}

pub fn os_interrupt_source() -> InterruptSource {
    Arc::new(os_interrupt)
}
