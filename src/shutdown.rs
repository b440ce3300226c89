//! Graceful shutdown coordinator.
//!
//! Listens for SIGINT (Ctrl+C), SIGTERM, and SIGHUP, then cancels a
//! [`tokio_util::sync::CancellationToken`] so the poll loop can finish its
//! current pass and flush its checkpoint before exiting. A second signal
//! force-exits.

use tokio_util::sync::CancellationToken;

/// Install signal handlers and return a [`CancellationToken`] that is
/// cancelled on the first SIGINT / SIGTERM / SIGHUP. A second signal
/// force-exits the process.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();

    let guard = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Received shutdown signal, finishing current poll...");
        tracing::info!("Press Ctrl+C again to force exit");
        guard.cancel();

        wait_for_signal().await;
        tracing::warn!("Force exit requested");
        std::process::exit(130);
    });

    token
}

/// Resolves when any shutdown signal arrives.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    // Registration can fail in odd sandboxes; Ctrl+C alone still works.
    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sighup = signal(SignalKind::hangup()).ok();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = recv(&mut sigterm) => {}
        _ = recv(&mut sighup) => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(unix)]
async fn recv(stream: &mut Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending().await,
    }
}
