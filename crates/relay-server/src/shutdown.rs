//! Server-wide cancellation.
//!
//! One root token ends the listener. Every call runs on a child of it, so
//! closing the root ends every open SSE session on its next wait, while a
//! single call's token can be cancelled by its own transport without touching
//! the others.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Root cancellation for one [`RelayServer`](crate::RelayServer).
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    root: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token the listener stops on.
    pub fn serve_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Token for one call: cancelled with the server, or alone when its
    /// connection ends.
    pub fn call_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Stop accepting connections and cancel every open call.
    pub fn close(&self) {
        self.root.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Close, then give `tasks` up to `timeout` to finish.
    ///
    /// Returns `false` if the deadline passed first; the stragglers are left
    /// running.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.close();
        info!(tasks = tasks.len(), timeout_ms = timeout.as_millis(), "draining relay");
        match tokio::time::timeout(timeout, join_all(tasks)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(?timeout, "relay did not drain in time");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_until_closed() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_closing());
        coord.close();
        coord.close();
        assert!(coord.is_closing());
        assert!(coord.serve_token().is_cancelled());
    }

    #[test]
    fn closing_cancels_every_call() {
        let coord = ShutdownCoordinator::new();
        let calls = [coord.call_token(), coord.call_token()];
        coord.close();
        assert!(calls.iter().all(CancellationToken::is_cancelled));
    }

    #[test]
    fn ending_one_call_leaves_server_open() {
        let coord = ShutdownCoordinator::new();
        let ended = coord.call_token();
        let other = coord.call_token();
        ended.cancel();
        assert!(!other.is_cancelled());
        assert!(!coord.is_closing());
    }

    #[tokio::test]
    async fn drain_waits_for_sessions_to_see_close() {
        let coord = ShutdownCoordinator::new();
        let call = coord.call_token();
        let session = tokio::spawn(async move { call.cancelled().await });
        assert!(coord.drain(vec![session], Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_timeout() {
        let coord = ShutdownCoordinator::new();
        let stuck = tokio::spawn(tokio::time::sleep(Duration::from_secs(300)));
        assert!(!coord.drain(vec![stuck], Duration::from_millis(100)).await);
        assert!(coord.is_closing());
    }
}
