//! A cancellable background reader shared by the serial and simulated links.

use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to a spawned read loop.
///
/// The loop receives a [`oneshot::Receiver`] and must exit promptly once it
/// resolves.  Dropping the handle without calling [`stop`](Self::stop) also
/// signals the loop, but does not wait for it.
pub struct ReadTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ReadTask {
    /// Spawns `body` with the stop signal it must watch.
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(body(stop_rx));
        Self { stop, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the loop and waits for it to exit.
    ///
    /// A loop that already ended on its own is not an error.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            warn!("read task ended abnormally: {e}");
        }
    }
}
