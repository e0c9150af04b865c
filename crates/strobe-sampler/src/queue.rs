use std::io;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

pub(crate) const QUEUE_THREAD_NAME: &str = "strobe.sampling-profiler.queue";

/// Serial timer queue: one background thread driving a current-thread tokio
/// runtime. Callbacks run one at a time on that thread.
pub(crate) struct TimerQueue {
    handle: tokio::runtime::Handle,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TimerQueue {
    pub(crate) fn new() -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown, stopped) = oneshot::channel::<()>();

        std::thread::Builder::new()
            .name(QUEUE_THREAD_NAME.into())
            .spawn(move || {
                runtime.block_on(async move {
                    let _ = stopped.await;
                });
                debug!("sampling queue stopped");
            })?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown),
        })
    }

    /// Runs `callback` on the queue thread once `delay` has elapsed.
    pub(crate) fn dispatch_after(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take()
            && shutdown.send(()).is_err()
        {
            warn!("sampling queue thread already gone");
        }
    }
}
