use crate::error::{Result, with_timeout};

use std::time::Duration;
use tokio::sync::Notify;

/// Count-down latch whose waiters are async tasks.
#[derive(Debug)]
pub struct CountDownLatch {
    remaining: parking_lot::Mutex<usize>,
    notify: Notify,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: parking_lot::Mutex::new(count),
            notify: Notify::new(),
        }
    }

    pub fn count(&self) -> usize {
        *self.remaining.lock()
    }

    /// Returns the remaining count, or `None` when the latch was already open.
    pub fn count_down(&self) -> Option<usize> {
        let left = {
            let mut remaining = self.remaining.lock();
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
            *remaining
        };
        if left == 0 {
            self.notify.notify_waiters();
        }
        Some(left)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub async fn wait_timeout(&self, timeout: Option<Duration>, what: &str) -> Result<()> {
        with_timeout(timeout, || what.to_string(), async {
            self.wait().await;
            Ok(())
        })
        .await
    }
}
