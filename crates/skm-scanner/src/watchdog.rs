// SPDX-License-Identifier: MIT OR Apache-2.0
//! A keepalive-armed watchdog for long scans.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::error;

struct Inner {
    deadline: Mutex<Instant>,
    interval: Duration,
    stopped: AtomicBool,
}

/// Fires an expiry action when no [`keepalive`](Watchdog::keepalive) arrives
/// within the interval.
///
/// Every crawl callback re-arms the deadline; a scan that stops making
/// progress (a hung clone, a wedged backend) is killed rather than left to
/// hang. The expiry action is injected so the binary can exit the process
/// while tests flip a flag.
pub struct Watchdog {
    inner: Arc<Inner>,
}

impl Watchdog {
    /// Start monitoring; `on_expire` runs at most once.
    pub fn start(interval: Duration, on_expire: impl FnOnce() + Send + 'static) -> Self {
        let inner = Arc::new(Inner {
            deadline: Mutex::new(Instant::now() + interval),
            interval,
            stopped: AtomicBool::new(false),
        });
        let watcher = Arc::clone(&inner);
        std::thread::spawn(move || {
            let poll = (interval / 10).clamp(Duration::from_millis(10), Duration::from_secs(1));
            loop {
                std::thread::sleep(poll);
                if watcher.stopped.load(Ordering::SeqCst) {
                    return;
                }
                let deadline = *watcher
                    .deadline
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if Instant::now() >= deadline {
                    error!(interval = ?watcher.interval, "watchdog expired without a keepalive");
                    on_expire();
                    return;
                }
            }
        });
        Self { inner }
    }

    /// Push the deadline out by one full interval.
    pub fn keepalive(&self) {
        let mut deadline = self
            .inner
            .deadline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *deadline = Instant::now() + self.inner.interval;
    }

    /// Stop monitoring without firing.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_without_keepalives() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let _watchdog = Watchdog::start(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(300));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn keepalives_hold_expiry_off() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let watchdog = Watchdog::start(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        });
        for _ in 0..10 {
            watchdog.keepalive();
            std::thread::sleep(Duration::from_millis(30));
        }
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_prevents_firing() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let watchdog = Watchdog::start(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        watchdog.stop();
        std::thread::sleep(Duration::from_millis(200));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
