//! One-shot completion signals keyed by resource key.

use std::sync::{Condvar, Mutex};

/// Closed until the resource providing its key finishes, then open forever
///
/// Any number of threads may wait on a fence; opening it wakes all of them.
#[derive(Debug, Default)]
pub struct Fence {
    open: Mutex<bool>,
    signal: Condvar,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let mut open = match self.open.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *open = true;
        self.signal.notify_all();
    }

    /// Block until [`Fence::open`] has been called
    pub fn wait(&self) {
        let mut open = match self.open.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*open {
            open = match self.signal.wait(open) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    pub fn is_open(&self) -> bool {
        match self.open.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_open_releases_all_waiters() {
        let fence = Arc::new(Fence::new());
        let released = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let fence = Arc::clone(&fence);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    fence.wait();
                    released.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert!(!fence.is_open());

        fence.open();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_wait_after_open_returns() {
        let fence = Fence::new();
        fence.open();
        fence.wait();
        assert!(fence.is_open());
    }
}
