#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests, benchmarks and examples of the `shared_box` package.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout to prevent infinite hangs.
///
/// The test runs on a separate thread. If it takes longer than the timeout to complete, the
/// calling test fails instead of hanging the CI/build system.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under Miri, where thread
/// synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled and
/// the test function is executed directly, so mutation testing can detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode) and propagates
/// any panic raised by the test itself.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if is_mutation_testing() {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = watchdog_timeout();

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test exceeded {timeout:?} timeout");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("Test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

// Thread synchronization under Miri is dramatically slower.
const WATCHDOG_TIMEOUT_MIRI: Duration = Duration::from_secs(60);

fn watchdog_timeout() -> Duration {
    if cfg!(miri) {
        WATCHDOG_TIMEOUT_MIRI
    } else {
        WATCHDOG_TIMEOUT
    }
}

fn is_mutation_testing() -> bool {
    std::env::var("MUTATION_TESTING").as_deref() == Ok("1")
}

/// Counts how many [`Tracked`] values created from it have been dropped.
///
/// Clones share the same count, so a counter can be moved into a deleter or another thread
/// while the test keeps a copy for assertions.
///
/// # Example
///
/// ```rust
/// use testing::DropCounter;
///
/// let counter = DropCounter::new();
///
/// let tracked = counter.tracked();
/// assert_eq!(counter.drops(), 0);
///
/// drop(tracked);
/// assert_eq!(counter.drops(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    /// Creates a counter that has seen no drops.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a value that increments this counter when dropped.
    #[must_use]
    pub fn tracked(&self) -> Tracked {
        Tracked {
            drops: Arc::clone(&self.drops),
        }
    }

    /// How many values created by [`tracked()`][Self::tracked] have been dropped so far.
    #[must_use]
    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::Acquire)
    }
}

/// A value that increments its [`DropCounter`] when dropped.
#[derive(Debug)]
pub struct Tracked {
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn watchdog_returns_correct_value() {
        let result = with_watchdog(|| "hello world");
        assert_eq!(result, "hello world");
    }

    #[test]
    #[should_panic(expected = "shared_box test failure")]
    fn watchdog_propagates_test_panic() {
        with_watchdog(|| panic!("shared_box test failure"));
    }

    #[test]
    fn watchdog_timeout_is_never_shorter_than_default() {
        assert!(watchdog_timeout() >= WATCHDOG_TIMEOUT);
    }

    #[test]
    fn watchdog_counts_drops_on_its_own_thread() {
        let counter = DropCounter::new();
        let tracked = counter.tracked();

        with_watchdog(move || drop(tracked));

        assert_eq!(counter.drops(), 1);
    }

    #[test]
    fn drop_counter_counts_each_drop() {
        let counter = DropCounter::new();

        let first = counter.tracked();
        let second = counter.clone().tracked();

        drop(first);
        assert_eq!(counter.drops(), 1);

        drop(second);
        assert_eq!(counter.drops(), 2);
    }

    #[test]
    fn drop_counter_counts_across_threads() {
        let counter = DropCounter::new();
        let tracked = counter.tracked();

        thread::spawn(move || drop(tracked)).join().unwrap();

        assert_eq!(counter.drops(), 1);
    }
}
