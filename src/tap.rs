//! Tap Registry
//!
//! A tap is a subscriber that receives every flushed batch set, synchronously,
//! in registration order. Registration can happen from any thread while the
//! ingestion loop is fanning out, so both sides take the same bounded lock.
//!
//! Lock acquisition goes through `try_lock_for`: the guard only exists when the
//! lock was actually taken, and dropping it is the only way to release.

use crate::batch::BatchSnapshot;
use crate::error::{ListenerError, Result};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, error};

pub type TapError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber callback. Each call receives its own copy of the flushed batches.
pub trait Tap: Send {
    fn on_batches(
        &mut self,
        batches: BatchSnapshot,
        source_name: &str,
    ) -> std::result::Result<(), TapError>;
}

impl<F> Tap for F
where
    F: FnMut(BatchSnapshot, &str) -> std::result::Result<(), TapError> + Send,
{
    fn on_batches(
        &mut self,
        batches: BatchSnapshot,
        source_name: &str,
    ) -> std::result::Result<(), TapError> {
        self(batches, source_name)
    }
}

struct TapSubscription {
    tap: Box<dyn Tap>,
    subscriber: String,
}

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanOutStats {
    pub delivered: usize,
    pub failed: usize,
}

pub struct TapRegistry {
    source_name: String,
    lock_timeout: Duration,
    subscriptions: Mutex<Vec<TapSubscription>>,
}

impl std::fmt::Debug for TapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapRegistry")
            .field("source_name", &self.source_name)
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

impl TapRegistry {
    pub fn new(source_name: &str, lock_timeout: Duration) -> Self {
        TapRegistry {
            source_name: source_name.to_string(),
            lock_timeout,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn lock_timeout_error(&self) -> ListenerError {
        ListenerError::LockTimeout {
            lock: "tap requests",
            source_name: self.source_name.clone(),
        }
    }

    pub fn add_tap(&self, tap: Box<dyn Tap>, subscriber: &str) -> Result<()> {
        let mut subscriptions = self
            .subscriptions
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| self.lock_timeout_error())?;

        subscriptions.push(TapSubscription {
            tap,
            subscriber: subscriber.to_string(),
        });
        debug!(source = %self.source_name, subscriber, "tap registered");
        Ok(())
    }

    /// Deliver `snapshot` to every tap in registration order.
    ///
    /// A tap that errors or panics is logged and skipped; the rest still run.
    pub fn fan_out(&self, snapshot: &BatchSnapshot) -> Result<FanOutStats> {
        let mut subscriptions = self
            .subscriptions
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| self.lock_timeout_error())?;

        let mut stats = FanOutStats::default();
        for subscription in subscriptions.iter_mut() {
            let copy = snapshot.clone();
            let source_name = self.source_name.as_str();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                subscription.tap.on_batches(copy, source_name)
            }));

            match outcome {
                Ok(Ok(())) => stats.delivered += 1,
                Ok(Err(e)) => {
                    stats.failed += 1;
                    error!(
                        source = %self.source_name,
                        subscriber = %subscription.subscriber,
                        "tap failed: {}", e
                    );
                }
                Err(_) => {
                    stats.failed += 1;
                    error!(
                        source = %self.source_name,
                        subscriber = %subscription.subscriber,
                        "tap panicked"
                    );
                }
            }
        }

        Ok(stats)
    }

    pub fn snapshot_subscribers(&self) -> Result<Vec<String>> {
        let subscriptions = self
            .subscriptions
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| self.lock_timeout_error())?;
        Ok(subscriptions.iter().map(|s| s.subscriber.clone()).collect())
    }

    pub fn len(&self) -> Result<usize> {
        let subscriptions = self
            .subscriptions
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| self.lock_timeout_error())?;
        Ok(subscriptions.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn snapshot(bytes: &[u8]) -> BatchSnapshot {
        BatchSnapshot::from_batches(vec![bytes.to_vec()])
    }

    fn noop_tap() -> Box<dyn Tap> {
        Box::new(|_: BatchSnapshot, _: &str| -> std::result::Result<(), TapError> { Ok(()) })
    }

    #[test]
    fn test_fan_out_in_registration_order() {
        let registry = TapRegistry::new("uart0", Duration::from_secs(10));
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["A", "B", "C"] {
            let order = order.clone();
            let tap = move |_: BatchSnapshot, _: &str| -> std::result::Result<(), TapError> {
                order.lock().push(name);
                Ok(())
            };
            registry.add_tap(Box::new(tap), name).unwrap();
        }

        let stats = registry.fan_out(&snapshot(&[1, 2, 3])).unwrap();
        assert_eq!(stats, FanOutStats { delivered: 3, failed: 0 });
        assert_eq!(*order.lock(), vec!["A", "B", "C"]);
        assert_eq!(registry.snapshot_subscribers().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_failing_taps_do_not_stop_fan_out() {
        let registry = TapRegistry::new("uart0", Duration::from_secs(10));
        let seen = Arc::new(Mutex::new(Vec::new()));

        registry
            .add_tap(
                Box::new(|_: BatchSnapshot, _: &str| -> std::result::Result<(), TapError> {
                    Err("disk full".into())
                }),
                "erroring",
            )
            .unwrap();
        registry
            .add_tap(
                Box::new(|_: BatchSnapshot, _: &str| -> std::result::Result<(), TapError> {
                    panic!("tap bug")
                }),
                "panicking",
            )
            .unwrap();
        let sink = seen.clone();
        registry
            .add_tap(
                Box::new(
                    move |b: BatchSnapshot, source: &str| -> std::result::Result<(), TapError> {
                        sink.lock().push((b.to_flat(), source.to_string()));
                        Ok(())
                    },
                ),
                "healthy",
            )
            .unwrap();

        let stats = registry.fan_out(&snapshot(&[9, 8])).unwrap();
        assert_eq!(stats, FanOutStats { delivered: 1, failed: 2 });
        assert_eq!(*seen.lock(), vec![(vec![9, 8], "uart0".to_string())]);

        // Lock was released on every path
        assert_eq!(registry.len().unwrap(), 3);
    }

    #[test]
    fn test_each_tap_gets_its_own_copy() {
        let registry = TapRegistry::new("uart0", Duration::from_secs(10));
        let seen = Arc::new(Mutex::new(Vec::new()));

        registry
            .add_tap(
                Box::new(|mut b: BatchSnapshot, _: &str| -> std::result::Result<(), TapError> {
                    b.batches_mut()[0][0] = 0xFF;
                    Ok(())
                }),
                "mutator",
            )
            .unwrap();
        let sink = seen.clone();
        registry
            .add_tap(
                Box::new(move |b: BatchSnapshot, _: &str| -> std::result::Result<(), TapError> {
                    sink.lock().push(b.to_flat());
                    Ok(())
                }),
                "observer",
            )
            .unwrap();

        let original = snapshot(&[1, 2]);
        registry.fan_out(&original).unwrap();
        assert_eq!(*seen.lock(), vec![vec![1, 2]]);
        assert_eq!(original.to_flat(), vec![1, 2]);
    }

    #[test]
    fn test_lock_timeout_is_reported() {
        let registry = Arc::new(TapRegistry::new("uart0", Duration::from_millis(20)));
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        {
            let registry = registry.clone();
            let started = started.clone();
            let release = release.clone();
            registry
                .add_tap(
                    Box::new(move |_: BatchSnapshot, _: &str| -> std::result::Result<(), TapError> {
                        started.wait();
                        release.wait();
                        Ok(())
                    }),
                    "slow",
                )
                .unwrap();

            std::thread::spawn(move || {
                registry.fan_out(&BatchSnapshot::from_batches(vec![vec![0]])).unwrap();
            });
        }

        started.wait();
        let err = registry
            .add_tap(
                noop_tap(),
                "late",
            )
            .unwrap_err();
        assert!(matches!(err, ListenerError::LockTimeout { .. }));
        release.wait();
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(TapRegistry::new("uart0", Duration::from_secs(10)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .add_tap(
                            noop_tap(),
                            &format!("sub-{}", i),
                        )
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len().unwrap(), 8);
    }
}
