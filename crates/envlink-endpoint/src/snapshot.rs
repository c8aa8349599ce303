//! Single-value publish/read slot.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;

/// Latest telemetry payload received on a link.
pub type TelemetrySnapshot = Snapshot<Bytes>;

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    seq: u64,
}

/// Holds the most recent value published by one writer.
///
/// `publish` replaces the value under the lock, so a reader sees either the
/// old value or the new one, never a mix. Every publish bumps a sequence
/// number that waiters use to detect a fresh value.
#[derive(Debug)]
pub struct Snapshot<T> {
    slot: Mutex<Slot<T>>,
    changed: Condvar,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                seq: 0,
            }),
            changed: Condvar::new(),
        }
    }
}

impl<T: Clone> Snapshot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value and wake waiters. Returns the new sequence number.
    pub fn publish(&self, value: T) -> u64 {
        let mut slot = self.lock();
        slot.value = Some(value);
        slot.seq += 1;
        let seq = slot.seq;
        drop(slot);
        self.changed.notify_all();
        seq
    }

    /// A copy of the current value, or `None` before the first publish.
    pub fn latest(&self) -> Option<T> {
        self.lock().value.clone()
    }

    /// Number of publishes so far.
    pub fn sequence(&self) -> u64 {
        self.lock().seq
    }

    /// Block until a value newer than sequence `after` exists, or `timeout`
    /// elapses.
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<(u64, T)> {
        let guard = self.lock();
        let (slot, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |slot| slot.seq <= after)
            .unwrap_or_else(PoisonError::into_inner);
        if slot.seq > after {
            slot.value.clone().map(|value| (slot.seq, value))
        } else {
            None
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn empty_until_first_publish() {
        let snapshot: Snapshot<u32> = Snapshot::new();
        assert_eq!(snapshot.latest(), None);
        assert_eq!(snapshot.sequence(), 0);

        assert_eq!(snapshot.publish(7), 1);
        assert_eq!(snapshot.latest(), Some(7));
    }

    #[test]
    fn latest_value_wins() {
        let snapshot = TelemetrySnapshot::new();
        snapshot.publish(Bytes::from_static(b"Temp:20.000;"));
        snapshot.publish(Bytes::from_static(b"Temp:21.000;"));
        assert_eq!(
            snapshot.latest().as_deref(),
            Some(&b"Temp:21.000;"[..])
        );
        assert_eq!(snapshot.sequence(), 2);
    }

    #[test]
    fn wait_newer_times_out_without_publish() {
        let snapshot: Snapshot<u8> = Snapshot::new();
        snapshot.publish(1);
        assert!(snapshot
            .wait_newer(1, Duration::from_millis(20))
            .is_none());
    }

    #[test]
    fn wait_newer_wakes_on_publish() {
        let snapshot = Arc::new(Snapshot::new());
        let publisher = {
            let snapshot = Arc::clone(&snapshot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                snapshot.publish(String::from("fresh"));
            })
        };

        let (seq, value) = snapshot
            .wait_newer(0, Duration::from_secs(5))
            .expect("publish should wake waiter");
        assert_eq!(seq, 1);
        assert_eq!(value, "fresh");
        publisher.join().expect("publisher should finish");
    }

    #[test]
    fn readers_never_observe_torn_values() {
        // Each value is a run of one repeated byte; a torn read would mix two.
        let snapshot = Arc::new(TelemetrySnapshot::new());
        let writer = {
            let snapshot = Arc::clone(&snapshot);
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    let byte = b'a' + (i % 26) as u8;
                    snapshot.publish(Bytes::from(vec![byte; 64 + (i % 7) as usize]));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let snapshot = Arc::clone(&snapshot);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        if let Some(value) = snapshot.latest() {
                            let first = value[0];
                            assert!(value.iter().all(|&b| b == first));
                        }
                    }
                })
            })
            .collect();

        writer.join().expect("writer should finish");
        for reader in readers {
            reader.join().expect("reader should finish");
        }
        assert_eq!(snapshot.sequence(), 2_000);
    }
}
