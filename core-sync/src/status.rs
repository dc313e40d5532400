//! # Sync Status
//!
//! One cached [`SyncStatus`] per engine plus the subscriber list that is
//! told about every change.
//!
//! Subscribers are called synchronously, in registration order, with the
//! whole snapshot. The list is copied before a notification starts, so a
//! callback may unsubscribe itself or others; removals apply from the next
//! notification on.
//!
//! Only one thread delivers at a time. Snapshots are queued in the order
//! their changes were applied; an update made while another thread (or a
//! callback on this one) is delivering is handed to that deliverer, so
//! subscribers never see an older snapshot after a newer one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    /// Last round-trip that finished with zero failed records.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_count: usize,
    /// Records that failed during the most recent round-trip.
    pub failed_count: usize,
    pub immediate_sync_scheduled: bool,
    /// Records dropped at the retry ceiling since launch.
    pub exhausted_count: usize,
}

/// What the UI should show, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    Offline,
    Syncing,
    Failed,
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn category(&self) -> StatusCategory {
        if !self.online {
            StatusCategory::Offline
        } else if self.syncing {
            StatusCategory::Syncing
        } else if self.failed_count > 0 {
            StatusCategory::Failed
        } else if self.pending_count > 0 {
            StatusCategory::Pending
        } else {
            StatusCategory::Synced
        }
    }

    pub fn can_retry_manually(&self) -> bool {
        self.online && !self.syncing
    }
}

type Callback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

#[derive(Default)]
struct Delivery {
    delivering: bool,
    queue: VecDeque<SyncStatus>,
}

struct Shared {
    status: Mutex<SyncStatus>,
    subscribers: Mutex<Subscribers>,
    delivery: Mutex<Delivery>,
}

/// Releases the deliverer role if a callback panics mid-delivery.
struct DeliveryGuard<'a> {
    shared: &'a Shared,
    finished: bool,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.shared
                .delivery
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .delivering = false;
        }
    }
}

/// Cached status and its subscribers.
pub struct StatusChannel {
    shared: Arc<Shared>,
}

impl StatusChannel {
    pub fn new(initial: SyncStatus) -> Self {
        Self {
            shared: Arc::new(Shared {
                status: Mutex::new(initial),
                subscribers: Mutex::new(Subscribers {
                    next_id: 0,
                    entries: Vec::new(),
                }),
                delivery: Mutex::new(Delivery::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `change` and notify subscribers if any field moved.
    ///
    /// Returns the resulting snapshot.
    pub fn update(&self, change: impl FnOnce(&mut SyncStatus)) -> SyncStatus {
        let (after, deliver) = {
            let mut status = self
                .shared
                .status
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let before = status.clone();
            change(&mut status);
            if *status == before {
                return before;
            }

            // Queued under the status lock so queue order is change order.
            let mut delivery = self
                .shared
                .delivery
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            delivery.queue.push_back(status.clone());
            let deliver = !delivery.delivering;
            delivery.delivering = true;
            (status.clone(), deliver)
        };

        if deliver {
            self.deliver_queued();
        }
        after
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let mut subs = self
            .shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = subs.next_id;
        subs.next_id += 1;
        subs.entries.push((id, Arc::new(callback)));

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .map(|subs| subs.entries.len())
            .unwrap_or_default()
    }

    fn deliver_queued(&self) {
        let mut guard = DeliveryGuard {
            shared: &self.shared,
            finished: false,
        };
        loop {
            let next = {
                let mut delivery = self
                    .shared
                    .delivery
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                match delivery.queue.pop_front() {
                    Some(status) => status,
                    None => {
                        // Cleared under the same lock an enqueuer checks.
                        delivery.delivering = false;
                        guard.finished = true;
                        break;
                    }
                }
            };
            self.notify(&next);
        }
    }

    fn notify(&self, status: &SyncStatus) {
        let callbacks: Vec<Callback> = self
            .shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(status);
        }
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(SyncStatus::default())
    }
}

impl fmt::Debug for StatusChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusChannel")
            .field("status", &self.snapshot())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by [`StatusChannel::subscribe`].
///
/// Dropping it keeps the callback registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove the callback. Safe to call from inside a notification.
    pub fn unsubscribe(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn online() -> SyncStatus {
        SyncStatus {
            online: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_category_priority() {
        let mut status = SyncStatus {
            online: false,
            syncing: true,
            failed_count: 2,
            pending_count: 3,
            ..Default::default()
        };
        assert_eq!(status.category(), StatusCategory::Offline);

        status.online = true;
        assert_eq!(status.category(), StatusCategory::Syncing);

        status.syncing = false;
        assert_eq!(status.category(), StatusCategory::Failed);

        status.failed_count = 0;
        assert_eq!(status.category(), StatusCategory::Pending);

        status.pending_count = 0;
        assert_eq!(status.category(), StatusCategory::Synced);
    }

    #[test]
    fn test_exhaustion_alone_does_not_change_category() {
        let status = SyncStatus {
            exhausted_count: 4,
            ..online()
        };
        assert_eq!(status.category(), StatusCategory::Synced);
    }

    #[test]
    fn test_manual_retry_availability() {
        assert!(online().can_retry_manually());
        assert!(!SyncStatus::default().can_retry_manually());
        assert!(!SyncStatus {
            syncing: true,
            ..online()
        }
        .can_retry_manually());
    }

    #[test]
    fn test_subscribers_called_in_registration_order_with_full_snapshot() {
        let channel = StatusChannel::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = log.clone();
            channel.subscribe(move |status: &SyncStatus| {
                log.lock().unwrap().push((name, status.clone()));
            });
        }

        channel.update(|s| s.pending_count = 7);

        let log = log.lock().unwrap();
        let names: Vec<&str> = log.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert!(log.iter().all(|(_, s)| s.pending_count == 7 && !s.online));
    }

    #[test]
    fn test_no_notification_without_change() {
        let channel = StatusChannel::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        channel.subscribe(move |_: &SyncStatus| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.update(|s| s.online = false);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        channel.update(|s| s.online = true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_notification() {
        let channel = Arc::new(StatusChannel::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let handle = {
            let calls = calls.clone();
            let slot = slot.clone();
            channel.subscribe(move |_: &SyncStatus| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = slot.lock().unwrap().as_ref() {
                    sub.unsubscribe();
                }
            })
        };
        *slot.lock().unwrap() = Some(handle);

        let later = Arc::new(AtomicUsize::new(0));
        let later_counter = later.clone();
        channel.subscribe(move |_: &SyncStatus| {
            later_counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.update(|s| s.pending_count = 1);
        channel.update(|s| s.pending_count = 2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(later.load(Ordering::SeqCst), 2);
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[test]
    fn test_concurrent_updates_reach_subscribers_in_change_order() {
        let channel = Arc::new(StatusChannel::default());
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);

        {
            let delivered = delivered.clone();
            channel.subscribe(move |status: &SyncStatus| {
                if status.pending_count == 1 {
                    entered_tx.lock().unwrap().send(()).unwrap();
                    // Hold the first delivery open while the other thread updates.
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                delivered.lock().unwrap().push(status.pending_count);
            });
        }

        let first = {
            let channel = channel.clone();
            std::thread::spawn(move || {
                channel.update(|s| s.pending_count = 1);
            })
        };
        entered_rx.recv().unwrap();

        let second = {
            let channel = channel.clone();
            std::thread::spawn(move || {
                channel.update(|s| s.pending_count = 2);
            })
        };
        second.join().unwrap();
        first.join().unwrap();

        assert_eq!(*delivered.lock().unwrap(), vec![1, 2]);
        assert_eq!(channel.snapshot().pending_count, 2);
    }

    #[test]
    fn test_update_from_callback_is_delivered_after_current_one() {
        let channel = Arc::new(StatusChannel::default());
        let delivered = Arc::new(Mutex::new(Vec::new()));

        {
            let delivered = delivered.clone();
            let weak = Arc::downgrade(&channel);
            channel.subscribe(move |status: &SyncStatus| {
                delivered.lock().unwrap().push(status.pending_count);
                if status.pending_count == 1 {
                    if let Some(channel) = weak.upgrade() {
                        channel.update(|s| s.pending_count = 0);
                    }
                }
            });
        }

        channel.update(|s| s.pending_count = 1);

        assert_eq!(*delivered.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_unsubscribe_after_channel_dropped_is_noop() {
        let channel = StatusChannel::default();
        let sub = channel.subscribe(|_: &SyncStatus| {});
        drop(channel);
        sub.unsubscribe();
    }
}
