//! Bounded hand-off queue between the capture thread and the dispatch worker.
//!
//! Single producer (the capture callback, synchronous, must never block) and
//! single consumer (the dispatch worker task). Overflow policy is drop-oldest:
//! a full queue discards its oldest unread event to admit the newest, so a
//! slow or unavailable broker sheds stale events instead of stalling the
//! capture path. Overflow is counted separately from publish failures so the
//! two are distinguishable in logs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::sip::SipEvent;

/// Queue capacity; beyond this the oldest event is dropped.
pub const QUEUE_CAPACITY: usize = 5000;

struct Inner {
    buf: VecDeque<SipEvent>,
    closed: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Cloneable handle to the bounded event queue.
#[derive(Clone)]
pub struct EventQueue {
    shared: Arc<Shared>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    buf: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                notify: Notify::new(),
                enqueued: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue an event without ever blocking the caller.
    ///
    /// When the queue is full the oldest unread event is discarded to make
    /// room. Events pushed after `close` are discarded outright.
    pub fn push(&self, event: SipEvent) {
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            if inner.buf.len() == self.capacity {
                if let Some(oldest) = inner.buf.pop_front() {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(seq = oldest.seq, "queue full, dropped oldest event");
                }
            }
            inner.buf.push_back(event);
            self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.notify.notify_one();
    }

    /// Take the next event in arrival order, suspending while the queue is
    /// empty. Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<SipEvent> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(event) = inner.buf.pop_front() {
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Close the queue. The consumer still drains whatever is buffered.
    pub fn close(&self) {
        {
            self.lock().closed = true;
        }
        self.shared.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events accepted since startup.
    pub fn enqueued(&self) -> u64 {
        self.shared.enqueued.load(Ordering::Relaxed)
    }

    /// Total events discarded by the drop-oldest policy.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
