//! Single-producer, multi-subscriber broadcast buffer with lag-tracked,
//! garbage-collected fan-out.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime};

use crate::cancel::Cancellable;

#[cfg(feature = "serde")]
use serde::Serialize;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An estimate of an item's footprint, used for the `bytes_delta` telemetry
/// counters. Implemented per item type since there is no universal runtime
/// size query for arbitrary owned data (`Vec`/`String` lengths aren't
/// visible through `size_of`).
pub trait ItemSize {
    fn byte_len(&self) -> usize;
}

macro_rules! impl_item_size_for_sized {
    ($($t:ty),* $(,)?) => {
        $(impl ItemSize for $t {
            fn byte_len(&self) -> usize {
                std::mem::size_of::<$t>()
            }
        })*
    };
}

impl_item_size_for_sized!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64, bool);

impl ItemSize for String {
    fn byte_len(&self) -> usize {
        self.len()
    }
}

impl ItemSize for Vec<u8> {
    fn byte_len(&self) -> usize {
        self.len()
    }
}

static CHANNEL_SEQ: AtomicU64 = AtomicU64::new(0);

struct SubscriberState {
    cursor: u64,
    messages_delta: u64,
    bytes_delta: u64,
}

struct State<T> {
    items: VecDeque<T>,
    base_offset: u64,
    next_sub_id: u64,
    subscribers: HashMap<u64, SubscriberState>,
    messages_delta: u64,
    bytes_delta: u64,
    last_publish: Option<SystemTime>,
}

impl<T> State<T> {
    fn tail(&self) -> u64 {
        self.base_offset + self.items.len() as u64
    }

    /// After any cursor change, drop items no subscriber still needs:
    /// maintains `base_offset == min(cursor[*])`.
    fn gc(&mut self) {
        if self.subscribers.is_empty() {
            self.items.clear();
            return;
        }
        let min_cursor = self.subscribers.values().map(|s| s.cursor).min().unwrap();
        let drop_count = min_cursor.saturating_sub(self.base_offset);
        for _ in 0..drop_count {
            self.items.pop_front();
        }
        self.base_offset += drop_count;
    }
}

struct Inner<T> {
    name: String,
    state: Mutex<State<T>>,
    condvar: Condvar,
}

/// A named, ordered broadcast buffer. Cloning a `Channel` shares the same
/// underlying buffer and subscriber set (it's an `Arc` handle), which is
/// what lets `Component::output_channels()` return the same channel
/// identity across repeated calls.
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Channel<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    base_offset: 0,
                    next_sub_id: 0,
                    subscribers: HashMap::new(),
                    messages_delta: 0,
                    bytes_delta: 0,
                    last_publish: None,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Default name derived from an internal sequence number, for channels
    /// that don't need a caller-chosen identity.
    pub fn unnamed() -> Self {
        let seq = CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("channel_{seq:x}"))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn buffer_depth(&self) -> usize {
        self.inner.state.lock().unwrap().items.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().unwrap().subscribers.len()
    }

    /// Registers a subscription whose cursor starts at the current tail:
    /// late subscribers never see history.
    pub fn subscribe(&self, owner: Arc<dyn Cancellable>) -> Subscription<T> {
        let mut state = self.inner.state.lock().unwrap();
        let sub_id = state.next_sub_id;
        state.next_sub_id += 1;
        let cursor = state.tail();
        state.subscribers.insert(
            sub_id,
            SubscriberState {
                cursor,
                messages_delta: 0,
                bytes_delta: 0,
            },
        );
        Subscription {
            inner: Arc::clone(&self.inner),
            sub_id,
            owner,
        }
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        let mut state = self.inner.state.lock().unwrap();
        let tail = state.tail();
        let subscribers = state
            .subscribers
            .iter()
            .map(|(id, sub)| {
                (
                    *id,
                    SubscriberSnapshot {
                        lag: tail - sub.cursor,
                        messages_delta: sub.messages_delta,
                        bytes_delta: sub.bytes_delta,
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        let snapshot = ChannelSnapshot {
            name: self.inner.name.clone(),
            messages_delta: state.messages_delta,
            bytes_delta: state.bytes_delta,
            last_publish_time: state.last_publish,
            buffer_depth: state.items.len(),
            subscribers,
        };

        // Reset every delta counter inside the same critical section so two
        // concurrent snapshotters can't double-reset.
        state.messages_delta = 0;
        state.bytes_delta = 0;
        for sub in state.subscribers.values_mut() {
            sub.messages_delta = 0;
            sub.bytes_delta = 0;
        }

        snapshot
    }
}

impl<T: ItemSize + Clone> Channel<T> {
    /// Appends `item`, unless there are currently zero subscribers, in
    /// which case it is dropped and counters are left untouched. This is
    /// what prevents unbounded accumulation on disconnected outputs.
    pub fn publish(&self, item: T) {
        let mut state = self.inner.state.lock().unwrap();
        if state.subscribers.is_empty() {
            tracing::trace!(channel = %self.inner.name, "dropping publish: no subscribers");
            return;
        }
        let size = item.byte_len() as u64;
        state.items.push_back(item);
        state.messages_delta += 1;
        state.bytes_delta += size;
        state.last_publish = Some(SystemTime::now());
        drop(state);
        self.inner.condvar.notify_all();
    }
}

/// A single subscriber's cursor into a [`Channel`]. Identified by an
/// integer unique within the channel; destroying the subscription (either
/// explicitly or via `Drop`) unregisters the cursor and may trigger GC.
pub struct Subscription<T> {
    inner: Arc<Inner<T>>,
    sub_id: u64,
    owner: Arc<dyn Cancellable>,
}

impl<T: Clone + ItemSize> Subscription<T> {
    /// Blocks until an item is available, returning it, or until the
    /// owner's cancel signal is observed, returning `None`. Uses a bounded
    /// wait so cancellation is noticed even absent further publishes
    /// (target upper bound ~100ms).
    pub fn next(&self) -> Option<T> {
        let mut state = self.inner.state.lock().unwrap();
        loop {
            let Some(cursor) = state.subscribers.get(&self.sub_id).map(|s| s.cursor) else {
                // Unsubscribed mid-wait: a caller racing a stop gets the
                // terminal sentinel rather than a panic.
                return None;
            };

            if cursor < state.tail() {
                let item = state.items[(cursor - state.base_offset) as usize].clone();
                let size = item.byte_len() as u64;
                if let Some(sub) = state.subscribers.get_mut(&self.sub_id) {
                    sub.cursor = cursor + 1;
                    sub.messages_delta += 1;
                    sub.bytes_delta += size;
                }
                state.gc();
                return Some(item);
            }

            if self.owner.is_cancelled() {
                return None;
            }

            let (guard, _timeout) = self
                .inner
                .condvar
                .wait_timeout(state, WAIT_POLL_INTERVAL)
                .unwrap();
            state = guard;
        }
    }

    /// Idempotent: removes the cursor and its counters, then runs GC.
    pub fn unsubscribe(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.subscribers.remove(&self.sub_id).is_none() {
            return;
        }
        state.gc();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.subscribers.remove(&self.sub_id).is_some() {
            state.gc();
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SubscriberSnapshot {
    pub lag: u64,
    pub messages_delta: u64,
    pub bytes_delta: u64,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ChannelSnapshot {
    pub name: String,
    pub messages_delta: u64,
    pub bytes_delta: u64,
    pub last_publish_time: Option<SystemTime>,
    pub buffer_depth: usize,
    pub subscribers: HashMap<u64, SubscriberSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration as StdDuration;

    struct TestCancel(AtomicBool);
    impl TestCancel {
        fn new() -> Arc<Self> {
            Arc::new(Self(AtomicBool::new(false)))
        }
        fn trip(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }
    impl Cancellable for TestCancel {
        fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn never_cancel() -> Arc<dyn Cancellable> {
        TestCancel::new()
    }

    #[test]
    fn single_subscriber_echo() {
        let channel: Channel<u32> = Channel::new("c");
        let sub = channel.subscribe(never_cancel());
        channel.publish(1);
        channel.publish(2);
        channel.publish(3);
        assert_eq!(sub.next(), Some(1));
        assert_eq!(sub.next(), Some(2));
        assert_eq!(sub.next(), Some(3));

        let snap = channel.snapshot();
        assert_eq!(snap.messages_delta, 3);
        let sub_snap = snap.subscribers.values().next().unwrap();
        assert_eq!(sub_snap.lag, 0);
    }

    #[test]
    fn late_subscriber_sees_no_history() {
        let channel: Channel<u32> = Channel::new("c");
        let warm = channel.subscribe(never_cancel());
        channel.publish(1);
        channel.publish(2);
        // Without the warm subscriber, publishes 1 and 2 would have been
        // dropped on arrival; `warm` exists purely to keep the channel
        // non-empty of subscribers for this step.
        let late = channel.subscribe(never_cancel());
        assert_eq!(late.snapshot_lag(&channel), 0);
        channel.publish(3);
        assert_eq!(late.next(), Some(3));
        drop(warm);
    }

    trait LagExt<T> {
        fn snapshot_lag(&self, channel: &Channel<T>) -> u64;
    }
    impl<T> LagExt<T> for Subscription<T> {
        fn snapshot_lag(&self, channel: &Channel<T>) -> u64 {
            let snap = channel.snapshot();
            snap.subscribers.get(&self.sub_id).map_or(0, |s| s.lag)
        }
    }

    #[test]
    fn slow_subscriber_retains_fast_subscriber_trims() {
        let channel: Channel<u32> = Channel::new("c");
        let slow = channel.subscribe(never_cancel());
        let fast = channel.subscribe(never_cancel());
        for i in 0..10 {
            channel.publish(i);
        }
        for _ in 0..10 {
            fast.next();
        }
        assert_eq!(channel.buffer_depth(), 10);
        for _ in 0..10 {
            slow.next();
        }
        assert_eq!(channel.buffer_depth(), 0);
    }

    #[test]
    fn cancel_during_wait_returns_none_promptly() {
        let channel: Channel<u32> = Channel::new("c");
        let cancel = TestCancel::new();
        let sub = channel.subscribe(cancel.clone() as Arc<dyn Cancellable>);

        let handle = thread::spawn(move || sub.next());
        thread::sleep(StdDuration::from_millis(20));
        cancel.trip();

        let start = std::time::Instant::now();
        let result = handle.join().unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() < StdDuration::from_millis(500));
    }

    #[test]
    fn drop_when_empty_keeps_counters_at_zero() {
        let channel: Channel<u32> = Channel::new("c");
        for i in 0..1000 {
            channel.publish(i);
        }
        let sub = channel.subscribe(never_cancel());
        assert_eq!(channel.buffer_depth(), 0);
        let snap = channel.snapshot();
        assert_eq!(snap.messages_delta, 0);
        drop(sub);
    }

    #[test]
    fn no_item_loss_to_live_subscribers() {
        let channel: Channel<u32> = Channel::new("c");
        let a = channel.subscribe(never_cancel());
        let b = channel.subscribe(never_cancel());
        for i in 0..50 {
            channel.publish(i);
        }
        for i in 0..50 {
            assert_eq!(a.next(), Some(i));
            assert_eq!(b.next(), Some(i));
        }
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let channel: Channel<u32> = Channel::new("c");
        let sub = channel.subscribe(never_cancel());
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn gc_tightness_after_unsubscribe() {
        let channel: Channel<u32> = Channel::new("c");
        let keep = channel.subscribe(never_cancel());
        let drop_me = channel.subscribe(never_cancel());
        channel.publish(1);
        channel.publish(2);
        drop_me.unsubscribe();
        assert_eq!(channel.buffer_depth(), 2);
        keep.next();
        keep.next();
        assert_eq!(channel.buffer_depth(), 0);
    }
}
