//! Component lifecycle: `Startup -> Running -> Stopped`.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;

use indexmap::IndexMap;

use crate::cancel::CancelSignal;
use crate::frame::TypeDescriptor;

/// Where a component sits in the discovery surface's grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Category {
    Source,
    Conduit,
    Sink,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Source => write!(f, "source"),
            Category::Conduit => write!(f, "conduit"),
            Category::Sink => write!(f, "sink"),
        }
    }
}

/// A component's lifecycle phase. Transitions are one-directional:
/// `Stopped` is terminal, a stopped component is never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Startup,
    Running,
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Startup => write!(f, "startup"),
            Status::Running => write!(f, "running"),
            Status::Stopped => write!(f, "stopped"),
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
}

/// The lifecycle state and cancellation handle shared by every `Component`
/// implementor. Embedded as a field rather than re-derived per component so
/// `start`/`stop`/`status` have one implementation, matching the default
/// `Component` trait methods below.
pub struct ComponentCore {
    name: String,
    status: Mutex<Status>,
    started_at: Mutex<Option<SystemTime>>,
    cancel: CancelSignal,
    worker: Mutex<Option<Worker>>,
    fault: Mutex<Option<String>>,
}

impl ComponentCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Mutex::new(Status::Startup),
            started_at: Mutex::new(None),
            cancel: CancelSignal::new(),
            worker: Mutex::new(None),
            fault: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    /// Wall time of the most recent `Startup -> Running` transition, or
    /// `None` if this component has never started.
    pub fn started_at(&self) -> Option<SystemTime> {
        *self.started_at.lock().unwrap()
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().unwrap().clone()
    }

    /// Runs `body` on a spawned thread, catching panics so a faulting
    /// component reports `Stopped` with a captured fault message instead of
    /// taking the whole process down.
    ///
    /// Clears the cancel signal first: a `stop()` that landed before this
    /// component ever started leaves no lasting trace, matching the state
    /// diagram's `startup --(no effect from stop)--> startup` transition.
    pub fn spawn(self: &Arc<Self>, body: impl FnOnce() + Send + 'static) {
        {
            let mut status = self.status.lock().unwrap();
            if *status != Status::Startup {
                return;
            }
            self.cancel.clear();
            *status = Status::Running;
            *self.started_at.lock().unwrap() = Some(SystemTime::now());
        }

        let core = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("component-{}", core.name))
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body));
                if let Err(payload) = result {
                    *core.fault.lock().unwrap() = Some(panic_message(&payload));
                    tracing::warn!(component = %core.name, "worker panicked");
                }
                *core.status.lock().unwrap() = Status::Stopped;
            })
            .expect("failed to spawn component worker thread");

        *self.worker.lock().unwrap() = Some(Worker { handle });
    }

    /// Idempotent: trips the cancel signal. Never joins the worker thread —
    /// the status transition to `Stopped` happens on the worker's own exit
    /// path once it observes cancellation, not synchronously here. A
    /// component that was never started (still `Startup`) simply stays
    /// `Startup`: there is no worker to stop, and nothing to trip that
    /// outlives a later `start()` clearing the signal again.
    ///
    /// Callers that need a synchronous shutdown point call [`Self::join`]
    /// separately; the engine itself never requires it.
    pub fn stop(&self) {
        self.cancel.trip();
    }

    /// Blocks until the worker thread, if one was spawned, has exited.
    /// A no-op if `stop`/`join` already consumed the handle, or if the
    /// component was never started.
    pub fn join(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.handle.join();
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}

/// Point-in-time state of a component, returned by `Component::snapshot`
/// for the discovery/telemetry surface. Composes a [`ChannelSnapshot`] per
/// declared output slot so per-subscriber lag reaches the telemetry
/// surface alongside lifecycle state.
#[derive(Debug, Clone)]
pub struct ComponentSnapshot {
    pub name: String,
    pub category: Category,
    pub status: Status,
    pub started_at: Option<SystemTime>,
    pub fault: Option<String>,
    pub channels: IndexMap<String, crate::channel::ChannelSnapshot>,
}

/// A node's runtime behavior: typed input/output slots wired by a
/// [`crate::graph::Graph`], advanced through the `Startup -> Running ->
/// Stopped` lifecycle by `start`/`stop`.
///
/// `start`/`stop` take `Arc<Self>` receivers (not `&self`/`self`) so the
/// default implementations can hand a clone of the `Arc` to a spawned
/// worker thread while the trait stays object-safe behind `Arc<dyn
/// Component>`.
pub trait Component: Send + Sync {
    fn core(&self) -> &ComponentCore;

    fn category(&self) -> Category;

    /// Slot name -> structural type, in declaration order.
    fn input_slots(&self) -> IndexMap<String, TypeDescriptor> {
        IndexMap::new()
    }

    /// Slot name -> structural type, in declaration order.
    fn output_slots(&self) -> IndexMap<String, TypeDescriptor> {
        IndexMap::new()
    }

    /// The broadcast channel backing an output slot, if this component has
    /// produced one yet. A `Graph` calls this while wiring edges at
    /// `start_all` time, then hands the channel to the downstream node's
    /// `bind_input`.
    fn output_channel(&self, _slot: &str) -> Option<crate::channel::Channel<crate::frame::Frame>> {
        None
    }

    /// Gives this component a subscription source for an input slot. A
    /// `Graph` calls this for every edge terminating here, after resolving
    /// the upstream's `output_channel`, before `start` runs.
    fn bind_input(&self, _slot: &str, _channel: crate::channel::Channel<crate::frame::Frame>) {}

    /// Begins the component's worker thread. Idempotent: a second call
    /// while already running or stopped is a no-op, matching
    /// `ComponentCore::spawn`'s status guard.
    fn start(self: Arc<Self>) {}

    /// Trips the cancel signal. Idempotent and safe to call from any
    /// status, including before `start` (in which case it has no observable
    /// effect: there is no worker yet, and a later `start` clears the
    /// signal again). Never blocks on the worker thread; see
    /// [`ComponentCore::join`] for a synchronous shutdown point.
    ///
    /// Overrides that additionally close native resources (sockets, audio
    /// devices) to unblock blocking I/O must remain idempotent and must
    /// still call through to this default, directly or via
    /// [`ComponentCore::stop`].
    fn stop(&self) {
        self.core().stop();
    }

    /// Blocks until the worker thread has exited, if one was ever spawned.
    /// Not required by the engine's shutdown contract — `stop` alone is
    /// sufficient for cooperative cancellation — but available for callers
    /// that want a deterministic join point.
    fn join(&self) {
        self.core().join();
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn status(&self) -> Status {
        self.core().status()
    }

    /// Composes this component's lifecycle state with a [`ChannelSnapshot`]
    /// per declared output slot, by calling `output_channel` for each
    /// `output_slots` key — the boundary telemetry operation in spec §6.
    fn snapshot(&self) -> ComponentSnapshot {
        let channels = self
            .output_slots()
            .keys()
            .filter_map(|slot| {
                self.output_channel(slot).map(|channel| (slot.clone(), channel.snapshot()))
            })
            .collect();

        ComponentSnapshot {
            name: self.name().to_string(),
            category: self.category(),
            status: self.status(),
            started_at: self.core().started_at(),
            fault: self.core().fault(),
            channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Counter {
        core: ComponentCore,
        ticks: Arc<AtomicU32>,
    }

    impl Component for Counter {
        fn core(&self) -> &ComponentCore {
            &self.core
        }

        fn category(&self) -> Category {
            Category::Source
        }

        fn start(self: Arc<Self>) {
            let ticks = Arc::clone(&self.ticks);
            let cancel = self.core().cancel_signal().clone();
            self.core.spawn(move || {
                while !cancel.is_tripped() {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(Duration::from_millis(5));
                }
            });
        }
    }

    struct Faulty {
        core: ComponentCore,
    }

    impl Component for Faulty {
        fn core(&self) -> &ComponentCore {
            &self.core
        }

        fn category(&self) -> Category {
            Category::Sink
        }

        fn start(self: Arc<Self>) {
            self.core.spawn(|| panic!("boom"));
        }
    }

    /// `stop()` never joins (spec §5), so the `Stopped` transition happens
    /// asynchronously on the worker's own exit path; tests that need to
    /// observe it poll with a bounded timeout rather than asserting
    /// immediately after `stop()` returns.
    fn wait_for_status(comp: &Arc<Counter>, want: Status) {
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while comp.status() != want && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(comp.status(), want);
    }

    #[test]
    fn lifecycle_reaches_running_then_stopped() {
        let comp = Arc::new(Counter {
            core: ComponentCore::new("counter"),
            ticks: Arc::new(AtomicU32::new(0)),
        });
        assert_eq!(comp.status(), Status::Startup);
        Arc::clone(&comp).start();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(comp.status(), Status::Running);
        comp.stop();
        comp.join();
        assert_eq!(comp.status(), Status::Stopped);
        assert!(comp.ticks.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn stop_before_start_has_no_lasting_effect() {
        let comp = Arc::new(Counter {
            core: ComponentCore::new("counter"),
            ticks: Arc::new(AtomicU32::new(0)),
        });
        comp.stop();
        // Per the state diagram, stopping a never-started component leaves
        // it in `Startup`: there is no worker to transition to `Stopped`.
        assert_eq!(comp.status(), Status::Startup);
        Arc::clone(&comp).start();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(comp.status(), Status::Running);
        comp.stop();
        wait_for_status(&comp, Status::Stopped);
    }

    #[test]
    fn double_stop_is_idempotent() {
        let comp = Arc::new(Counter {
            core: ComponentCore::new("counter"),
            ticks: Arc::new(AtomicU32::new(0)),
        });
        Arc::clone(&comp).start();
        comp.stop();
        comp.stop();
        wait_for_status(&comp, Status::Stopped);
    }

    #[test]
    fn stop_does_not_block_on_worker_exit() {
        let comp = Arc::new(Counter {
            core: ComponentCore::new("counter"),
            ticks: Arc::new(AtomicU32::new(0)),
        });
        Arc::clone(&comp).start();
        let started = std::time::Instant::now();
        comp.stop();
        assert!(started.elapsed() < Duration::from_millis(5), "stop() must return immediately, never join");
        wait_for_status(&comp, Status::Stopped);
    }

    #[test]
    fn panicking_worker_is_captured_as_a_fault() {
        let comp = Arc::new(Faulty {
            core: ComponentCore::new("faulty"),
        });
        Arc::clone(&comp).start();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(comp.status(), Status::Stopped);
        let snapshot = comp.snapshot();
        assert!(snapshot.fault.is_some());
    }
}
