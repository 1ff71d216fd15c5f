//! A toy graph: a counter source feeds a doubling conduit feeds a counting
//! sink, wired up through the registry and run until Ctrl-C.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use indexmap::IndexMap;

use flowgraph_core::{
    Category, Channel, Component, ComponentClassBuilder, ComponentCore, ComponentInit, Edge, Frame, Graph, Registry,
    TextFrame, TypeDescriptor,
};
use flowgraph_native::RuntimeConfig;

struct CounterSource {
    core: ComponentCore,
    out: Channel<Frame>,
}

impl Component for CounterSource {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn category(&self) -> Category {
        Category::Source
    }

    fn output_slots(&self) -> IndexMap<String, TypeDescriptor> {
        IndexMap::from([("out".to_string(), TypeDescriptor::Str)])
    }

    fn output_channel(&self, slot: &str) -> Option<Channel<Frame>> {
        (slot == "out").then(|| self.out.clone())
    }

    fn start(self: Arc<Self>) {
        let out = self.out.clone();
        let cancel = self.core.cancel_signal().clone();
        self.core.spawn(move || {
            let mut n: u64 = 0;
            while !cancel.is_tripped() {
                out.publish(Frame::Text(TextFrame::new(n.to_string())));
                n += 1;
                std::thread::sleep(Duration::from_millis(200));
            }
        });
    }
}

struct DoublingConduit {
    core: ComponentCore,
    input: Mutex<Option<flowgraph_core::Subscription<Frame>>>,
    out: Channel<Frame>,
}

impl Component for DoublingConduit {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn category(&self) -> Category {
        Category::Conduit
    }

    fn input_slots(&self) -> IndexMap<String, TypeDescriptor> {
        IndexMap::from([("in".to_string(), TypeDescriptor::Str)])
    }

    fn output_slots(&self) -> IndexMap<String, TypeDescriptor> {
        IndexMap::from([("out".to_string(), TypeDescriptor::Str)])
    }

    fn output_channel(&self, slot: &str) -> Option<Channel<Frame>> {
        (slot == "out").then(|| self.out.clone())
    }

    fn bind_input(&self, slot: &str, channel: Channel<Frame>) {
        if slot == "in" {
            let subscription = channel.subscribe(self.core.cancel_signal().as_cancellable());
            *self.input.lock().unwrap() = Some(subscription);
        }
    }

    fn start(self: Arc<Self>) {
        let input = self.input.lock().unwrap().take();
        let Some(input) = input else {
            tracing::warn!(component = self.name(), "no upstream wired, nothing to double");
            return;
        };
        let out = self.out.clone();
        self.core.spawn(move || {
            while let Some(Frame::Text(frame)) = input.next() {
                if let Ok(n) = frame.text.parse::<u64>() {
                    out.publish(Frame::Text(TextFrame::new((n * 2).to_string())));
                }
            }
        });
    }
}

struct CountingSink {
    core: ComponentCore,
    input: Mutex<Option<flowgraph_core::Subscription<Frame>>>,
    received: Arc<AtomicU64>,
}

impl Component for CountingSink {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn category(&self) -> Category {
        Category::Sink
    }

    fn input_slots(&self) -> IndexMap<String, TypeDescriptor> {
        IndexMap::from([("in".to_string(), TypeDescriptor::Str)])
    }

    fn bind_input(&self, slot: &str, channel: Channel<Frame>) {
        if slot == "in" {
            let subscription = channel.subscribe(self.core.cancel_signal().as_cancellable());
            *self.input.lock().unwrap() = Some(subscription);
        }
    }

    fn start(self: Arc<Self>) {
        let input = self.input.lock().unwrap().take();
        let Some(input) = input else {
            tracing::warn!(component = self.name(), "no upstream wired, nothing to count");
            return;
        };
        let received = Arc::clone(&self.received);
        self.core.spawn(move || {
            while let Some(frame) = input.next() {
                received.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%frame, "sink received frame");
            }
        });
    }
}

fn build_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(ComponentClassBuilder::new("counter_source").output_slot("out", TypeDescriptor::Str).build(
            |name, _init| {
                Ok(Arc::new(CounterSource {
                    core: ComponentCore::new(name),
                    out: Channel::unnamed(),
                }) as Arc<dyn Component>)
            },
        ))
        .expect("registering counter_source");
    registry
        .register(
            ComponentClassBuilder::new("doubling_conduit")
                .input_slot("in", TypeDescriptor::Str)
                .output_slot("out", TypeDescriptor::Str)
                .build(|name, _init| {
                    Ok(Arc::new(DoublingConduit {
                        core: ComponentCore::new(name),
                        input: Mutex::new(None),
                        out: Channel::unnamed(),
                    }) as Arc<dyn Component>)
                }),
        )
        .expect("registering doubling_conduit");
    registry
        .register(ComponentClassBuilder::new("counting_sink").input_slot("in", TypeDescriptor::Str).build(
            |name, _init| {
                Ok(Arc::new(CountingSink {
                    core: ComponentCore::new(name),
                    input: Mutex::new(None),
                    received: Arc::new(AtomicU64::new(0)),
                }) as Arc<dyn Component>)
            },
        ))
        .expect("registering counting_sink");
    registry
}

fn main() {
    let config = RuntimeConfig::parse();
    flowgraph_native::init_logging(&config.log_directive);

    let registry = Arc::new(build_registry());
    let graph = Graph::new(registry);

    for descriptor in graph.list_components() {
        tracing::info!(
            class = %descriptor.name,
            category = %descriptor.category,
            "discovered component class"
        );
    }

    let source = graph.create_node("counter_source", "source", &ComponentInit::new()).unwrap();
    let conduit = graph.create_node("doubling_conduit", "doubler", &ComponentInit::new()).unwrap();
    let sink = graph.create_node("counting_sink", "sink", &ComponentInit::new()).unwrap();

    graph
        .create_edge(Edge {
            source_node: source,
            source_slot: "out".to_string(),
            target_node: conduit,
            target_slot: "in".to_string(),
        })
        .unwrap();
    graph
        .create_edge(Edge {
            source_node: conduit,
            source_slot: "out".to_string(),
            target_node: sink,
            target_slot: "in".to_string(),
        })
        .unwrap();

    graph.start_all();
    tracing::info!("graph running, printing metrics every {}ms", config.snapshot_interval_ms);

    for _ in 0..20 {
        std::thread::sleep(Duration::from_millis(config.snapshot_interval_ms));
        let snapshot = graph.collect_metrics();
        for (id, class, component) in &snapshot.nodes {
            tracing::info!(node = %id, class, status = %component.status, "node status");
        }
    }

    graph.stop_all();
}
