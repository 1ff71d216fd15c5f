//! Broadcast channel, component lifecycle, and graph runtime for streaming
//! dataflow pipelines.
//!
//! Three subsystems compose to form a graph: [`channel`] is the
//! lag-tracked, garbage-collected fan-out buffer; [`component`] is the
//! `Startup -> Running -> Stopped` lifecycle every node implements;
//! [`graph`] wires typed nodes together and owns bulk start/stop.
//! [`registry`] holds component classes as data so the graph never needs
//! runtime reflection to build a node from a name, and [`frame`] defines
//! the tagged payload type every channel in a graph carries.

pub mod cancel;
pub mod channel;
pub mod component;
pub mod error;
pub mod frame;
pub mod graph;
pub mod registry;

pub use cancel::{CancelSignal, Cancellable};
pub use channel::{Channel, ChannelSnapshot, ItemSize, SubscriberSnapshot, Subscription};
pub use component::{Category, Component, ComponentCore, ComponentSnapshot, Status};
pub use error::{GraphError, RegistryError};
pub use frame::{
    AudioData, AudioFrame, AudioSampleFormat, ChatMessage, Frame, InterruptFrame, MessagesData, MessagesFormat,
    MessagesFrame, TextFrame, TypeDescriptor,
};
pub use graph::{Edge, Graph, GraphSnapshot, NodeId};
pub use registry::{
    ComponentClass, ComponentClassBuilder, ComponentDescriptor, ComponentInit, InitValue, InstantiateError, Registry,
};
