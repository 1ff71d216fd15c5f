//! Registry of component classes as data: a name plus ordered slot/init
//! descriptors and a construction closure, rather than runtime reflection
//! over component types.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::component::{Category, Component};
use crate::error::RegistryError;
use crate::frame::TypeDescriptor;

/// A value bound to a named init parameter when constructing a node.
#[derive(Debug, Clone)]
pub enum InitValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl fmt::Display for InitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitValue::Int(v) => write!(f, "{v}"),
            InitValue::Float(v) => write!(f, "{v}"),
            InitValue::Str(v) => write!(f, "{v:?}"),
            InitValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// The bag of named init parameters passed to a class's factory.
#[derive(Debug, Clone, Default)]
pub struct ComponentInit {
    values: IndexMap<String, InitValue>,
}

impl ComponentInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: InitValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&InitValue> {
        self.values.get(name)
    }
}

type Factory = dyn Fn(&str, &ComponentInit) -> Result<Arc<dyn Component>, String> + Send + Sync;

/// A registered component type: its declared slots (for discovery and edge
/// validation before any instance exists) and the closure that builds one.
pub struct ComponentClass {
    name: String,
    input_slots: IndexMap<String, TypeDescriptor>,
    output_slots: IndexMap<String, TypeDescriptor>,
    init_params: IndexMap<String, TypeDescriptor>,
    factory: Box<Factory>,
}

impl ComponentClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_slots(&self) -> &IndexMap<String, TypeDescriptor> {
        &self.input_slots
    }

    pub fn output_slots(&self) -> &IndexMap<String, TypeDescriptor> {
        &self.output_slots
    }

    pub fn init_params(&self) -> &IndexMap<String, TypeDescriptor> {
        &self.init_params
    }

    /// Derived from the declared slots, without instantiating: a class with
    /// no declared inputs is a source, one with no declared outputs (but at
    /// least one input) is a sink, anything else is a conduit.
    pub fn category(&self) -> Category {
        if self.input_slots.is_empty() {
            Category::Source
        } else if self.output_slots.is_empty() {
            Category::Sink
        } else {
            Category::Conduit
        }
    }

    /// The discovery-surface projection of this class: name, derived
    /// category, and the three slot maps rendered for display.
    pub fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor {
            name: self.name.clone(),
            category: self.category(),
            inputs: self.input_slots.clone(),
            outputs: self.output_slots.clone(),
            init: self.init_params.clone(),
        }
    }
}

/// The external discovery surface's per-class projection (spec §6
/// `list_components()`): enough to render a UI palette entry and a
/// construction form without instantiating anything.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ComponentDescriptor {
    pub name: String,
    pub category: Category,
    pub inputs: IndexMap<String, TypeDescriptor>,
    pub outputs: IndexMap<String, TypeDescriptor>,
    pub init: IndexMap<String, TypeDescriptor>,
}

/// Builds a [`ComponentClass`] without requiring the caller to hand-fill
/// every field positionally.
pub struct ComponentClassBuilder {
    name: String,
    input_slots: IndexMap<String, TypeDescriptor>,
    output_slots: IndexMap<String, TypeDescriptor>,
    init_params: IndexMap<String, TypeDescriptor>,
}

impl ComponentClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_slots: IndexMap::new(),
            output_slots: IndexMap::new(),
            init_params: IndexMap::new(),
        }
    }

    pub fn input_slot(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.input_slots.insert(name.into(), ty);
        self
    }

    pub fn output_slot(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.output_slots.insert(name.into(), ty);
        self
    }

    pub fn init_param(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.init_params.insert(name.into(), ty);
        self
    }

    pub fn build<F>(self, factory: F) -> ComponentClass
    where
        F: Fn(&str, &ComponentInit) -> Result<Arc<dyn Component>, String> + Send + Sync + 'static,
    {
        ComponentClass {
            name: self.name,
            input_slots: self.input_slots,
            output_slots: self.output_slots,
            init_params: self.init_params,
            factory: Box::new(factory),
        }
    }
}

/// The process-wide catalogue of component classes available to build
/// graph nodes from. Registration order is preserved for the discovery
/// surface, mirroring the order component subclasses were imported in the
/// originating system.
#[derive(Default)]
pub struct Registry {
    classes: IndexMap<String, ComponentClass>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: ComponentClass) -> Result<(), RegistryError> {
        if self.classes.contains_key(&class.name) {
            return Err(RegistryError::DuplicateClass(class.name));
        }
        tracing::debug!(class = %class.name, "registered component class");
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ComponentClass> {
        self.classes.get(name)
    }

    /// Classes in registration order, for discovery surfaces.
    pub fn list(&self) -> impl Iterator<Item = &ComponentClass> {
        self.classes.values()
    }

    /// The spec §6 discovery surface: one [`ComponentDescriptor`] per
    /// registered class, in registration order, ready to hand to a UI
    /// palette or an HTTP collaborator without instantiating anything.
    pub fn list_components(&self) -> Vec<ComponentDescriptor> {
        self.classes.values().map(ComponentClass::descriptor).collect()
    }

    pub fn instantiate(
        &self,
        class_name: &str,
        node_name: &str,
        init: &ComponentInit,
    ) -> Result<Arc<dyn Component>, InstantiateError> {
        let class = self
            .classes
            .get(class_name)
            .ok_or_else(|| InstantiateError::UnknownClass(class_name.to_string()))?;
        (class.factory)(node_name, init).map_err(InstantiateError::ConstructionFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstantiateError {
    #[error("no component class registered under the name {0:?}")]
    UnknownClass(String),
    #[error("component constructor rejected its init params: {0}")]
    ConstructionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentCore;

    struct Stub {
        core: ComponentCore,
    }

    impl Component for Stub {
        fn core(&self) -> &ComponentCore {
            &self.core
        }

        fn category(&self) -> Category {
            Category::Sink
        }
    }

    fn stub_class() -> ComponentClass {
        ComponentClassBuilder::new("stub")
            .input_slot("in", TypeDescriptor::Str)
            .build(|name, _init| {
                Ok(Arc::new(Stub {
                    core: ComponentCore::new(name),
                }))
            })
    }

    #[test]
    fn register_then_instantiate_round_trips() {
        let mut registry = Registry::new();
        registry.register(stub_class()).unwrap();

        let comp = registry.instantiate("stub", "node-1", &ComponentInit::new()).unwrap();
        assert_eq!(comp.name(), "node-1");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = Registry::new();
        registry.register(stub_class()).unwrap();
        let err = registry.register(stub_class()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateClass(name) if name == "stub"));
    }

    #[test]
    fn instantiating_an_unknown_class_is_an_error() {
        let registry = Registry::new();
        let err = registry.instantiate("missing", "node-1", &ComponentInit::new()).unwrap_err();
        assert!(matches!(err, InstantiateError::UnknownClass(name) if name == "missing"));
    }

    #[test]
    fn category_is_derived_from_declared_slots() {
        let source = ComponentClassBuilder::new("src").output_slot("out", TypeDescriptor::Str).build(|n, _| {
            Ok(Arc::new(Stub { core: ComponentCore::new(n) }) as Arc<dyn Component>)
        });
        assert_eq!(source.category(), Category::Source);

        let sink = stub_class();
        assert_eq!(sink.category(), Category::Sink);

        let conduit = ComponentClassBuilder::new("conduit")
            .input_slot("in", TypeDescriptor::Str)
            .output_slot("out", TypeDescriptor::Str)
            .build(|n, _| Ok(Arc::new(Stub { core: ComponentCore::new(n) }) as Arc<dyn Component>));
        assert_eq!(conduit.category(), Category::Conduit);
    }

    #[test]
    fn list_components_renders_the_discovery_surface() {
        let mut registry = Registry::new();
        registry.register(stub_class()).unwrap();
        let descriptors = registry.list_components();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "stub");
        assert_eq!(descriptors[0].category, Category::Sink);
        assert_eq!(descriptors[0].inputs.get("in"), Some(&TypeDescriptor::Str));
    }

    #[test]
    fn list_preserves_registration_order() {
        let mut registry = Registry::new();
        registry.register(ComponentClassBuilder::new("a").build(|n, _| {
            Ok(Arc::new(Stub { core: ComponentCore::new(n) }) as Arc<dyn Component>)
        })).unwrap();
        registry.register(ComponentClassBuilder::new("b").build(|n, _| {
            Ok(Arc::new(Stub { core: ComponentCore::new(n) }) as Arc<dyn Component>)
        })).unwrap();
        let names: Vec<_> = registry.list().map(ComponentClass::name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
