//! The capability set a board node's canonical type is backed by (Design
//! Notes §9: "a capability set `{forward, parameters, save, load}` and a
//! tagged variant over the known implementations"). What that capability
//! set actually computes (VICReg, TS2Vec, an MDN head, ...) is out of
//! scope (spec.md §1 Non-goals); this crate only defines the seam board
//! nodes invoke it through and a process-wide registry keyed by canonical
//! type, mirroring `tsi-artifacts`' driver registry.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tsi_types::error::CoreError;

/// A value flowing across one named port during a step.
#[derive(Debug, Clone)]
pub enum PortValue {
    Tensor { data: Vec<f32>, shape: Vec<usize> },
    Text(String),
}

/// Every value currently available at a node's inbound ports, and the
/// sink a component pushes its own outbound values into.
#[derive(Debug, Default)]
pub struct StepIo {
    pub inbound: HashMap<&'static str, PortValue>,
    pub outbound: HashMap<&'static str, PortValue>,
    /// Accumulated into the run record's loss statistics when present on
    /// this step (spec §4.6, "aggregate loss statistics").
    pub loss: Option<f32>,
}

impl StepIo {
    pub fn emit(&mut self, port: &'static str, value: PortValue) {
        self.outbound.insert(port, value);
    }
}

/// The behavior behind one node's `canonical_type`. Implementations are
/// supplied by whatever model/logging component the surrounding system
/// registers; this crate never implements one itself beyond the trivial
/// built-ins in [`builtins`].
pub trait NodeComponent: Send {
    fn step(&mut self, io: &mut StepIo) -> Result<(), CoreError>;
}

type Factory = Arc<dyn Fn() -> Box<dyn NodeComponent> + Send + Sync>;

static REGISTRY: OnceCell<Mutex<HashMap<String, Factory>>> = OnceCell::new();

fn registry() -> &'static Mutex<HashMap<String, Factory>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers a component factory for `canonical_type`. One-shot: fails if
/// the type is already registered, matching the artifact driver registry's
/// "process-wide singleton, no hidden construction order" discipline
/// (spec.md Design Notes §9).
pub fn register_node_component<F>(canonical_type: impl Into<String>, factory: F) -> Result<(), CoreError>
where
    F: Fn() -> Box<dyn NodeComponent> + Send + Sync + 'static,
{
    let canonical_type = canonical_type.into();
    let mut guard = registry().lock();
    if guard.contains_key(&canonical_type) {
        return Err(CoreError::Internal(format!("canonical type {canonical_type} already has a registered component")));
    }
    guard.insert(canonical_type, Arc::new(factory));
    Ok(())
}

/// Instantiates a fresh component instance for `canonical_type`, or
/// *no-driver* if nothing is registered for it.
pub fn instantiate(canonical_type: &str) -> Result<Box<dyn NodeComponent>, CoreError> {
    registry()
        .lock()
        .get(canonical_type)
        .map(|factory| factory())
        .ok_or_else(|| CoreError::NoDriver(format!("no node component registered for canonical type {canonical_type}")))
}

/// Minimal built-in components so a circuit exercising only plumbing
/// (no real model) can still run end to end.
pub mod builtins {
    use super::*;

    /// Forwards its `step` tensor to `payload` unchanged; used for sink
    /// nodes that only need to participate in topology, not compute
    /// anything (`tsi.sink.null`).
    pub struct NullSink;

    impl NodeComponent for NullSink {
        fn step(&mut self, _io: &mut StepIo) -> Result<(), CoreError> {
            Ok(())
        }
    }

    /// Registers `tsi.sink.null`. Safe to call more than once per process;
    /// subsequent calls are no-ops rather than errors, since test/binding
    /// setup code may run this more than once within one process.
    pub fn register_null_sink() {
        let _ = register_node_component("tsi.sink.null", || Box::new(NullSink) as Box<dyn NodeComponent>);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_the_same_canonical_type_twice_fails() {
        register_node_component("tsi.test.unique-component-a", || Box::new(builtins::NullSink) as Box<dyn NodeComponent>).unwrap();
        let err = register_node_component("tsi.test.unique-component-a", || Box::new(builtins::NullSink) as Box<dyn NodeComponent>).unwrap_err();
        assert_eq!(tsi_types::error::ErrorCode::code(&err), "INTERNAL");
    }

    #[test]
    fn instantiate_unregistered_type_is_no_driver() {
        let err = instantiate("tsi.test.never-registered").unwrap_err();
        assert_eq!(tsi_types::error::ErrorCode::code(&err), "NO_DRIVER");
    }
}
