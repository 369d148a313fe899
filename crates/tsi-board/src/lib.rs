//! Board runtime (spec §4.6): compiles a board contract file into a
//! circuit, runs it through a single-threaded cooperative scheduler, and
//! executes bindings (contract + wave) to produce run records.

pub mod binding;
pub mod circuit;
pub mod component;
pub mod scheduler;

pub use binding::{run_binding, Budget, CancelToken, RunRecord, Termination, WaveSpec};
pub use circuit::{Circuit, ContractSpec, EdgeSpec, NodeSpec, PortKind};
pub use component::{instantiate, register_node_component, NodeComponent, PortValue, StepIo};
pub use scheduler::{Scheduler, StepResult};
