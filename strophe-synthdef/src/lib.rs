//! Building unit generator graphs and compiling them into SCgf synth definitions.

mod builder;
mod compiler;
pub mod error;
mod graph;
mod operator;
pub mod spec;
mod synthdef;

pub use builder::{BuilderScope, SynthDefBuilder, UGenCall, UGenOptions};
pub use error::{ContextError, GraphError, SerializationError, SynthDefError, SynthDefResult};
pub use graph::{
    GraphId, NodeId, Operand, OutputProxy, Parameter, ParameterProxy, Signal, SynthDefGraph,
    UGenNode,
};
pub use operator::{BinaryOperator, UnaryOperator};
pub use spec::{catalog, Catalog, UGenSpecification};
pub use synthdef::{compile_synthdefs, serialize, CompiledUGen, InputRef, ParameterInfo, SynthDef};
pub use strophe_types::{CalculationRate, ParameterRate};
