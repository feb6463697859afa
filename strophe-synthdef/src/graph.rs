//! In-memory ugen graph: arena-indexed nodes, operands and signals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strophe_types::{CalculationRate, ParameterRate};

use crate::spec::UGenSpecification;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one builder's graph; signals carry it so they cannot be wired
/// into another graph by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One output of a node. Non-owning; only meaningful inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputProxy {
    pub(crate) graph: GraphId,
    pub(crate) node: NodeId,
    pub(crate) output: u32,
    pub(crate) rate: CalculationRate,
}

impl OutputProxy {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn output(&self) -> u32 {
        self.output
    }

    pub fn rate(&self) -> CalculationRate {
        self.rate
    }
}

/// One control slot of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterProxy {
    pub(crate) graph: GraphId,
    pub(crate) parameter: usize,
    pub(crate) slot: u32,
    pub(crate) rate: ParameterRate,
}

/// A single value feeding a ugen input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Constant(f32),
    Output(OutputProxy),
    Parameter(ParameterProxy),
}

impl Operand {
    pub fn rate(&self) -> CalculationRate {
        match self {
            Operand::Constant(_) => CalculationRate::Scalar,
            Operand::Output(proxy) => proxy.rate,
            Operand::Parameter(proxy) => proxy.rate.calculation_rate(),
        }
    }

    pub fn as_constant(&self) -> Option<f32> {
        match self {
            Operand::Constant(value) => Some(*value),
            _ => None,
        }
    }

    pub(crate) fn graph(&self) -> Option<GraphId> {
        match self {
            Operand::Constant(_) => None,
            Operand::Output(proxy) => Some(proxy.graph),
            Operand::Parameter(proxy) => Some(proxy.graph),
        }
    }
}

/// A possibly multichannel signal.
///
/// A `Sequence` fed into an expandable input fans the receiving ugen out into
/// parallel instances.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Scalar(Operand),
    Sequence(Vec<Signal>),
}

impl Signal {
    /// Number of channels at the top level (1 for a scalar).
    pub fn len(&self) -> usize {
        match self {
            Signal::Scalar(_) => 1,
            Signal::Sequence(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Signal::Sequence(items) if items.is_empty())
    }

    pub fn as_operand(&self) -> Option<&Operand> {
        match self {
            Signal::Scalar(operand) => Some(operand),
            Signal::Sequence(_) => None,
        }
    }

    /// Channel `index`, wrapping around like multichannel expansion does.
    pub fn channel(&self, index: usize) -> Option<&Signal> {
        match self {
            Signal::Scalar(_) => Some(self),
            Signal::Sequence(items) if items.is_empty() => None,
            Signal::Sequence(items) => items.get(index % items.len()),
        }
    }

    pub(crate) fn has_nested_sequence(&self) -> bool {
        match self {
            Signal::Scalar(_) => false,
            Signal::Sequence(items) => items.iter().any(|item| matches!(item, Signal::Sequence(_))),
        }
    }

    /// Depth-first operands, flattening all nesting.
    pub fn operands(&self) -> Vec<Operand> {
        let mut out = Vec::new();
        self.collect_operands(&mut out);
        out
    }

    fn collect_operands(&self, out: &mut Vec<Operand>) {
        match self {
            Signal::Scalar(operand) => out.push(*operand),
            Signal::Sequence(items) => {
                for item in items {
                    item.collect_operands(out);
                }
            }
        }
    }
}

impl From<f32> for Signal {
    fn from(value: f32) -> Self {
        Signal::Scalar(Operand::Constant(value))
    }
}

impl From<f64> for Signal {
    fn from(value: f64) -> Self {
        Signal::Scalar(Operand::Constant(value as f32))
    }
}

impl From<i32> for Signal {
    fn from(value: i32) -> Self {
        Signal::Scalar(Operand::Constant(value as f32))
    }
}

impl From<Operand> for Signal {
    fn from(operand: Operand) -> Self {
        Signal::Scalar(operand)
    }
}

impl From<OutputProxy> for Signal {
    fn from(proxy: OutputProxy) -> Self {
        Signal::Scalar(Operand::Output(proxy))
    }
}

impl<T: Into<Signal>> From<Vec<T>> for Signal {
    fn from(items: Vec<T>) -> Self {
        Signal::Sequence(items.into_iter().map(Into::into).collect())
    }
}

/// A node as recorded by the builder, after multichannel expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct UGenNode {
    pub(crate) spec: Arc<UGenSpecification>,
    pub(crate) rate: CalculationRate,
    pub(crate) inputs: Vec<Operand>,
    /// Declared input index each flat operand came from.
    pub(crate) origins: Vec<usize>,
    pub(crate) output_count: u32,
    pub(crate) special_index: i16,
}

impl UGenNode {
    pub fn spec(&self) -> &UGenSpecification {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn rate(&self) -> CalculationRate {
        self.rate
    }

    pub fn inputs(&self) -> &[Operand] {
        &self.inputs
    }

    pub fn output_count(&self) -> u32 {
        self.output_count
    }

    pub fn special_index(&self) -> i16 {
        self.special_index
    }
}

/// A declared synth parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub rate: ParameterRate,
    pub defaults: Vec<f32>,
    pub lag: f32,
}

impl Parameter {
    pub fn slot_count(&self) -> usize {
        self.defaults.len()
    }
}

/// Everything a builder recorded; the compiler's input.
#[derive(Debug, Clone)]
pub struct SynthDefGraph {
    pub(crate) id: GraphId,
    pub(crate) nodes: Vec<UGenNode>,
    pub(crate) parameters: Vec<Parameter>,
}

impl SynthDefGraph {
    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn nodes(&self) -> &[UGenNode] {
        &self.nodes
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }
}
