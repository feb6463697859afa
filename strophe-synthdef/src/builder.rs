//! Graph construction.
//!
//! A [`SynthDefBuilder`] owns the node arena. Nodes are added through a
//! [`BuilderScope`], of which at most one may be open per thread; opening a
//! second one fails with [`ContextError::NestedScope`] until the first is
//! dropped.

use std::cell::Cell;
use std::sync::Arc;

use strophe_types::{CalculationRate, ParameterRate};

use crate::compiler::compile;
use crate::error::{ContextError, GraphError, SynthDefResult};
use crate::graph::{
    GraphId, NodeId, Operand, OutputProxy, Parameter, ParameterProxy, Signal, SynthDefGraph,
    UGenNode,
};
use crate::operator::{BinaryOperator, UnaryOperator};
use crate::spec::{self, OutputRule, UGenSpecification};
use crate::synthdef::SynthDef;

thread_local! {
    static ACTIVE_SCOPE: Cell<Option<GraphId>> = const { Cell::new(None) };
}

/// Per-call settings that are not ugen inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UGenOptions {
    pub channel_count: Option<u32>,
    pub special_index: i16,
}

pub struct SynthDefBuilder {
    id: GraphId,
    name: Option<String>,
    nodes: Vec<UGenNode>,
    parameters: Vec<Parameter>,
}

impl Default for SynthDefBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthDefBuilder {
    pub fn new() -> Self {
        Self {
            id: GraphId::fresh(),
            name: None,
            nodes: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// A builder whose definition carries an explicit name instead of its content hash.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn nodes(&self) -> &[UGenNode] {
        &self.nodes
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Declare a single-slot parameter.
    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        rate: ParameterRate,
        default: f32,
    ) -> SynthDefResult<Signal> {
        self.declare(Parameter {
            name: name.into(),
            rate,
            defaults: vec![default],
            lag: 0.0,
        })
    }

    /// Declare a parameter occupying one control slot per default value.
    pub fn add_array_parameter(
        &mut self,
        name: impl Into<String>,
        rate: ParameterRate,
        defaults: Vec<f32>,
    ) -> SynthDefResult<Signal> {
        self.declare(Parameter {
            name: name.into(),
            rate,
            defaults,
            lag: 0.0,
        })
    }

    /// Declare a parameter smoothed over `lag` seconds. Only control rate
    /// parameters can be lagged.
    pub fn add_lagged_parameter(
        &mut self,
        name: impl Into<String>,
        rate: ParameterRate,
        default: f32,
        lag: f32,
    ) -> SynthDefResult<Signal> {
        self.declare(Parameter {
            name: name.into(),
            rate,
            defaults: vec![default],
            lag,
        })
    }

    fn declare(&mut self, parameter: Parameter) -> SynthDefResult<Signal> {
        if self.parameters.iter().any(|p| p.name == parameter.name) {
            return Err(GraphError::DuplicateParameter(parameter.name).into());
        }
        if parameter.defaults.is_empty() {
            return Err(GraphError::EmptyParameter(parameter.name).into());
        }
        if parameter.lag != 0.0 && parameter.rate != ParameterRate::Control {
            return Err(GraphError::InvalidLag(parameter.name).into());
        }
        self.parameters.push(parameter);
        let index = self.parameters.len() - 1;
        Ok(self.parameter_signal(index))
    }

    /// The signal of a previously declared parameter.
    pub fn parameter(&self, name: &str) -> Option<Signal> {
        self.parameters
            .iter()
            .position(|p| p.name == name)
            .map(|index| self.parameter_signal(index))
    }

    fn parameter_signal(&self, index: usize) -> Signal {
        let parameter = &self.parameters[index];
        let mut slots: Vec<Signal> = (0..parameter.slot_count() as u32)
            .map(|slot| {
                Signal::Scalar(Operand::Parameter(ParameterProxy {
                    graph: self.id,
                    parameter: index,
                    slot,
                    rate: parameter.rate,
                }))
            })
            .collect();
        if slots.len() == 1 {
            slots.swap_remove(0)
        } else {
            Signal::Sequence(slots)
        }
    }

    /// Open the construction scope for this builder.
    pub fn scope(&mut self) -> SynthDefResult<BuilderScope<'_>> {
        ACTIVE_SCOPE.with(|active| match active.get() {
            Some(other) => Err(ContextError::NestedScope {
                active: other.get(),
            }),
            None => {
                active.set(Some(self.id));
                Ok(())
            }
        })?;
        Ok(BuilderScope { builder: self })
    }

    /// Run `body` inside a scope, then compile.
    pub fn build_with<F>(mut self, body: F) -> SynthDefResult<SynthDef>
    where
        F: FnOnce(&mut BuilderScope<'_>) -> SynthDefResult<()>,
    {
        {
            let mut scope = self.scope()?;
            body(&mut scope)?;
        }
        self.build()
    }

    pub fn graph(&self) -> SynthDefGraph {
        SynthDefGraph {
            id: self.id,
            nodes: self.nodes.clone(),
            parameters: self.parameters.clone(),
        }
    }

    pub fn build(&self) -> SynthDefResult<SynthDef> {
        compile(&self.graph(), self.name.as_deref())
    }
}

/// The active construction scope. Dropping it releases the thread's scope slot.
pub struct BuilderScope<'a> {
    builder: &'a mut SynthDefBuilder,
}

impl Drop for BuilderScope<'_> {
    fn drop(&mut self) {
        ACTIVE_SCOPE.with(|active| active.set(None));
    }
}

impl<'a> BuilderScope<'a> {
    pub fn graph_id(&self) -> GraphId {
        self.builder.id
    }

    pub fn node_count(&self) -> usize {
        self.builder.nodes.len()
    }

    pub fn parameter(&self, name: &str) -> Option<Signal> {
        self.builder.parameter(name)
    }

    /// Add a ugen with positional inputs, one per declared input.
    pub fn add(
        &mut self,
        spec: &Arc<UGenSpecification>,
        rate: CalculationRate,
        inputs: Vec<Signal>,
    ) -> SynthDefResult<Signal> {
        self.add_with(spec, rate, inputs, UGenOptions::default())
    }

    pub fn add_with(
        &mut self,
        spec: &Arc<UGenSpecification>,
        rate: CalculationRate,
        inputs: Vec<Signal>,
        options: UGenOptions,
    ) -> SynthDefResult<Signal> {
        if !spec.supports_rate(rate) {
            return Err(GraphError::InvalidRate {
                ugen: spec.name.clone(),
                rate,
            }
            .into());
        }
        if inputs.len() != spec.inputs.len() {
            return Err(GraphError::Arity {
                ugen: spec.name.clone(),
                expected: spec.inputs.len(),
                actual: inputs.len(),
            }
            .into());
        }
        self.add_expanded(spec, rate, inputs, options)
    }

    /// Start a call to a catalog ugen with named inputs.
    pub fn ugen<'s>(&'s mut self, name: &str, rate: CalculationRate) -> UGenCall<'s, 'a> {
        UGenCall {
            scope: self,
            name: name.to_string(),
            rate,
            inputs: Vec::new(),
            options: UGenOptions::default(),
        }
    }

    pub fn binary(
        &mut self,
        operator: BinaryOperator,
        left: impl Into<Signal>,
        right: impl Into<Signal>,
    ) -> SynthDefResult<Signal> {
        let left = left.into();
        let right = right.into();
        match (left.as_operand().copied(), right.as_operand().copied()) {
            (Some(l), Some(r)) => {
                match (l.as_constant(), r.as_constant()) {
                    (Some(a), Some(b)) => {
                        if let Some(value) = operator.fold(a, b) {
                            return Ok(Signal::from(value));
                        }
                    }
                    (Some(a), None) if operator.passes_through(a, true) => return Ok(right),
                    (None, Some(b)) if operator.passes_through(b, false) => return Ok(left),
                    _ => {}
                }
                let rate = l.rate().max(r.rate());
                let spec = spec::builtin("BinaryOpUGen")?;
                let options = UGenOptions {
                    special_index: operator.special_index(),
                    ..UGenOptions::default()
                };
                self.add_with(&spec, rate, vec![left, right], options)
            }
            _ => {
                let width = channel_width("BinaryOpUGen", &[&left, &right])?;
                let mut channels = Vec::with_capacity(width);
                for i in 0..width {
                    let (Some(l), Some(r)) = (left.channel(i), right.channel(i)) else {
                        continue;
                    };
                    channels.push(self.binary(operator, l.clone(), r.clone())?);
                }
                Ok(Signal::Sequence(channels))
            }
        }
    }

    pub fn unary(
        &mut self,
        operator: UnaryOperator,
        source: impl Into<Signal>,
    ) -> SynthDefResult<Signal> {
        let source = source.into();
        match &source {
            Signal::Scalar(operand) => {
                if let Some(value) = operand.as_constant().and_then(|v| operator.fold(v)) {
                    return Ok(Signal::from(value));
                }
                let spec = spec::builtin("UnaryOpUGen")?;
                let options = UGenOptions {
                    special_index: operator.special_index(),
                    ..UGenOptions::default()
                };
                self.add_with(&spec, operand.rate(), vec![source.clone()], options)
            }
            Signal::Sequence(items) => {
                if items.is_empty() {
                    return Err(empty_sequence("UnaryOpUGen", "source"));
                }
                let mut channels = Vec::with_capacity(items.len());
                for item in items {
                    channels.push(self.unary(operator, item.clone())?);
                }
                Ok(Signal::Sequence(channels))
            }
        }
    }

    fn add_expanded(
        &mut self,
        spec: &Arc<UGenSpecification>,
        rate: CalculationRate,
        inputs: Vec<Signal>,
        options: UGenOptions,
    ) -> SynthDefResult<Signal> {
        let mut width = 0;
        for (index, input) in inputs.iter().enumerate() {
            if let Signal::Sequence(items) = input {
                if items.is_empty() {
                    return Err(empty_sequence(&spec.name, &spec.inputs[index].name));
                }
                if expands(spec, index, input) {
                    width = width.max(items.len());
                }
            }
        }
        if width == 0 {
            return self.add_single(spec, rate, &inputs, options);
        }
        let mut instances = Vec::with_capacity(width);
        for i in 0..width {
            let instance: Vec<Signal> = inputs
                .iter()
                .enumerate()
                .map(|(index, input)| match input {
                    Signal::Sequence(items) if expands(spec, index, input) => {
                        items[i % items.len()].clone()
                    }
                    other => other.clone(),
                })
                .collect();
            instances.push(self.add_expanded(spec, rate, instance, options)?);
        }
        Ok(Signal::Sequence(instances))
    }

    fn add_single(
        &mut self,
        spec: &Arc<UGenSpecification>,
        rate: CalculationRate,
        inputs: &[Signal],
        options: UGenOptions,
    ) -> SynthDefResult<Signal> {
        let mut operands = Vec::with_capacity(inputs.len());
        let mut origins = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            for operand in input.operands() {
                self.check_graph(&operand)?;
                if rate == CalculationRate::Scalar && operand.rate() > CalculationRate::Scalar {
                    return Err(GraphError::RateMismatch {
                        ugen: spec.name.clone(),
                        rate: operand.rate(),
                    }
                    .into());
                }
                operands.push(operand);
                origins.push(index);
            }
        }

        let output_count = match (spec.outputs, options.channel_count) {
            (OutputRule::Fixed { count }, None) => count,
            (OutputRule::Fixed { .. }, Some(_)) => {
                return Err(GraphError::ChannelCount {
                    ugen: spec.name.clone(),
                    reason: "channel count is fixed".to_string(),
                }
                .into())
            }
            (OutputRule::ChannelCount { default }, requested) => {
                let count = requested.unwrap_or(default);
                if count == 0 {
                    return Err(GraphError::ChannelCount {
                        ugen: spec.name.clone(),
                        reason: "channel count must be at least 1".to_string(),
                    }
                    .into());
                }
                count
            }
        };

        let node = NodeId(self.builder.nodes.len());
        self.builder.nodes.push(UGenNode {
            spec: Arc::clone(spec),
            rate,
            inputs: operands,
            origins,
            output_count,
            special_index: options.special_index,
        });
        log::trace!(target: "synthdef::builder", "{}.{} -> node {}", spec.name, rate, node.0);

        let graph = self.builder.id;
        let mut outputs: Vec<Signal> = (0..output_count)
            .map(|output| {
                Signal::from(OutputProxy {
                    graph,
                    node,
                    output,
                    rate,
                })
            })
            .collect();
        Ok(if outputs.len() == 1 {
            outputs.remove(0)
        } else {
            Signal::Sequence(outputs)
        })
    }

    fn check_graph(&self, operand: &Operand) -> Result<(), ContextError> {
        match operand.graph() {
            Some(graph) if graph != self.builder.id => Err(ContextError::ForeignSignal {
                signal: graph.get(),
                active: self.builder.id.get(),
            }),
            _ => Ok(()),
        }
    }
}

/// Whether `input` fans the ugen out rather than being spliced into its slots.
fn expands(spec: &UGenSpecification, index: usize, input: &Signal) -> bool {
    !spec.is_unexpanded(index) || input.has_nested_sequence()
}

fn channel_width(ugen: &str, signals: &[&Signal]) -> SynthDefResult<usize> {
    let mut width = 1;
    for signal in signals {
        if signal.is_empty() {
            return Err(empty_sequence(ugen, "operand"));
        }
        width = width.max(signal.len());
    }
    Ok(width)
}

fn empty_sequence(ugen: &str, input: &str) -> crate::error::SynthDefError {
    GraphError::EmptySequence {
        ugen: ugen.to_string(),
        input: input.to_string(),
    }
    .into()
}

/// Named-input call to a catalog ugen; unspecified inputs take their defaults.
pub struct UGenCall<'s, 'a> {
    scope: &'s mut BuilderScope<'a>,
    name: String,
    rate: CalculationRate,
    inputs: Vec<(String, Signal)>,
    options: UGenOptions,
}

impl UGenCall<'_, '_> {
    pub fn input(mut self, name: &str, signal: impl Into<Signal>) -> Self {
        self.inputs.push((name.to_string(), signal.into()));
        self
    }

    pub fn channel_count(mut self, count: u32) -> Self {
        self.options.channel_count = Some(count);
        self
    }

    pub fn special_index(mut self, index: i16) -> Self {
        self.options.special_index = index;
        self
    }

    pub fn finish(self) -> SynthDefResult<Signal> {
        let spec = spec::catalog()
            .get(&self.name)
            .ok_or_else(|| GraphError::UnknownUGen(self.name.clone()))?;
        for (name, _) in &self.inputs {
            if spec.input_index(name).is_none() {
                return Err(GraphError::UnknownInput {
                    ugen: spec.name.clone(),
                    input: name.clone(),
                }
                .into());
            }
        }
        let mut ordered = Vec::with_capacity(spec.inputs.len());
        for input in &spec.inputs {
            // Last assignment wins.
            let supplied = self
                .inputs
                .iter()
                .rev()
                .find(|(name, _)| *name == input.name)
                .map(|(_, signal)| signal.clone());
            match supplied.or_else(|| input.default.map(Signal::from)) {
                Some(signal) => ordered.push(signal),
                None => {
                    return Err(GraphError::MissingInput {
                        ugen: spec.name.clone(),
                        input: input.name.clone(),
                    }
                    .into())
                }
            }
        }
        self.scope.add_with(&spec, self.rate, ordered, self.options)
    }
}
