//! Lowering a builder graph into a [`SynthDef`].
//!
//! Passes, in order: parameter controls are materialized as control ugens,
//! rate mismatches are bridged with `A2K`/`K2A`, identical side-effect-free
//! ugens are merged, the survivors are sorted topologically, and finally
//! constants are pooled in first-use order.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use strophe_types::{CalculationRate, ParameterRate};

use crate::error::{GraphError, SerializationError, SynthDefResult};
use crate::graph::{Operand, Parameter, SynthDefGraph};
use crate::spec::{self, UGenSpecification};
use crate::synthdef::{CompiledUGen, InputRef, ParameterInfo, SynthDef};

/// A resolved input. Constants are kept as bit patterns so wires can be hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Wire {
    Constant(u32),
    Output { node: usize, output: u32 },
}

impl Wire {
    fn constant(value: f32) -> Self {
        Wire::Constant(value.to_bits())
    }
}

#[derive(Debug, Clone)]
struct WorkNode {
    spec: Arc<UGenSpecification>,
    rate: CalculationRate,
    inputs: Vec<Wire>,
    origins: Vec<usize>,
    output_count: u32,
    special_index: i16,
}

impl WorkNode {
    fn converter(spec: Arc<UGenSpecification>, rate: CalculationRate, source: Wire) -> Self {
        Self {
            spec,
            rate,
            inputs: vec![source],
            origins: vec![0],
            output_count: 1,
            special_index: 0,
        }
    }
}

/// Structural identity used for common subexpression elimination.
#[derive(PartialEq, Eq, Hash)]
struct NodeKey {
    name: String,
    rate: CalculationRate,
    special_index: i16,
    output_count: u32,
    inputs: Vec<Wire>,
}

pub(crate) fn compile(graph: &SynthDefGraph, name: Option<&str>) -> SynthDefResult<SynthDef> {
    let mut work = Vec::with_capacity(graph.nodes.len() + 4);
    let (slots, parameters) = materialize_parameters(&graph.parameters, &mut work)?;

    let offset = work.len();
    for node in &graph.nodes {
        let inputs = node
            .inputs
            .iter()
            .map(|operand| match operand {
                Operand::Constant(value) => Wire::constant(*value),
                Operand::Output(proxy) => Wire::Output {
                    node: offset + proxy.node.index(),
                    output: proxy.output,
                },
                Operand::Parameter(proxy) => slots[proxy.parameter][proxy.slot as usize],
            })
            .collect();
        work.push(WorkNode {
            spec: Arc::clone(&node.spec),
            rate: node.rate,
            inputs,
            origins: node.origins.clone(),
            output_count: node.output_count,
            special_index: node.special_index,
        });
    }

    let order: Vec<usize> = (0..work.len()).collect();
    let order = coerce_rates(&mut work, &order)?;
    let order = eliminate_common_subexpressions(&mut work, &order);
    let sorted = sort_topologically(&work, &order)?;

    let mut synthdef = SynthDef {
        name: name.map(str::to_string),
        anonymous_name: String::new(),
        constants: Vec::new(),
        parameters,
        ugens: Vec::with_capacity(sorted.len()),
    };
    emit(&work, &sorted, &mut synthdef);
    synthdef.anonymous_name = content_hash(&synthdef)?;

    log::debug!(
        target: "synthdef::compiler",
        "compiled {} ({} ugens, {} constants, {} parameters)",
        synthdef.actual_name(),
        synthdef.ugens.len(),
        synthdef.constants.len(),
        synthdef.parameters.len()
    );
    Ok(synthdef)
}

/// Creates one control ugen per parameter rate group and returns, for each
/// declared parameter, the wire feeding each of its slots.
fn materialize_parameters(
    parameters: &[Parameter],
    work: &mut Vec<WorkNode>,
) -> SynthDefResult<(Vec<Vec<Wire>>, Vec<ParameterInfo>)> {
    let mut slots = vec![Vec::new(); parameters.len()];
    let mut infos = Vec::with_capacity(parameters.len());
    let mut next_index: u32 = 0;

    for rate in [
        ParameterRate::Scalar,
        ParameterRate::Trigger,
        ParameterRate::Audio,
        ParameterRate::Control,
    ] {
        let members: Vec<usize> = parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.rate == rate)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            continue;
        }
        let lagged = members.iter().any(|&i| parameters[i].lag != 0.0);
        let spec = spec::builtin(rate.control_ugen_name(lagged))?;
        let special_index =
            i16::try_from(next_index).map_err(|_| SerializationError::CountOverflow {
                what: "control slot",
                count: next_index as usize,
            })?;
        let node = work.len();
        let mut output = 0u32;
        let mut lags = Vec::new();

        for &i in &members {
            let parameter = &parameters[i];
            infos.push(ParameterInfo {
                name: parameter.name.clone(),
                rate,
                index: next_index + output,
                defaults: parameter.defaults.clone(),
                lag: parameter.lag,
            });
            for _ in &parameter.defaults {
                slots[i].push(Wire::Output { node, output });
                if lagged {
                    lags.push(Wire::constant(parameter.lag));
                }
                output += 1;
            }
        }

        work.push(WorkNode {
            spec,
            rate: rate.calculation_rate(),
            origins: vec![0; lags.len()],
            inputs: lags,
            output_count: output,
            special_index,
        });
        next_index += output;
    }
    Ok((slots, infos))
}

/// Inserts `A2K` ahead of control-rate consumers reading audio, and `K2A`
/// ahead of audio-only inputs fed slower signals. Converters are shared per
/// source and target rate, and each is placed right before its first consumer.
fn coerce_rates(work: &mut Vec<WorkNode>, order: &[usize]) -> SynthDefResult<Vec<usize>> {
    let mut converters: HashMap<(Wire, CalculationRate), usize> = HashMap::new();
    let mut coerced = Vec::with_capacity(order.len());

    for &consumer in order {
        for slot in 0..work[consumer].inputs.len() {
            let source = work[consumer].inputs[slot];
            let Wire::Output { node: producer, .. } = source else {
                continue;
            };
            let producer_rate = work[producer].rate;
            let target = match work[consumer].rate {
                CalculationRate::Control if producer_rate == CalculationRate::Audio => {
                    CalculationRate::Control
                }
                CalculationRate::Audio
                    if matches!(
                        producer_rate,
                        CalculationRate::Scalar | CalculationRate::Control
                    ) && work[consumer].spec.requires_audio(work[consumer].origins[slot]) =>
                {
                    CalculationRate::Audio
                }
                _ => continue,
            };
            let converter = match converters.get(&(source, target)) {
                Some(&existing) => existing,
                None => {
                    let name = if target == CalculationRate::Audio { "K2A" } else { "A2K" };
                    let index = work.len();
                    work.push(WorkNode::converter(spec::builtin(name)?, target, source));
                    converters.insert((source, target), index);
                    coerced.push(index);
                    log::trace!(
                        target: "synthdef::compiler",
                        "inserted {} before {}",
                        name,
                        work[consumer].spec.name
                    );
                    index
                }
            };
            work[consumer].inputs[slot] = Wire::Output {
                node: converter,
                output: 0,
            };
        }
        coerced.push(consumer);
    }
    Ok(coerced)
}

/// Merges structurally identical side-effect-free nodes into their first
/// occurrence. `order` must list producers before consumers.
fn eliminate_common_subexpressions(work: &mut [WorkNode], order: &[usize]) -> Vec<usize> {
    let mut canonical: Vec<usize> = (0..work.len()).collect();
    let mut seen: HashMap<NodeKey, usize> = HashMap::new();
    let mut survivors = Vec::with_capacity(order.len());

    for &index in order {
        let inputs: Vec<Wire> = work[index]
            .inputs
            .iter()
            .map(|wire| match *wire {
                Wire::Output { node, output } => Wire::Output {
                    node: canonical[node],
                    output,
                },
                constant => constant,
            })
            .collect();
        work[index].inputs = inputs;

        let node = &work[index];
        if !node.spec.has_side_effects {
            let key = NodeKey {
                name: node.spec.name.clone(),
                rate: node.rate,
                special_index: node.special_index,
                output_count: node.output_count,
                inputs: node.inputs.clone(),
            };
            if let Some(&survivor) = seen.get(&key) {
                canonical[index] = survivor;
                continue;
            }
            seen.insert(key, index);
        }
        survivors.push(index);
    }

    let merged = order.len() - survivors.len();
    if merged > 0 {
        log::debug!(target: "synthdef::compiler", "merged {} duplicate ugens", merged);
    }
    survivors
}

/// Kahn-style sort over `order`. Every node depends on its wired inputs and
/// on each width-first node created before it. Ready nodes are kept on a
/// stack seeded in reverse creation order, so unconstrained nodes come out in
/// creation order and a node's descendants follow it as closely as possible.
fn sort_topologically(work: &[WorkNode], order: &[usize]) -> Result<Vec<usize>, GraphError> {
    let mut position = vec![usize::MAX; work.len()];
    for (p, &index) in order.iter().enumerate() {
        position[index] = p;
    }

    let mut pending = vec![0usize; work.len()];
    let mut descendants: Vec<Vec<usize>> = vec![Vec::new(); work.len()];
    let mut width_first: Vec<usize> = Vec::new();

    for &index in order {
        let mut antecedents: Vec<usize> = work[index]
            .inputs
            .iter()
            .filter_map(|wire| match *wire {
                Wire::Output { node, .. } => Some(node),
                Wire::Constant(_) => None,
            })
            .chain(width_first.iter().copied())
            .collect();
        antecedents.sort_by_key(|&a| position[a]);
        antecedents.dedup();
        pending[index] = antecedents.len();
        for antecedent in antecedents {
            descendants[antecedent].push(index);
        }
        if work[index].spec.is_width_first {
            width_first.push(index);
        }
    }

    let mut available: Vec<usize> = order
        .iter()
        .rev()
        .copied()
        .filter(|&index| pending[index] == 0)
        .collect();
    let mut sorted = Vec::with_capacity(order.len());
    while let Some(index) = available.pop() {
        for &descendant in descendants[index].iter().rev() {
            pending[descendant] -= 1;
            if pending[descendant] == 0 {
                available.push(descendant);
            }
        }
        sorted.push(index);
    }

    if sorted.len() != order.len() {
        return Err(GraphError::Cycle);
    }
    Ok(sorted)
}

fn emit(work: &[WorkNode], sorted: &[usize], synthdef: &mut SynthDef) {
    let mut slot_of = vec![usize::MAX; work.len()];
    for (position, &index) in sorted.iter().enumerate() {
        slot_of[index] = position;
    }
    let mut pooled: HashMap<u32, usize> = HashMap::new();

    for &index in sorted {
        let node = &work[index];
        let inputs = node
            .inputs
            .iter()
            .map(|wire| match *wire {
                Wire::Constant(bits) => {
                    let constants = &mut synthdef.constants;
                    let slot = *pooled.entry(bits).or_insert_with(|| {
                        constants.push(f32::from_bits(bits));
                        constants.len() - 1
                    });
                    InputRef::Constant(slot)
                }
                Wire::Output { node, output } => InputRef::UGen {
                    ugen: slot_of[node],
                    output: output as usize,
                },
            })
            .collect();
        synthdef.ugens.push(CompiledUGen {
            name: node.spec.name.clone(),
            rate: node.rate,
            inputs,
            output_rates: vec![node.rate; node.output_count as usize],
            special_index: node.special_index,
        });
    }
}

fn content_hash(synthdef: &SynthDef) -> Result<String, SerializationError> {
    let body = synthdef.body_bytes()?;
    Ok(format!("{:x}", Sha256::digest(&body)))
}
