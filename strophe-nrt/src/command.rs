//! Server commands emitted by the scheduler, and their OSC form.

use rosc::{OscMessage, OscType};
use strophe_types::AddAction;

/// One `name index count` triple of an `/n_mapan` or `/n_mapn` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMapping {
    pub control: String,
    pub bus: i32,
    pub count: i32,
}

/// A single server command. Variants are listed in emission priority.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SynthDefReceive {
        name: String,
        bytes: Vec<u8>,
    },
    ControlBusSet(Vec<(i32, f32)>),
    GroupNew {
        node: i32,
        action: AddAction,
        target: i32,
    },
    SynthNew {
        synthdef: String,
        node: i32,
        action: AddAction,
        target: i32,
        controls: Vec<(String, f32)>,
    },
    NodeMapToAudioBus {
        node: i32,
        mappings: Vec<BusMapping>,
    },
    NodeMapToControlBus {
        node: i32,
        mappings: Vec<BusMapping>,
    },
    NodeSet {
        node: i32,
        controls: Vec<(String, f32)>,
    },
    NodeFree(Vec<i32>),
}

impl Command {
    /// Lower values are emitted first within a bundle.
    pub fn priority(&self) -> u8 {
        match self {
            Command::SynthDefReceive { .. } => 0,
            Command::ControlBusSet(_) => 1,
            Command::GroupNew { .. } => 2,
            Command::SynthNew { .. } => 3,
            Command::NodeMapToAudioBus { .. } => 4,
            Command::NodeMapToControlBus { .. } => 5,
            Command::NodeSet { .. } => 6,
            Command::NodeFree(_) => 7,
        }
    }

    pub fn address(&self) -> &'static str {
        match self {
            Command::SynthDefReceive { .. } => "/d_recv",
            Command::ControlBusSet(_) => "/c_set",
            Command::GroupNew { .. } => "/g_new",
            Command::SynthNew { .. } => "/s_new",
            Command::NodeMapToAudioBus { .. } => "/n_mapan",
            Command::NodeMapToControlBus { .. } => "/n_mapn",
            Command::NodeSet { .. } => "/n_set",
            Command::NodeFree(_) => "/n_free",
        }
    }

    pub fn to_osc_message(&self) -> OscMessage {
        let args = match self {
            Command::SynthDefReceive { bytes, .. } => vec![OscType::Blob(bytes.clone())],
            Command::ControlBusSet(pairs) => pairs
                .iter()
                .flat_map(|&(bus, value)| [OscType::Int(bus), OscType::Float(value)])
                .collect(),
            Command::GroupNew {
                node,
                action,
                target,
            } => vec![
                OscType::Int(*node),
                OscType::Int(action.as_i32()),
                OscType::Int(*target),
            ],
            Command::SynthNew {
                synthdef,
                node,
                action,
                target,
                controls,
            } => {
                let mut args = vec![
                    OscType::String(synthdef.clone()),
                    OscType::Int(*node),
                    OscType::Int(action.as_i32()),
                    OscType::Int(*target),
                ];
                push_controls(&mut args, controls);
                args
            }
            Command::NodeMapToAudioBus { node, mappings }
            | Command::NodeMapToControlBus { node, mappings } => {
                let mut args = vec![OscType::Int(*node)];
                for mapping in mappings {
                    args.push(OscType::String(mapping.control.clone()));
                    args.push(OscType::Int(mapping.bus));
                    args.push(OscType::Int(mapping.count));
                }
                args
            }
            Command::NodeSet { node, controls } => {
                let mut args = vec![OscType::Int(*node)];
                push_controls(&mut args, controls);
                args
            }
            Command::NodeFree(nodes) => nodes.iter().map(|&node| OscType::Int(node)).collect(),
        };
        OscMessage {
            addr: self.address().to_string(),
            args,
        }
    }
}

fn push_controls(args: &mut Vec<OscType>, controls: &[(String, f32)]) {
    for (name, value) in controls {
        args.push(OscType::String(name.clone()));
        args.push(OscType::Float(*value));
    }
}
