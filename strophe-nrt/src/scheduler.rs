//! Turns a [`Session`] into timestamped command bundles and the NRT datagram.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use rosc::{OscBundle, OscPacket, OscTime};
use strophe_synthdef::SynthDef;
use strophe_types::{AddAction, CalculationRate};

use crate::allocator::{BlockAllocator, NodeIdAllocator};
use crate::command::{BusMapping, Command};
use crate::error::{RenderError, RenderResult, SchedulingError};
use crate::offset::{Offset, OffsetRange};
use crate::session::{BusGroupId, BusId, BusKind, Entity, EntityId, Session, Setting};

/// Commands sharing one timetag.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub offset: Offset,
    pub commands: Vec<Command>,
}

impl Bundle {
    /// Fixed-point seconds from the start of the render.
    pub fn timetag(&self) -> OscTime {
        let seconds = self.offset.seconds();
        let whole = seconds.floor();
        OscTime {
            seconds: whole as u32,
            fractional: ((seconds - whole) * 4_294_967_296.0) as u32,
        }
    }

    pub fn to_osc(&self) -> OscBundle {
        OscBundle {
            timetag: self.timetag(),
            content: self
                .commands
                .iter()
                .map(|command| OscPacket::Message(command.to_osc_message()))
                .collect(),
        }
    }
}

/// Bus numbers assigned for one render.
#[derive(Debug, Default)]
struct BusTable {
    buses: BTreeMap<BusId, (CalculationRate, i32)>,
    groups: BTreeMap<BusGroupId, (CalculationRate, i32, i32)>,
}

impl BusTable {
    fn assign(session: &Session) -> RenderResult<Self> {
        let hardware = session.input_count() + session.output_count();
        let mut audio = BlockAllocator::new(hardware);
        let mut control = BlockAllocator::new(0);
        let mut table = BusTable::default();

        for (&id, bus) in &session.buses {
            if table.buses.contains_key(&id) {
                continue;
            }
            let allocator = match bus.rate {
                CalculationRate::Audio => &mut audio,
                _ => &mut control,
            };
            let Some(group_id) = bus.group else {
                let address = allocator.allocate(1)?;
                table.buses.insert(id, (bus.rate, address as i32));
                continue;
            };
            let Some(group) = session.bus_groups.get(&group_id) else {
                continue;
            };
            let count = group.buses.len() as u32;
            let base = match bus.kind {
                BusKind::Output(channel) => channel,
                BusKind::Input(channel) => session.output_count() + channel,
                BusKind::Private => allocator.allocate(count)?,
            };
            for (position, member) in group.buses.iter().enumerate() {
                table
                    .buses
                    .insert(*member, (group.rate, (base + position as u32) as i32));
            }
            table
                .groups
                .insert(group_id, (group.rate, base as i32, count as i32));
        }
        Ok(table)
    }

    fn mapping(&self, control: &str, setting: Setting) -> Option<(CalculationRate, BusMapping)> {
        let (rate, bus, count) = match setting {
            Setting::Value(_) => return None,
            Setting::Bus(bus) => {
                let &(rate, address) = self.buses.get(&bus)?;
                (rate, address, 1)
            }
            Setting::BusGroup(group) => *self.groups.get(&group)?,
        };
        Some((
            rate,
            BusMapping {
                control: control.to_string(),
                bus,
                count,
            },
        ))
    }

    /// Plain values, plus the audio and control mapping commands for `node`.
    fn split(
        &self,
        node: i32,
        settings: &BTreeMap<String, Setting>,
    ) -> (Vec<(String, f32)>, Vec<Command>) {
        let mut values = Vec::new();
        let mut audio = Vec::new();
        let mut control = Vec::new();
        for (name, setting) in settings {
            if let Setting::Value(value) = setting {
                values.push((name.clone(), *value));
                continue;
            }
            match self.mapping(name, *setting) {
                Some((CalculationRate::Audio, mapping)) => audio.push(mapping),
                Some((_, mapping)) => control.push(mapping),
                None => {
                    log::warn!(target: "nrt::scheduler", "node {} control {} maps to an unassigned bus", node, name);
                }
            }
        }
        let mut maps = Vec::new();
        if !audio.is_empty() {
            maps.push(Command::NodeMapToAudioBus {
                node,
                mappings: audio,
            });
        }
        if !control.is_empty() {
            maps.push(Command::NodeMapToControlBus {
                node,
                mappings: control,
            });
        }
        (values, maps)
    }
}

/// An entity that intersects the render window. Offsets are in session time.
struct Scheduled<'a> {
    id: EntityId,
    entity: &'a Entity,
    node: i32,
    depth: usize,
    start: Offset,
    stop: Offset,
}

impl Scheduled<'_> {
    /// Initial settings with pre-window changes folded in, and the changes left inside the window.
    #[allow(clippy::type_complexity)]
    fn settings(
        &self,
    ) -> (
        BTreeMap<String, Setting>,
        BTreeMap<Offset, BTreeMap<String, Setting>>,
    ) {
        let mut initial = self.entity.settings.clone();
        let mut changes: BTreeMap<Offset, BTreeMap<String, Setting>> = BTreeMap::new();
        let mut events: Vec<&(Offset, String, Setting)> = self.entity.events.iter().collect();
        events.sort_by_key(|(offset, _, _)| *offset);
        for (offset, name, setting) in events {
            if *offset <= self.start {
                initial.insert(name.clone(), *setting);
            } else if *offset < self.stop {
                changes
                    .entry(*offset)
                    .or_default()
                    .insert(name.clone(), *setting);
            }
        }
        (initial, changes)
    }
}

fn placement_depth(session: &Session, id: EntityId) -> usize {
    let mut depth = 0;
    let mut current = session.entities.get(&id).and_then(|e| e.placement);
    while let Some((_, target)) = current {
        depth += 1;
        current = session.entities.get(&target).and_then(|e| e.placement);
    }
    depth
}

/// Schedule `session`, optionally restricted to `range` and rebased so the range starts at zero.
pub fn to_bundles(session: &Session, range: Option<OffsetRange>) -> RenderResult<Vec<Bundle>> {
    let window = range.unwrap_or(OffsetRange {
        start: Offset::ZERO,
        stop: Offset::INFINITY,
    });
    let delta = -window.start.seconds();
    let buses = BusTable::assign(session)?;

    let masked = session.lifetimes.masked(&window);
    let mut order: Vec<(Offset, Offset, EntityId)> = masked
        .iter()
        .map(|lifetime| (lifetime.start, lifetime.stop, lifetime.entity))
        .collect();
    order.sort_by_key(|&(start, _, id)| (start, id));

    let mut node_ids = NodeIdAllocator::new();
    let mut nodes: BTreeMap<EntityId, i32> = BTreeMap::new();
    let mut scheduled = Vec::with_capacity(order.len());
    for (start, stop, id) in order {
        let entity = session
            .entities
            .get(&id)
            .ok_or(SchedulingError::UnknownEntity(id.get()))?;
        let node = node_ids.allocate()?;
        nodes.insert(id, node);
        scheduled.push(Scheduled {
            id,
            entity,
            node,
            depth: placement_depth(session, id),
            start,
            stop,
        });
    }

    let mut timeline: BTreeMap<Offset, Vec<Command>> = BTreeMap::new();

    // Each definition is sent once, at its first use.
    let mut known: BTreeMap<&str, &Arc<SynthDef>> = BTreeMap::new();
    let mut receives: BTreeMap<Offset, BTreeMap<&str, &Arc<SynthDef>>> = BTreeMap::new();
    for item in &scheduled {
        let Some(synthdef) = item.entity.synthdef() else {
            continue;
        };
        let name = synthdef.actual_name();
        match known.get(name) {
            Some(existing) if Arc::ptr_eq(existing, synthdef) || ***existing == **synthdef => {}
            Some(_) => return Err(SchedulingError::ConflictingSynthDef(name.to_string()).into()),
            None => {
                known.insert(name, synthdef);
                receives.entry(item.start).or_default().insert(name, synthdef);
            }
        }
    }
    for (offset, synthdefs) in receives {
        let commands = timeline.entry(offset.shifted(delta)).or_default();
        for (name, synthdef) in synthdefs {
            commands.push(Command::SynthDefReceive {
                name: name.to_string(),
                bytes: synthdef.to_bytes()?,
            });
        }
    }

    let mut bus_sets: BTreeMap<Offset, Vec<(i32, f32)>> = BTreeMap::new();
    for (id, bus) in &session.buses {
        let Some(&(_, address)) = buses.buses.get(id) else {
            continue;
        };
        let mut carried = None;
        for (&offset, &value) in &bus.events {
            if offset <= window.start {
                carried = Some(value);
            } else if offset < window.stop {
                bus_sets
                    .entry(offset.shifted(delta))
                    .or_default()
                    .push((address, value));
            }
        }
        if let Some(value) = carried {
            bus_sets.entry(Offset::ZERO).or_default().push((address, value));
        }
    }
    for (offset, mut pairs) in bus_sets {
        pairs.sort_by_key(|&(address, _)| address);
        timeline
            .entry(offset)
            .or_default()
            .push(Command::ControlBusSet(pairs));
    }

    let mut creation: Vec<&Scheduled> = scheduled.iter().collect();
    creation.sort_by_key(|item| (item.start, item.depth, item.node));
    for item in creation {
        let (action, target) = match item.entity.placement {
            Some((action, target)) => {
                let target = nodes
                    .get(&target)
                    .copied()
                    .ok_or(SchedulingError::UnknownEntity(target.get()))?;
                (action, target)
            }
            None => (AddAction::AddToHead, 0),
        };
        let (initial, changes) = item.settings();
        let (values, maps) = buses.split(item.node, &initial);
        let commands = timeline.entry(item.start.shifted(delta)).or_default();
        match item.entity.synthdef() {
            Some(synthdef) => commands.push(Command::SynthNew {
                synthdef: synthdef.actual_name().to_string(),
                node: item.node,
                action,
                target,
                controls: values,
            }),
            None => {
                commands.push(Command::GroupNew {
                    node: item.node,
                    action,
                    target,
                });
                if !values.is_empty() {
                    commands.push(Command::NodeSet {
                        node: item.node,
                        controls: values,
                    });
                }
            }
        }
        commands.extend(maps);

        for (offset, settings) in changes {
            let (values, maps) = buses.split(item.node, &settings);
            let commands = timeline.entry(offset.shifted(delta)).or_default();
            if !values.is_empty() {
                commands.push(Command::NodeSet {
                    node: item.node,
                    controls: values,
                });
            }
            commands.extend(maps);
        }
    }

    let mut frees: BTreeMap<Offset, Vec<(Reverse<usize>, i32)>> = BTreeMap::new();
    for item in scheduled.iter().filter(|item| item.stop.is_finite()) {
        frees
            .entry(item.stop)
            .or_default()
            .push((Reverse(item.depth), item.node));
    }
    for (offset, mut freed) in frees {
        freed.sort();
        timeline
            .entry(offset.shifted(delta))
            .or_default()
            .push(Command::NodeFree(freed.into_iter().map(|(_, node)| node).collect()));
    }

    let mut bundles: Vec<Bundle> = timeline
        .into_iter()
        .filter(|(_, commands)| !commands.is_empty())
        .map(|(offset, mut commands)| {
            commands.sort_by_key(Command::priority);
            Bundle { offset, commands }
        })
        .collect();
    if bundles.is_empty() {
        return Err(RenderError::EmptySession);
    }
    if window.stop.is_finite() {
        let end = window.stop.shifted(delta);
        if bundles.last().is_some_and(|bundle| bundle.offset < end) {
            bundles.push(Bundle {
                offset: end,
                commands: Vec::new(),
            });
        }
    }

    log::debug!(
        target: "nrt::scheduler",
        "scheduled {} entities into {} bundles (nodes {:?})",
        scheduled.len(),
        bundles.len(),
        scheduled.iter().map(|item| (item.id.get(), item.node)).collect::<Vec<_>>()
    );
    Ok(bundles)
}

/// Length-prefixed OSC bundles, as read by an offline server.
pub fn encode_bundles(bundles: &[Bundle]) -> RenderResult<Vec<u8>> {
    let mut datagram = Vec::new();
    for bundle in bundles {
        let packet = OscPacket::Bundle(bundle.to_osc());
        let buf = rosc::encoder::encode(&packet).map_err(|e| RenderError::Encoding(e.to_string()))?;
        let length = i32::try_from(buf.len())
            .map_err(|_| RenderError::Encoding(format!("bundle of {} bytes is too large", buf.len())))?;
        datagram.extend_from_slice(&length.to_be_bytes());
        datagram.extend_from_slice(&buf);
    }
    Ok(datagram)
}

pub fn to_datagram(session: &Session, range: Option<OffsetRange>) -> RenderResult<Vec<u8>> {
    let bundles = to_bundles(session, range)?;
    encode_bundles(&bundles)
}
