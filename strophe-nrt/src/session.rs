//! The timeline being scheduled: synths, groups, buses and their settings.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use strophe_synthdef::SynthDef;
use strophe_types::{AddAction, CalculationRate};

use crate::error::{RenderResult, SchedulingError};
use crate::offset::{Offset, OffsetRange};
use crate::scheduler::{self, Bundle};
use crate::timespan::{Timespan, TimespanCollection};

/// Handle to a synth or group, ordered by declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(u64);

impl BusId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusGroupId(u64);

impl BusGroupId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// What a synth control is set to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    Value(f32),
    /// Read continuously from one bus.
    Bus(BusId),
    /// Read consecutive controls from a bus group.
    BusGroup(BusGroupId),
}

impl From<f32> for Setting {
    fn from(value: f32) -> Self {
        Setting::Value(value)
    }
}

impl From<BusId> for Setting {
    fn from(bus: BusId) -> Self {
        Setting::Bus(bus)
    }
}

impl From<BusGroupId> for Setting {
    fn from(group: BusGroupId) -> Self {
        Setting::BusGroup(group)
    }
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    Synth(Arc<SynthDef>),
    Group,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub(crate) kind: EntityKind,
    pub(crate) start: Offset,
    pub(crate) stop: Offset,
    pub(crate) placement: Option<(AddAction, EntityId)>,
    pub(crate) settings: BTreeMap<String, Setting>,
    /// Time-varying settings, in recording order.
    pub(crate) events: Vec<(Offset, String, Setting)>,
}

impl Entity {
    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn synthdef(&self) -> Option<&Arc<SynthDef>> {
        match &self.kind {
            EntityKind::Synth(synthdef) => Some(synthdef),
            EntityKind::Group => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, EntityKind::Group)
    }

    pub fn start_offset(&self) -> Offset {
        self.start
    }

    pub fn stop_offset(&self) -> Offset {
        self.stop
    }

    pub fn placement(&self) -> Option<(AddAction, EntityId)> {
        self.placement
    }

    pub fn settings(&self) -> &BTreeMap<String, Setting> {
        &self.settings
    }
}

/// Hardware channels get fixed addresses; everything else is allocated per render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BusKind {
    Output(u32),
    Input(u32),
    Private,
}

#[derive(Debug, Clone)]
pub(crate) struct Bus {
    pub(crate) rate: CalculationRate,
    pub(crate) kind: BusKind,
    pub(crate) group: Option<BusGroupId>,
    pub(crate) events: BTreeMap<Offset, f32>,
}

#[derive(Debug, Clone)]
pub(crate) struct BusGroup {
    pub(crate) rate: CalculationRate,
    pub(crate) buses: Vec<BusId>,
}

/// The interval an entity occupies, as stored in the timespan tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Lifetime {
    pub(crate) entity: EntityId,
    pub(crate) start: Offset,
    pub(crate) stop: Offset,
}

impl Timespan for Lifetime {
    fn start_offset(&self) -> Offset {
        self.start
    }

    fn stop_offset(&self) -> Offset {
        self.stop
    }

    fn with_bounds(&self, start: Offset, stop: Offset) -> Self {
        Lifetime {
            entity: self.entity,
            start,
            stop,
        }
    }
}

/// A non-realtime score under construction.
#[derive(Debug, Clone)]
pub struct Session {
    input_count: u32,
    output_count: u32,
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) lifetimes: TimespanCollection<Lifetime>,
    pub(crate) buses: BTreeMap<BusId, Bus>,
    pub(crate) bus_groups: BTreeMap<BusGroupId, BusGroup>,
    output_group: Option<BusGroupId>,
    input_group: Option<BusGroupId>,
    next_entity: u64,
    next_bus: u64,
    next_bus_group: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(0, 2)
    }
}

impl Session {
    pub fn new(input_count: u32, output_count: u32) -> Self {
        let mut session = Session {
            input_count,
            output_count,
            entities: BTreeMap::new(),
            lifetimes: TimespanCollection::new(),
            buses: BTreeMap::new(),
            bus_groups: BTreeMap::new(),
            output_group: None,
            input_group: None,
            next_entity: 0,
            next_bus: 0,
            next_bus_group: 0,
        };
        if output_count > 0 {
            session.output_group = Some(session.hardware_group(output_count, BusKind::Output));
        }
        if input_count > 0 {
            session.input_group = Some(session.hardware_group(input_count, BusKind::Input));
        }
        session
    }

    fn hardware_group(&mut self, count: u32, kind: fn(u32) -> BusKind) -> BusGroupId {
        let group = self.next_bus_group_id();
        let buses = (0..count)
            .map(|channel| {
                self.push_bus(Bus {
                    rate: CalculationRate::Audio,
                    kind: kind(channel),
                    group: Some(group),
                    events: BTreeMap::new(),
                })
            })
            .collect();
        self.bus_groups.insert(
            group,
            BusGroup {
                rate: CalculationRate::Audio,
                buses,
            },
        );
        group
    }

    pub fn input_count(&self) -> u32 {
        self.input_count
    }

    pub fn output_count(&self) -> u32 {
        self.output_count
    }

    /// The hardware output channels, if the session has any.
    pub fn audio_output_bus_group(&self) -> Option<BusGroupId> {
        self.output_group
    }

    pub fn audio_input_bus_group(&self) -> Option<BusGroupId> {
        self.input_group
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Number of synths and groups.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Latest stop offset across all entities.
    pub fn duration(&self) -> Option<Offset> {
        self.lifetimes.stop_offset()
    }

    pub fn bus_group_buses(&self, group: BusGroupId) -> Option<&[BusId]> {
        self.bus_groups.get(&group).map(|g| g.buses.as_slice())
    }

    pub fn add_synth(
        &mut self,
        start: f64,
        stop: f64,
        synthdef: impl Into<Arc<SynthDef>>,
    ) -> Result<EntityId, SchedulingError> {
        self.add_entity(start, stop, EntityKind::Synth(synthdef.into()))
    }

    pub fn add_group(&mut self, start: f64, stop: f64) -> Result<EntityId, SchedulingError> {
        self.add_entity(start, stop, EntityKind::Group)
    }

    fn add_entity(
        &mut self,
        start: f64,
        stop: f64,
        kind: EntityKind,
    ) -> Result<EntityId, SchedulingError> {
        let start_offset = Offset::new(start)?;
        let stop_offset = Offset::new(stop)?;
        if stop_offset <= start_offset {
            return Err(SchedulingError::InvalidInterval { start, stop });
        }
        let id = EntityId(self.next_entity);
        self.next_entity += 1;
        self.entities.insert(
            id,
            Entity {
                kind,
                start: start_offset,
                stop: stop_offset,
                placement: None,
                settings: BTreeMap::new(),
                events: Vec::new(),
            },
        );
        self.lifetimes.insert(Lifetime {
            entity: id,
            start: start_offset,
            stop: stop_offset,
        });
        Ok(id)
    }

    /// Position `entity` relative to `target` instead of the head of the root group.
    pub fn place(
        &mut self,
        entity: EntityId,
        action: AddAction,
        target: EntityId,
    ) -> Result<(), SchedulingError> {
        let invalid = |reason| SchedulingError::InvalidTarget {
            entity: entity.0,
            target: target.0,
            reason,
        };
        let placed = self.require(entity)?;
        let anchor = self.require(target)?;
        if entity == target {
            return Err(invalid("an entity cannot be placed relative to itself"));
        }
        if action == AddAction::Replace {
            return Err(invalid("replacing nodes is not supported offline"));
        }
        if action.targets_group() && !anchor.is_group() {
            return Err(invalid("head and tail placement needs a group target"));
        }
        if placed.is_group() && !anchor.is_group() {
            return Err(invalid("a group cannot be placed relative to a synth"));
        }
        if anchor.start > placed.start || anchor.stop < placed.stop {
            return Err(invalid("the target does not cover the entity's lifetime"));
        }
        let mut ancestor = anchor.placement.map(|(_, id)| id);
        while let Some(id) = ancestor {
            if id == entity {
                return Err(invalid("placement would form a cycle"));
            }
            ancestor = self.entities.get(&id).and_then(|e| e.placement).map(|(_, id)| id);
        }
        if let Some(placed) = self.entities.get_mut(&entity) {
            placed.placement = Some((action, target));
        }
        Ok(())
    }

    /// Initial value or bus mapping of a control.
    pub fn set(
        &mut self,
        entity: EntityId,
        name: &str,
        setting: impl Into<Setting>,
    ) -> Result<(), SchedulingError> {
        let setting = setting.into();
        self.validate_setting(entity, name, setting)?;
        if let Some(target) = self.entities.get_mut(&entity) {
            target.settings.insert(name.to_string(), setting);
        }
        Ok(())
    }

    /// Record changes happening at `offset`, which must be finite.
    pub fn at(&mut self, offset: f64) -> Result<Moment<'_>, SchedulingError> {
        let offset = Offset::new(offset)?;
        if !offset.is_finite() {
            return Err(SchedulingError::InvalidOffset(offset.seconds()));
        }
        Ok(Moment {
            session: self,
            offset,
        })
    }

    pub fn add_bus(&mut self, rate: CalculationRate) -> Result<BusId, SchedulingError> {
        check_bus_rate(rate)?;
        Ok(self.push_bus(Bus {
            rate,
            kind: BusKind::Private,
            group: None,
            events: BTreeMap::new(),
        }))
    }

    /// A group of `count` buses that is always allocated contiguously.
    pub fn add_bus_group(
        &mut self,
        count: u32,
        rate: CalculationRate,
    ) -> Result<BusGroupId, SchedulingError> {
        check_bus_rate(rate)?;
        if count == 0 {
            return Err(SchedulingError::EmptyBusGroup);
        }
        let group = self.next_bus_group_id();
        let buses = (0..count)
            .map(|_| {
                self.push_bus(Bus {
                    rate,
                    kind: BusKind::Private,
                    group: Some(group),
                    events: BTreeMap::new(),
                })
            })
            .collect();
        self.bus_groups.insert(group, BusGroup { rate, buses });
        Ok(group)
    }

    /// Remove a synth or group along with its settings and events. Entities
    /// placed relative to it fall back to the root group.
    pub fn remove(&mut self, entity: EntityId) -> Result<(), SchedulingError> {
        let removed = self
            .entities
            .remove(&entity)
            .ok_or(SchedulingError::UnknownEntity(entity.0))?;
        self.lifetimes.remove(&Lifetime {
            entity,
            start: removed.start,
            stop: removed.stop,
        });
        for (id, other) in self.entities.iter_mut() {
            if other.placement.is_some_and(|(_, target)| target == entity) {
                log::debug!(target: "nrt::session", "entity {} loses its placement target {}", id, entity);
                other.placement = None;
            }
        }
        Ok(())
    }

    /// All bundles for the session, or for the window `range` rebased to zero.
    pub fn to_bundles(&self, range: Option<OffsetRange>) -> RenderResult<Vec<Bundle>> {
        scheduler::to_bundles(self, range)
    }

    /// The length-prefixed bundle stream consumed by an offline render.
    pub fn to_datagram(&self, range: Option<OffsetRange>) -> RenderResult<Vec<u8>> {
        scheduler::to_datagram(self, range)
    }

    fn next_bus_group_id(&mut self) -> BusGroupId {
        let id = BusGroupId(self.next_bus_group);
        self.next_bus_group += 1;
        id
    }

    fn push_bus(&mut self, bus: Bus) -> BusId {
        let id = BusId(self.next_bus);
        self.next_bus += 1;
        self.buses.insert(id, bus);
        id
    }

    fn require(&self, entity: EntityId) -> Result<&Entity, SchedulingError> {
        self.entities
            .get(&entity)
            .ok_or(SchedulingError::UnknownEntity(entity.0))
    }

    fn validate_setting(
        &self,
        entity: EntityId,
        name: &str,
        setting: Setting,
    ) -> Result<(), SchedulingError> {
        let target = self.require(entity)?;
        if let Some(synthdef) = target.synthdef() {
            if synthdef.parameter(name).is_none() {
                return Err(SchedulingError::UnknownParameter {
                    synthdef: synthdef.actual_name().to_string(),
                    parameter: name.to_string(),
                });
            }
        }
        match setting {
            Setting::Value(_) => Ok(()),
            Setting::Bus(bus) => self
                .buses
                .get(&bus)
                .map(|_| ())
                .ok_or(SchedulingError::UnknownBus(bus.0)),
            Setting::BusGroup(group) => self
                .bus_groups
                .get(&group)
                .map(|_| ())
                .ok_or(SchedulingError::UnknownBusGroup(group.0)),
        }
    }
}

fn check_bus_rate(rate: CalculationRate) -> Result<(), SchedulingError> {
    match rate {
        CalculationRate::Audio | CalculationRate::Control => Ok(()),
        other => Err(SchedulingError::InvalidBusRate(other)),
    }
}

/// Edits pinned to one offset, obtained from [`Session::at`].
pub struct Moment<'a> {
    session: &'a mut Session,
    offset: Offset,
}

impl Moment<'_> {
    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// Change a control while the entity is alive.
    pub fn set(
        &mut self,
        entity: EntityId,
        name: &str,
        setting: impl Into<Setting>,
    ) -> Result<&mut Self, SchedulingError> {
        let setting = setting.into();
        self.session.validate_setting(entity, name, setting)?;
        let offset = self.offset;
        let target = self
            .session
            .entities
            .get_mut(&entity)
            .ok_or(SchedulingError::UnknownEntity(entity.0))?;
        if offset < target.start || offset >= target.stop {
            return Err(SchedulingError::OutsideLifetime {
                entity: entity.0,
                offset: offset.seconds(),
            });
        }
        target.events.push((offset, name.to_string(), setting));
        Ok(self)
    }

    /// Write a value to a control bus.
    pub fn set_bus(&mut self, bus: BusId, value: f32) -> Result<&mut Self, SchedulingError> {
        let offset = self.offset;
        if !offset.is_finite() {
            return Err(SchedulingError::InvalidOffset(offset.seconds()));
        }
        let target = self
            .session
            .buses
            .get_mut(&bus)
            .ok_or(SchedulingError::UnknownBus(bus.0))?;
        if target.rate != CalculationRate::Control {
            return Err(SchedulingError::AudioBusSet(bus.0));
        }
        target.events.insert(offset, value);
        Ok(self)
    }

    /// Write one value per bus of a control bus group.
    pub fn set_bus_group(
        &mut self,
        group: BusGroupId,
        values: &[f32],
    ) -> Result<&mut Self, SchedulingError> {
        let members = self
            .session
            .bus_groups
            .get(&group)
            .ok_or(SchedulingError::UnknownBusGroup(group.0))?;
        if members.rate != CalculationRate::Control {
            return Err(SchedulingError::AudioBusSet(
                members.buses.first().map_or(0, |bus| bus.0),
            ));
        }
        if members.buses.len() != values.len() {
            return Err(SchedulingError::ValueCount {
                group: group.0,
                expected: members.buses.len(),
                actual: values.len(),
            });
        }
        let buses = members.buses.clone();
        for (bus, value) in buses.into_iter().zip(values) {
            self.set_bus(bus, *value)?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strophe_synthdef::SynthDefBuilder;
    use strophe_types::ParameterRate;

    fn sine() -> Arc<SynthDef> {
        let mut builder = SynthDefBuilder::new();
        let frequency = builder
            .add_parameter("frequency", ParameterRate::Control, 440.0)
            .unwrap();
        let synthdef = builder
            .build_with(|scope| {
                let sine = scope
                    .ugen("SinOsc", CalculationRate::Audio)
                    .input("frequency", frequency)
                    .finish()?;
                scope.ugen("Out", CalculationRate::Audio).input("source", sine).finish()?;
                Ok(())
            })
            .unwrap();
        Arc::new(synthdef)
    }

    #[test]
    fn rejects_bad_intervals() {
        let mut session = Session::default();
        assert!(matches!(
            session.add_synth(5.0, 2.0, sine()),
            Err(SchedulingError::InvalidInterval { .. })
        ));
        assert!(matches!(
            session.add_synth(2.0, 2.0, sine()),
            Err(SchedulingError::InvalidInterval { .. })
        ));
        assert!(matches!(
            session.add_group(-1.0, 2.0),
            Err(SchedulingError::InvalidOffset(_))
        ));
        assert!(session.add_group(0.0, f64::INFINITY).is_ok());
    }

    #[test]
    fn hardware_buses_exist_up_front() {
        let session = Session::new(2, 8);
        let outputs = session.audio_output_bus_group().unwrap();
        let inputs = session.audio_input_bus_group().unwrap();
        assert_eq!(session.bus_group_buses(outputs).map(<[BusId]>::len), Some(8));
        assert_eq!(session.bus_group_buses(inputs).map(<[BusId]>::len), Some(2));
        assert!(Session::new(0, 0).audio_output_bus_group().is_none());
    }

    #[test]
    fn settings_must_name_real_parameters() {
        let mut session = Session::default();
        let synth = session.add_synth(0.0, 1.0, sine()).unwrap();
        assert!(session.set(synth, "frequency", 220.0).is_ok());
        assert!(matches!(
            session.set(synth, "amplitude", 0.5),
            Err(SchedulingError::UnknownParameter { .. })
        ));
        let group = session.add_group(0.0, 1.0).unwrap();
        assert!(session.set(group, "anything", 1.0).is_ok());
    }

    #[test]
    fn moments_stay_inside_lifetimes() {
        let mut session = Session::default();
        let synth = session.add_synth(2.0, 4.0, sine()).unwrap();
        session.at(3.0).unwrap().set(synth, "frequency", 880.0).unwrap();
        assert!(matches!(
            session.at(4.0).unwrap().set(synth, "frequency", 1.0),
            Err(SchedulingError::OutsideLifetime { .. })
        ));
        assert!(matches!(
            session.at(1.0).unwrap().set(synth, "frequency", 1.0),
            Err(SchedulingError::OutsideLifetime { .. })
        ));
        assert_eq!(session.entity(synth).unwrap().events.len(), 1);
    }

    #[test]
    fn bus_rules() {
        let mut session = Session::default();
        assert!(matches!(
            session.add_bus(CalculationRate::Scalar),
            Err(SchedulingError::InvalidBusRate(_))
        ));
        assert_eq!(
            session.add_bus_group(0, CalculationRate::Control).unwrap_err(),
            SchedulingError::EmptyBusGroup
        );
        let audio = session.add_bus(CalculationRate::Audio).unwrap();
        let control = session.add_bus_group(2, CalculationRate::Control).unwrap();
        let mut moment = session.at(1.0).unwrap();
        assert!(matches!(
            moment.set_bus(audio, 0.5),
            Err(SchedulingError::AudioBusSet(_))
        ));
        assert!(matches!(
            moment.set_bus_group(control, &[1.0]),
            Err(SchedulingError::ValueCount { expected: 2, actual: 1, .. })
        ));
        moment.set_bus_group(control, &[1.0, 2.0]).unwrap();
    }

    #[test]
    fn placement_rules() {
        let mut session = Session::default();
        let group = session.add_group(0.0, 10.0).unwrap();
        let synth = session.add_synth(1.0, 5.0, sine()).unwrap();
        let late = session.add_synth(8.0, 12.0, sine()).unwrap();

        assert!(session.place(synth, AddAction::AddToTail, group).is_ok());
        assert!(matches!(
            session.place(late, AddAction::AddToHead, group),
            Err(SchedulingError::InvalidTarget { .. })
        ));
        assert!(matches!(
            session.place(group, AddAction::AddToHead, synth),
            Err(SchedulingError::InvalidTarget { .. })
        ));
        assert!(matches!(
            session.place(synth, AddAction::Replace, group),
            Err(SchedulingError::InvalidTarget { .. })
        ));

        let outer = session.add_group(0.0, 10.0).unwrap();
        session.place(outer, AddAction::AddToHead, group).unwrap();
        assert!(matches!(
            session.place(group, AddAction::AddToHead, outer),
            Err(SchedulingError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn removal_drops_the_entity_and_dangling_placements() {
        let mut session = Session::default();
        let group = session.add_group(0.0, 10.0).unwrap();
        let synth = session.add_synth(0.0, 10.0, sine()).unwrap();
        session.place(synth, AddAction::AddToHead, group).unwrap();
        session.remove(group).unwrap();
        assert!(session.entity(group).is_none());
        assert_eq!(session.entity(synth).unwrap().placement(), None);
        assert_eq!(session.len(), 1);
        assert_eq!(
            session.remove(group).unwrap_err(),
            SchedulingError::UnknownEntity(group.get())
        );
    }

    #[test]
    fn groups_cannot_be_placed_beside_synths() {
        let mut session = Session::default();
        let synth = session.add_synth(0.0, 10.0, sine()).unwrap();
        let group = session.add_group(0.0, 5.0).unwrap();
        for action in [AddAction::AddBefore, AddAction::AddAfter] {
            assert!(matches!(
                session.place(group, action, synth),
                Err(SchedulingError::InvalidTarget { .. })
            ));
        }
        assert_eq!(session.entity(group).unwrap().placement(), None);

        let other = session.add_synth(1.0, 4.0, sine()).unwrap();
        assert!(session.place(other, AddAction::AddAfter, synth).is_ok());
        let sibling = session.add_group(0.0, 5.0).unwrap();
        assert!(session.place(sibling, AddAction::AddBefore, group).is_ok());
    }

    #[test]
    fn unbounded_moments_are_rejected() {
        let mut session = Session::default();
        let bus = session.add_bus(CalculationRate::Control).unwrap();
        assert!(matches!(
            session.at(f64::INFINITY),
            Err(SchedulingError::InvalidOffset(_))
        ));
        session.at(2.0).unwrap().set_bus(bus, 1.0).unwrap();
        assert_eq!(session.buses[&bus].events.len(), 1);
    }
}
