use strophe_synthdef::SerializationError;
use strophe_types::CalculationRate;

/// Address or ID space exhausted, or an explicit reservation that cannot be honoured.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("block at {address} of size {size} overlaps a live allocation")]
    Conflict { address: u32, size: u32 },

    #[error("block at {address} of size {size} lies outside the heap")]
    OutOfRange { address: u32, size: u32 },

    #[error("no allocation starts at {0}")]
    NotAllocated(u32),

    #[error("cannot allocate an empty block")]
    ZeroSize,

    #[error("no free block of size {0}")]
    Exhausted(u32),

    #[error("node ID space exhausted")]
    NodeIdsExhausted,
}

/// An invalid timeline edit.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchedulingError {
    #[error("offset {0} is not a non-negative number")]
    InvalidOffset(f64),

    /// Lifetimes are half-open and must be non-empty: `stop` has to be
    /// strictly greater than `start`, so `stop == start` is rejected too.
    #[error("interval [{start}, {stop}) is empty or reversed")]
    InvalidInterval { start: f64, stop: f64 },

    #[error("unknown entity {0}")]
    UnknownEntity(u64),

    #[error("unknown bus {0}")]
    UnknownBus(u64),

    #[error("unknown bus group {0}")]
    UnknownBusGroup(u64),

    #[error("synthdef {synthdef} has no parameter {parameter}")]
    UnknownParameter { synthdef: String, parameter: String },

    #[error("offset {offset} lies outside the lifetime of entity {entity}")]
    OutsideLifetime { entity: u64, offset: f64 },

    #[error("buses must run at audio or control rate, not {0}")]
    InvalidBusRate(CalculationRate),

    #[error("bus groups need at least one bus")]
    EmptyBusGroup,

    #[error("audio bus {0} cannot be set to a value")]
    AudioBusSet(u64),

    #[error("bus group {group} holds {expected} buses, got {actual} values")]
    ValueCount {
        group: u64,
        expected: usize,
        actual: usize,
    },

    #[error("cannot place entity {entity} relative to {target}: {reason}")]
    InvalidTarget {
        entity: u64,
        target: u64,
        reason: &'static str,
    },

    #[error("two different synthdefs are both named {0}")]
    ConflictingSynthDef(String),
}

/// Failure while turning a session into bundles, a datagram or a rendered file.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("session produced no commands")]
    EmptySession,

    #[error("allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("OSC encoding error: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RenderResult<T> = Result<T, RenderError>;
