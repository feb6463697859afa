//! Non-realtime scheduling: lay synths and groups out on a timeline, turn the
//! timeline into OSC bundles, and render it offline with scsynth.

pub mod allocator;
pub mod command;
pub mod config;
pub mod error;
pub mod offset;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod timespan;

pub use allocator::{BlockAllocator, NodeIdAllocator, FIRST_NODE_ID};
pub use command::{BusMapping, Command};
pub use config::{HeaderFormat, RenderConfig, SampleFormat};
pub use error::{AllocationError, RenderError, RenderResult, SchedulingError};
pub use offset::{Offset, OffsetRange};
pub use render::{build_command, render, RenderOutcome};
pub use scheduler::{encode_bundles, to_bundles, to_datagram, Bundle};
pub use session::{BusGroupId, BusId, Entity, EntityId, EntityKind, Moment, Session, Setting};
pub use timespan::{Simultaneity, Timespan, TimespanCollection};
pub use strophe_types::AddAction;
