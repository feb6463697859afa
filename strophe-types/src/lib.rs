//! # strophe-types
//!
//! Shared vocabulary for the strophe crates: signal calculation rates,
//! parameter rates and node placement. Both the synthdef compiler and the
//! non-realtime scheduler speak in these terms.

mod node;
mod rate;

pub use node::AddAction;
pub use rate::{CalculationRate, ParameterRate};
