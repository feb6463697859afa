//! Calculation and parameter rates.

use serde::{Deserialize, Serialize};

/// Update frequency class of a signal.
///
/// Variants are ordered from slowest to fastest so that `max()` over the
/// rates of a set of operands yields the rate an arithmetic ugen needs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CalculationRate {
    #[default]
    Scalar,
    Control,
    Audio,
    Demand,
}

impl CalculationRate {
    /// Byte written into compiled synth definitions.
    pub fn as_byte(self) -> u8 {
        match self {
            CalculationRate::Scalar => 0,
            CalculationRate::Control => 1,
            CalculationRate::Audio => 2,
            CalculationRate::Demand => 3,
        }
    }

    /// The conventional method suffix (`ir`, `kr`, `ar`, `dr`).
    pub fn token(self) -> &'static str {
        match self {
            CalculationRate::Scalar => "ir",
            CalculationRate::Control => "kr",
            CalculationRate::Audio => "ar",
            CalculationRate::Demand => "dr",
        }
    }
}

impl std::fmt::Display for CalculationRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Rate of an externally settable synth parameter.
///
/// The declaration order here is the order parameter groups are laid out in
/// a compiled definition: scalar, trigger, audio, then control.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ParameterRate {
    Scalar,
    Trigger,
    Audio,
    #[default]
    Control,
}

impl ParameterRate {
    pub fn calculation_rate(self) -> CalculationRate {
        match self {
            ParameterRate::Scalar => CalculationRate::Scalar,
            ParameterRate::Trigger | ParameterRate::Control => CalculationRate::Control,
            ParameterRate::Audio => CalculationRate::Audio,
        }
    }

    /// Name of the control ugen that exposes parameters of this rate.
    pub fn control_ugen_name(self, lagged: bool) -> &'static str {
        match self {
            ParameterRate::Scalar => "Control",
            ParameterRate::Trigger => "TrigControl",
            ParameterRate::Audio => "AudioControl",
            ParameterRate::Control if lagged => "LagControl",
            ParameterRate::Control => "Control",
        }
    }
}
