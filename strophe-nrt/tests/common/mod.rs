//! Shared fixtures for the scheduler integration tests.

use std::sync::Arc;

use strophe_synthdef::{CalculationRate, ParameterRate, SynthDef, SynthDefBuilder};

/// `SinOsc(frequency) -> Out(0)` with a 440 Hz default.
pub fn sine(name: &str) -> Arc<SynthDef> {
    let mut builder = SynthDefBuilder::named(name);
    let frequency = builder
        .add_parameter("frequency", ParameterRate::Control, 440.0)
        .expect("declare frequency");
    let synthdef = builder
        .build_with(|scope| {
            let sine = scope
                .ugen("SinOsc", CalculationRate::Audio)
                .input("frequency", frequency)
                .finish()?;
            scope
                .ugen("Out", CalculationRate::Audio)
                .input("source", sine)
                .finish()?;
            Ok(())
        })
        .expect("build sine");
    Arc::new(synthdef)
}
