//! Compiled synth definitions and the SCgf version 2 binary format.

use strophe_types::{CalculationRate, ParameterRate};

use crate::error::SerializationError;

const MAGIC: &[u8; 4] = b"SCgf";
const FORMAT_VERSION: i32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub rate: ParameterRate,
    /// First control slot, counted across all control ugens.
    pub index: u32,
    pub defaults: Vec<f32>,
    pub lag: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRef {
    Constant(usize),
    UGen { ugen: usize, output: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUGen {
    pub name: String,
    pub rate: CalculationRate,
    pub inputs: Vec<InputRef>,
    pub output_rates: Vec<CalculationRate>,
    pub special_index: i16,
}

/// An immutable, topologically ordered synth definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthDef {
    pub(crate) name: Option<String>,
    pub(crate) anonymous_name: String,
    pub(crate) constants: Vec<f32>,
    pub(crate) parameters: Vec<ParameterInfo>,
    pub(crate) ugens: Vec<CompiledUGen>,
}

impl SynthDef {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Lowercase hex SHA-256 of the serialized body.
    pub fn anonymous_name(&self) -> &str {
        &self.anonymous_name
    }

    /// The explicit name if one was given, else the content hash.
    pub fn actual_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.anonymous_name)
    }

    pub fn constants(&self) -> &[f32] {
        &self.constants
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterInfo> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn ugens(&self) -> &[CompiledUGen] {
        &self.ugens
    }

    /// A single-definition SCgf file.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        compile_synthdefs(&[self])
    }

    /// Everything after the name: constants, parameters, ugens and variants.
    pub(crate) fn body_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        let mut out = Vec::new();

        write_count(&mut out, "constant", self.constants.len())?;
        for value in &self.constants {
            out.extend_from_slice(&value.to_be_bytes());
        }

        let slot_count: usize = self.parameters.iter().map(|p| p.defaults.len()).sum();
        write_count(&mut out, "parameter value", slot_count)?;
        for parameter in &self.parameters {
            for value in &parameter.defaults {
                out.extend_from_slice(&value.to_be_bytes());
            }
        }

        write_count(&mut out, "parameter name", self.parameters.len())?;
        for parameter in &self.parameters {
            write_pstring(&mut out, &parameter.name)?;
            out.extend_from_slice(&(parameter.index as i32).to_be_bytes());
        }

        write_count(&mut out, "ugen", self.ugens.len())?;
        for (position, ugen) in self.ugens.iter().enumerate() {
            self.write_ugen(&mut out, position, ugen)?;
        }

        // No variants.
        out.extend_from_slice(&0i16.to_be_bytes());
        Ok(out)
    }

    fn write_ugen(
        &self,
        out: &mut Vec<u8>,
        position: usize,
        ugen: &CompiledUGen,
    ) -> Result<(), SerializationError> {
        write_pstring(out, &ugen.name)?;
        out.push(ugen.rate.as_byte());
        write_count(out, "input", ugen.inputs.len())?;
        write_count(out, "output", ugen.output_rates.len())?;
        out.extend_from_slice(&ugen.special_index.to_be_bytes());
        for input in &ugen.inputs {
            match *input {
                InputRef::Constant(index) => {
                    if index >= self.constants.len() {
                        return Err(SerializationError::ConstantOutOfRange {
                            ugen: position,
                            index,
                            count: self.constants.len(),
                        });
                    }
                    out.extend_from_slice(&(-1i32).to_be_bytes());
                    out.extend_from_slice(&(index as i32).to_be_bytes());
                }
                InputRef::UGen { ugen: producer, output } => {
                    if producer >= position {
                        return Err(SerializationError::ForwardReference {
                            ugen: position,
                            producer,
                        });
                    }
                    let count = self.ugens[producer].output_rates.len();
                    if output >= count {
                        return Err(SerializationError::OutputOutOfRange {
                            ugen: position,
                            producer,
                            output,
                            count,
                        });
                    }
                    out.extend_from_slice(&(producer as i32).to_be_bytes());
                    out.extend_from_slice(&(output as i32).to_be_bytes());
                }
            }
        }
        for rate in &ugen.output_rates {
            out.push(rate.as_byte());
        }
        Ok(())
    }
}

/// Serialize one definition as a complete SCgf file.
pub fn serialize(synthdef: &SynthDef) -> Result<Vec<u8>, SerializationError> {
    synthdef.to_bytes()
}

/// Serialize several definitions into a single SCgf file, in the given order.
pub fn compile_synthdefs(synthdefs: &[&SynthDef]) -> Result<Vec<u8>, SerializationError> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    let count = i16::try_from(synthdefs.len()).map_err(|_| SerializationError::CountOverflow {
        what: "synthdef",
        count: synthdefs.len(),
    })?;
    out.extend_from_slice(&count.to_be_bytes());
    for synthdef in synthdefs {
        write_pstring(&mut out, synthdef.actual_name())?;
        out.extend(synthdef.body_bytes()?);
    }
    Ok(out)
}

fn write_pstring(out: &mut Vec<u8>, value: &str) -> Result<(), SerializationError> {
    let bytes = value.as_bytes();
    let length =
        u8::try_from(bytes.len()).map_err(|_| SerializationError::NameTooLong(value.to_string()))?;
    out.push(length);
    out.extend_from_slice(bytes);
    Ok(())
}

fn write_count(out: &mut Vec<u8>, what: &'static str, count: usize) -> Result<(), SerializationError> {
    let value = i32::try_from(count).map_err(|_| SerializationError::CountOverflow { what, count })?;
    out.extend_from_slice(&value.to_be_bytes());
    Ok(())
}
