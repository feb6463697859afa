//! UGen specifications loaded from a declarative data table.
//!
//! Each record describes one unit generator: its ordered inputs and their
//! defaults, the rates it can run at, which inputs are exempt from
//! multichannel expansion, and how many outputs it produces. Graph
//! construction operates generically over these records.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use serde::Deserialize;
use strophe_types::CalculationRate;

use crate::error::GraphError;

const BUILTIN_CATALOG: &str = include_str!("../ugens.toml");

static CATALOG: LazyLock<Catalog> = LazyLock::new(|| {
    Catalog::from_toml(BUILTIN_CATALOG).expect("Failed to parse embedded ugens.toml")
});

/// The built-in catalog, parsed once on first use.
pub fn catalog() -> &'static Catalog {
    &CATALOG
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(default)]
    pub default: Option<f32>,
}

/// How many outputs a ugen produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputRule {
    Fixed { count: u32 },
    /// Settable per instance through the `channel_count` option.
    ChannelCount { default: u32 },
}

impl Default for OutputRule {
    fn default() -> Self {
        OutputRule::Fixed { count: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UGenSpecification {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    pub rates: Vec<CalculationRate>,
    #[serde(default)]
    pub unexpanded_inputs: Vec<String>,
    /// Inputs that must carry audio-rate signals when the ugen runs at audio rate.
    #[serde(default)]
    pub audio_inputs: Vec<String>,
    #[serde(default)]
    pub outputs: OutputRule,
    #[serde(default)]
    pub has_side_effects: bool,
    #[serde(default)]
    pub is_width_first: bool,
}

impl UGenSpecification {
    pub fn supports_rate(&self, rate: CalculationRate) -> bool {
        self.rates.contains(&rate)
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|input| input.name == name)
    }

    pub fn is_unexpanded(&self, input: usize) -> bool {
        self.inputs
            .get(input)
            .is_some_and(|spec| self.unexpanded_inputs.contains(&spec.name))
    }

    pub fn requires_audio(&self, input: usize) -> bool {
        self.inputs
            .get(input)
            .is_some_and(|spec| self.audio_inputs.contains(&spec.name))
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    ugen: Vec<UGenSpecification>,
}

/// A name-indexed table of ugen specifications.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    specs: BTreeMap<String, Arc<UGenSpecification>>,
}

impl Catalog {
    pub fn from_toml(source: &str) -> Result<Self, GraphError> {
        let file: CatalogFile =
            toml::from_str(source).map_err(|e| GraphError::Catalog(e.to_string()))?;
        let mut catalog = Catalog::default();
        for spec in file.ugen {
            catalog.insert(spec)?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, spec: UGenSpecification) -> Result<(), GraphError> {
        if spec.rates.is_empty() {
            return Err(GraphError::Catalog(format!("{} lists no rates", spec.name)));
        }
        for name in spec.unexpanded_inputs.iter().chain(&spec.audio_inputs) {
            if spec.input_index(name).is_none() {
                return Err(GraphError::Catalog(format!(
                    "{} refers to undeclared input {}",
                    spec.name, name
                )));
            }
        }
        if self.specs.contains_key(&spec.name) {
            return Err(GraphError::Catalog(format!("{} is declared twice", spec.name)));
        }
        self.specs.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<UGenSpecification>> {
        self.specs.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}

/// Look up a spec that the compiler itself relies on.
pub(crate) fn builtin(name: &str) -> Result<Arc<UGenSpecification>, GraphError> {
    catalog()
        .get(name)
        .ok_or_else(|| GraphError::UnknownUGen(name.to_string()))
}
