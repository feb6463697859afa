use strophe_types::CalculationRate;

pub type SynthDefResult<T> = Result<T, SynthDefError>;

/// Misuse of the builder scope.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("a builder scope is already active (graph {active})")]
    NestedScope { active: u64 },

    #[error("signal belongs to graph {signal}, not to the active graph {active}")]
    ForeignSignal { signal: u64, active: u64 },
}

/// Invalid rate, arity or wiring detected while a graph is built or compiled.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("unknown ugen {0}")]
    UnknownUGen(String),

    #[error("{ugen} does not run at {rate} rate")]
    InvalidRate { ugen: String, rate: CalculationRate },

    #[error("{ugen} takes {expected} inputs, got {actual}")]
    Arity {
        ugen: String,
        expected: usize,
        actual: usize,
    },

    #[error("{ugen} has no input named {input}")]
    UnknownInput { ugen: String, input: String },

    #[error("{ugen} input {input} has no default and was not supplied")]
    MissingInput { ugen: String, input: String },

    #[error("{ugen} input {input} received an empty sequence")]
    EmptySequence { ugen: String, input: String },

    #[error("scalar-rate {ugen} cannot read a {rate} rate signal")]
    RateMismatch { ugen: String, rate: CalculationRate },

    #[error("{ugen}: {reason}")]
    ChannelCount { ugen: String, reason: String },

    #[error("parameter {0} is declared twice")]
    DuplicateParameter(String),

    #[error("parameter {0} needs at least one value")]
    EmptyParameter(String),

    #[error("parameter {0}: only control-rate parameters can be lagged")]
    InvalidLag(String),

    #[error("ugen graph contains a cycle")]
    Cycle,

    #[error("malformed ugen catalog: {0}")]
    Catalog(String),
}

/// Internal invariant violation while encoding a compiled definition.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("ugen {ugen} references constant {index} of {count}")]
    ConstantOutOfRange {
        ugen: usize,
        index: usize,
        count: usize,
    },

    #[error("ugen {ugen} references ugen {producer} which is not serialized before it")]
    ForwardReference { ugen: usize, producer: usize },

    #[error("ugen {ugen} references output {output} of ugen {producer}, which has {count}")]
    OutputOutOfRange {
        ugen: usize,
        producer: usize,
        output: usize,
        count: usize,
    },

    #[error("name {0:?} does not fit in a 255 byte string")]
    NameTooLong(String),

    #[error("{what} count {count} does not fit the field")]
    CountOverflow { what: &'static str, count: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SynthDefError {
    #[error("context error: {0}")]
    Context(#[from] ContextError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        let err: SynthDefError = GraphError::Cycle.into();
        assert!(err.to_string().starts_with("graph error:"));
        let err: SynthDefError = ContextError::NestedScope { active: 3 }.into();
        assert!(err.to_string().contains("already active"));
        let err: SynthDefError = SerializationError::NameTooLong("x".into()).into();
        assert!(err.to_string().starts_with("serialization error:"));
    }
}
