//! Operator codes for `BinaryOpUGen` / `UnaryOpUGen`, as the engine numbers them.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Addition,
    Subtraction,
    Multiplication,
    IntegerDivision,
    FloatDivision,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Minimum,
    Maximum,
    Power,
}

impl BinaryOperator {
    pub fn special_index(self) -> i16 {
        match self {
            BinaryOperator::Addition => 0,
            BinaryOperator::Subtraction => 1,
            BinaryOperator::Multiplication => 2,
            BinaryOperator::IntegerDivision => 3,
            BinaryOperator::FloatDivision => 4,
            BinaryOperator::Modulo => 5,
            BinaryOperator::Equal => 6,
            BinaryOperator::NotEqual => 7,
            BinaryOperator::LessThan => 8,
            BinaryOperator::GreaterThan => 9,
            BinaryOperator::LessThanOrEqual => 10,
            BinaryOperator::GreaterThanOrEqual => 11,
            BinaryOperator::Minimum => 12,
            BinaryOperator::Maximum => 13,
            BinaryOperator::Power => 25,
        }
    }

    /// Evaluate on two constants, when the result is unambiguous.
    pub(crate) fn fold(self, left: f32, right: f32) -> Option<f32> {
        let value = match self {
            BinaryOperator::Addition => left + right,
            BinaryOperator::Subtraction => left - right,
            BinaryOperator::Multiplication => left * right,
            BinaryOperator::FloatDivision if right != 0.0 => left / right,
            BinaryOperator::Minimum => left.min(right),
            BinaryOperator::Maximum => left.max(right),
            BinaryOperator::Power => left.powf(right),
            _ => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Whether the other operand passes through unchanged when one side is `constant`.
    pub(crate) fn passes_through(self, constant: f32, constant_is_left: bool) -> bool {
        match self {
            BinaryOperator::Addition => constant == 0.0,
            BinaryOperator::Multiplication => constant == 1.0,
            BinaryOperator::Subtraction => !constant_is_left && constant == 0.0,
            BinaryOperator::FloatDivision => !constant_is_left && constant == 1.0,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Negative,
    Absolute,
    Ceiling,
    Floor,
    Fractional,
    Sign,
    Squared,
    Cubed,
    SquareRoot,
    Exponential,
    Reciprocal,
    MidiToHz,
    HzToMidi,
}

impl UnaryOperator {
    pub fn special_index(self) -> i16 {
        match self {
            UnaryOperator::Negative => 0,
            UnaryOperator::Absolute => 5,
            UnaryOperator::Ceiling => 8,
            UnaryOperator::Floor => 9,
            UnaryOperator::Fractional => 10,
            UnaryOperator::Sign => 11,
            UnaryOperator::Squared => 12,
            UnaryOperator::Cubed => 13,
            UnaryOperator::SquareRoot => 14,
            UnaryOperator::Exponential => 15,
            UnaryOperator::Reciprocal => 16,
            UnaryOperator::MidiToHz => 17,
            UnaryOperator::HzToMidi => 18,
        }
    }

    pub(crate) fn fold(self, value: f32) -> Option<f32> {
        let result = match self {
            UnaryOperator::Negative => -value,
            UnaryOperator::Absolute => value.abs(),
            UnaryOperator::Ceiling => value.ceil(),
            UnaryOperator::Floor => value.floor(),
            UnaryOperator::Squared => value * value,
            UnaryOperator::Cubed => value * value * value,
            _ => return None,
        };
        Some(result)
    }
}
