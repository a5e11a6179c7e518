// ============================================================================
// Numeric Errors
// Error types for decimal amount handling
// ============================================================================

use std::fmt;

/// Errors that can occur while validating or computing amounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NumericError {
    /// Result exceeded the representable decimal range
    Overflow,
    /// Value carries more fractional digits than the asset allows
    PrecisionLoss { value: String, decimals: u32 },
    /// Amount must not be negative
    Negative(String),
    /// Input string or value is invalid
    InvalidInput(String),
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericError::Overflow => {
                write!(f, "arithmetic overflow: result exceeded maximum value")
            },
            NumericError::PrecisionLoss { value, decimals } => write!(
                f,
                "precision loss: {} has more than {} decimal places",
                value, decimals
            ),
            NumericError::Negative(value) => write!(f, "negative amount: {}", value),
            NumericError::InvalidInput(value) => {
                write!(f, "invalid input: could not parse {}", value)
            },
        }
    }
}

impl std::error::Error for NumericError {}

/// Result type alias for numeric operations
pub type NumericResult<T> = Result<T, NumericError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            NumericError::Overflow.to_string(),
            "arithmetic overflow: result exceeded maximum value"
        );
        assert_eq!(
            NumericError::PrecisionLoss {
                value: "0.123".to_string(),
                decimals: 2
            }
            .to_string(),
            "precision loss: 0.123 has more than 2 decimal places"
        );
    }
}
