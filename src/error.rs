//! Error types shared by every component of the simulation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlcError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("{bank} bank holds at most {capacity} slots, {requested} requested")]
    CapacityExceeded {
        bank: &'static str,
        requested: usize,
        capacity: usize,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BlcError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        BlcError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// True for errors raised by `configure` (bad or out-of-domain parameters).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BlcError::InvalidParameter { .. } | BlcError::CapacityExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BlcError>;

pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(BlcError::invalid(name, format!("must be finite, got {value}")));
    }
    if value <= 0.0 {
        return Err(BlcError::invalid(name, format!("must be > 0, got {value}")));
    }
    Ok(())
}

pub(crate) fn require_finite(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(BlcError::invalid(name, format!("must be finite, got {value}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_check_rejects_zero_and_nan() {
        assert!(require_positive("fs", 0.0).is_err());
        assert!(require_positive("fs", -1.0).is_err());
        assert!(require_positive("fs", f64::NAN).is_err());
        assert!(require_positive("fs", 1.0).is_ok());
    }

    #[test]
    fn test_configuration_class() {
        let err = BlcError::CapacityExceeded {
            bank: "notch",
            requested: 21,
            capacity: 20,
        };
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "notch bank holds at most 20 slots, 21 requested");

        let io = BlcError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert!(!io.is_configuration());
    }
}
