//! The error taxonomy for model construction and solving.
//!
//! Core routines return [`DispatchError`] so that callers can tell configuration problems apart
//! from solver failures. Higher layers (the orchestrator and CLI) wrap these in [`anyhow::Error`]
//! with extra context.
use thiserror::Error;

/// Errors which can occur while deriving parameters, building models or solving them.
///
/// None of these are recoverable: the only remedy is to fix the input data or configuration and
/// run again.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    /// The setup or network configuration is inconsistent (e.g. no slack bus)
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The network matrices could not be derived (e.g. singular susceptance matrix)
    #[error("Network error: {0}")]
    Network(String),
    /// The solver could not find an optimal solution for a sub-horizon
    #[error(
        "Solver error in sub-horizon {horizon} ({stage}): status {status}; implicated family: \
        {family}"
    )]
    Solver {
        /// The time range of the failing sub-horizon
        horizon: String,
        /// Which model was being solved (market or redispatch)
        stage: String,
        /// The status reported by the solver
        status: String,
        /// The constraint or variable family implicated in the failure
        family: String,
    },
    /// A value required at model-build time was missing or out of range
    #[error("Data contract violation for {entity}: {message}")]
    DataContract {
        /// The offending entity
        entity: String,
        /// What was wrong with it
        message: String,
    },
}

impl DispatchError {
    /// Shorthand for a [`DispatchError::Configuration`]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Shorthand for a [`DispatchError::DataContract`]
    pub fn data_contract(entity: impl ToString, message: impl Into<String>) -> Self {
        Self::DataContract {
            entity: entity.to_string(),
            message: message.into(),
        }
    }
}

/// Return early with a [`DispatchError::Configuration`] if the condition is false
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::DispatchError::Configuration(format!($($arg)+)));
        }
    };
}
pub(crate) use ensure_config;

#[cfg(test)]
mod tests {
    use super::*;

    fn check_positive(value: f64) -> Result<(), DispatchError> {
        ensure_config!(value > 0.0, "value must be positive, got {value}");
        Ok(())
    }

    #[test]
    fn test_ensure_config() {
        assert!(check_positive(1.0).is_ok());
        assert_eq!(
            check_positive(-1.0).unwrap_err(),
            DispatchError::Configuration("value must be positive, got -1".into())
        );
    }

    #[test]
    fn test_solver_error_message() {
        let err = DispatchError::Solver {
            horizon: "25:48".into(),
            stage: "redispatch".into(),
            status: "Infeasible".into(),
            family: "line_flow_limits".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("25:48"));
        assert!(msg.contains("line_flow_limits"));
    }
}
