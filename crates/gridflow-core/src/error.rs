//! Unified error type for the GridFlow engine.
//!
//! Construction-time errors (conflicting ids, structural violations) abort
//! the whole call. Errors raised inside a batch scenario are caught at the
//! scenario boundary and collected into [`PowerGridError::BatchCalculation`].

use thiserror::Error;

use crate::{Id, Idx, IntS};

/// All error kinds the engine can produce.
#[derive(Error, Debug)]
pub enum PowerGridError {
    /// Duplicate component id in the input dataset.
    #[error("Conflicting id detected: {0}")]
    ConflictId(Id),

    /// An update or query referenced an id that does not exist.
    #[error("The id cannot be found: {0}")]
    IdNotFound(Id),

    /// An update or query referenced an id of the wrong component type.
    #[error("Wrong type for object with id {0}")]
    IdWrongType(Id),

    /// A branch connects two nodes with disagreeing rated voltages.
    #[error(
        "Conflicting voltage for branch {id}: \
         from-node {from_node} is rated {u1} V, to-node {to_node} is rated {u2} V"
    )]
    ConflictVoltage {
        id: Id,
        from_node: Id,
        to_node: Id,
        u1: f64,
        u2: f64,
    },

    /// Both endpoints of a branch reference the same node.
    #[error("Branch {branch_id} has the same from- and to-node {node_id}")]
    InvalidBranch { branch_id: Id, node_id: Id },

    /// Transformer clock number inconsistent with its winding types.
    #[error("Invalid clock for transformer {id}: clock {clock}")]
    InvalidTransformerClock { id: Id, clock: IntS },

    /// A power sensor was placed on a component type that forbids it.
    #[error("{sensor} is not supported for {object}")]
    InvalidMeasuredObject { object: String, sensor: String },

    /// The LU factorisation encountered a zero pivot.
    ///
    /// From state estimation this usually means the system is not fully
    /// observable, i.e. not enough measurements.
    #[error("Sparse matrix error, possibly singular matrix")]
    SingularMatrix,

    /// An iterative solver exceeded its iteration limit.
    #[error(
        "Iteration failed to converge after {num_iter} iterations! \
         Max deviation: {max_dev}, error tolerance: {err_tol}"
    )]
    IterationDiverge {
        num_iter: Idx,
        max_dev: f64,
        err_tol: f64,
    },

    /// The requested method does not apply to the requested calculation.
    #[error("The calculation method is invalid for this calculation!")]
    InvalidCalculationMethod,

    /// One or more scenarios of a batch calculation failed.
    #[error("{}", format_batch_error(messages, failed_scenarios))]
    BatchCalculation {
        /// Per-scenario error text, in scenario order.
        messages: Vec<String>,
        /// Indices of the scenarios that failed.
        failed_scenarios: Vec<Idx>,
    },

    /// A dataset query referenced a non-existent attribute.
    #[error("Unknown attribute name: {0}")]
    UnknownAttributeName(String),

    /// A batch access used a scenario index outside the dataset.
    #[error("Scenario index {index} out of range for a batch of {n_scenarios}")]
    InvalidScenarioIndex { index: Idx, n_scenarios: Idx },

    /// A batch buffer's indptr is not a monotone partition of its rows.
    #[error("Malformed batch indptr at scenario {0}")]
    MalformedBatchIndptr(Idx),

    /// Catch for enum variants no handler claims.
    #[error("{method} is not implemented for value #{value}")]
    MissingCaseForEnum { method: &'static str, value: IntS },
}

fn format_batch_error(messages: &[String], failed: &[Idx]) -> String {
    let mut text = String::new();
    for (message, scenario) in messages.iter().zip(failed) {
        text.push_str(&format!("Error in batch #{scenario}: {message}\n"));
    }
    text
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, PowerGridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = PowerGridError::IterationDiverge {
            num_iter: 20,
            max_dev: 0.5,
            err_tol: 1e-8,
        };
        let text = err.to_string();
        assert!(text.contains("20 iterations"));
        assert!(text.contains("0.5"));
    }

    #[test]
    fn batch_error_lists_failed_scenarios() {
        let err = PowerGridError::BatchCalculation {
            messages: vec!["boom".into(), "bust".into()],
            failed_scenarios: vec![2, 7],
        };
        let text = err.to_string();
        assert!(text.contains("batch #2: boom"));
        assert!(text.contains("batch #7: bust"));
    }

    #[test]
    fn question_mark_propagates() {
        fn inner() -> Result<()> {
            Err(PowerGridError::SingularMatrix)
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        assert!(matches!(outer(), Err(PowerGridError::SingularMatrix)));
    }
}
