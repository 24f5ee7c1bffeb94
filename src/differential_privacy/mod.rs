//! # Differential privacy mechanisms and budget accounting
//!
//! Turns true aggregate values into differentially private ones:
//! - [`sensitivity`] bounds how much one record can move an aggregate,
//! - [`mechanisms`] adds calibrated noise or privately selects a candidate,
//! - [`budget`] keeps track of the epsilon each principal has left,
//! - [`engine`] ties the three together.
//!

pub mod budget;
pub mod dp_event;
pub mod dp_parameters;
pub mod engine;
pub mod mechanisms;
pub mod request;
pub mod sensitivity;

use std::{error, fmt, result};

/// Some exports
pub use budget::{BudgetAccountant, BudgetStore, MemoryStore, PrincipalState, PrivacyPrincipal};
pub use dp_event::DpEvent;
pub use dp_parameters::{MechanismKind, MechanismSpec};
pub use engine::{DpOutput, DpQueryEngine, DpResult};
pub use mechanisms::{run_mechanism, CalibratedMechanism, NoisedOutput};
pub use request::{AggregateKind, AggregateRequest};
pub use sensitivity::{resolve_sensitivity, resolve_sensitivity_or, MaxLookup, NoLookup};

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// Non-positive or non-finite epsilon, sensitivity or delta
    InvalidParameter(String),
    /// The principal has not enough budget left, nothing was charged
    BudgetExceeded { requested: f64, remaining: f64 },
    /// The exponential mechanism needs utility scores
    MissingUtility,
    /// Candidates and utility scores must be parallel
    LengthMismatch { expected: usize, found: usize },
    /// Nothing to noise or select from
    EmptyInput,
    UnknownPrincipal(String),
    /// The principal is already tracked, its budget is only restored by a reset
    DuplicatePrincipal(String),
    Other(String),
}

impl Error {
    pub fn invalid_parameter(desc: impl fmt::Display) -> Error {
        Error::InvalidParameter(format!("{desc}"))
    }

    pub fn budget_exceeded(requested: f64, remaining: f64) -> Error {
        Error::BudgetExceeded {
            requested,
            remaining,
        }
    }

    pub fn length_mismatch(expected: usize, found: usize) -> Error {
        Error::LengthMismatch { expected, found }
    }

    pub fn unknown_principal(id: impl fmt::Display) -> Error {
        Error::UnknownPrincipal(format!("{id}"))
    }

    pub fn duplicate_principal(id: impl fmt::Display) -> Error {
        Error::DuplicatePrincipal(format!("{id}"))
    }

    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(format!("{desc}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidParameter(desc) => writeln!(f, "InvalidParameter: {}", desc),
            Error::BudgetExceeded {
                requested,
                remaining,
            } => writeln!(
                f,
                "BudgetExceeded: requested epsilon {requested} but only {remaining} left"
            ),
            Error::MissingUtility => writeln!(f, "MissingUtility: utility scores are required"),
            Error::LengthMismatch { expected, found } => writeln!(
                f,
                "LengthMismatch: expected {expected} utility scores, found {found}"
            ),
            Error::EmptyInput => writeln!(f, "EmptyInput: no values to process"),
            Error::UnknownPrincipal(id) => writeln!(f, "UnknownPrincipal: {}", id),
            Error::DuplicatePrincipal(id) => writeln!(f, "DuplicatePrincipal: {}", id),
            Error::Other(err) => writeln!(f, "{}", err),
        }
    }
}

impl From<statrs::StatsError> for Error {
    fn from(err: statrs::StatsError) -> Self {
        Error::InvalidParameter(err.to_string())
    }
}

impl From<rand::distributions::WeightedError> for Error {
    fn from(err: rand::distributions::WeightedError) -> Self {
        Error::InvalidParameter(err.to_string())
    }
}

impl error::Error for Error {}
pub type Result<T> = result::Result<T, Error>;

/// Check an epsilon can be used to calibrate a mechanism or charge a budget
pub fn check_epsilon(epsilon: f64) -> Result<f64> {
    if epsilon.is_finite() && epsilon > 0. {
        Ok(epsilon)
    } else {
        Err(Error::invalid_parameter(format!(
            "epsilon must be a finite positive number, got {epsilon}"
        )))
    }
}

/// Check a sensitivity bound is usable
pub fn check_sensitivity(sensitivity: f64) -> Result<f64> {
    if sensitivity.is_finite() && sensitivity > 0. {
        Ok(sensitivity)
    } else {
        Err(Error::invalid_parameter(format!(
            "sensitivity must be a finite positive number, got {sensitivity}"
        )))
    }
}
