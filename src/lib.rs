//! # Differential privacy for aggregate queries
//!
//! Analysts run aggregate statistics over sensitive records. This crate turns the
//! true aggregates into differentially private ones and makes sure no principal
//! spends more privacy budget than it was allotted.
//!
//! ### Mechanisms
//! Gaussian, Laplace, Exponential and Report-Noisy-Max, calibrated from an epsilon
//! and a sensitivity bound.
//!
//! ### Sensitivity
//! Derived from a structured [`AggregateRequest`] (a count moves by one, a sum by
//! the maximum of its column) using a lookup capability supplied by the storage layer.
//!
//! ### Budget accounting
//! A [`BudgetAccountant`] debits each principal atomically, all or nothing.
//!
//! ```
//! use std::sync::Arc;
//! use dpquery::{AggregateRequest, BudgetAccountant, DpQueryEngine, MechanismKind, PrivacyPrincipal};
//!
//! let accountant = Arc::new(BudgetAccountant::default());
//! accountant.register(PrivacyPrincipal::new("analyst", 10.).unwrap()).unwrap();
//! let engine = DpQueryEngine::new(accountant);
//! let result = engine
//!     .run("analyst", &AggregateRequest::count(vec![1250.]), MechanismKind::Laplace, 1.)
//!     .unwrap();
//! assert_eq!(result.residual_budget(), 9.);
//! ```
//!

pub mod builder;
pub mod config;
pub mod differential_privacy;
pub mod io;
pub mod setup;

pub use builder::{Ready, With, WithIterator};
pub use config::PrivacyConfig;
pub use differential_privacy::{
    AggregateKind, AggregateRequest, BudgetAccountant, DpEvent, DpOutput, DpQueryEngine, DpResult,
    MechanismKind, MechanismSpec, PrivacyPrincipal,
};
